pub mod models;
pub mod utils;

pub use models::container::{
    Container,
    ProxyContainer,
    ResourceStats,
};
pub use models::manifest::{
    AppDep,
    Manifest,
    ManifestSource,
};
pub use models::proxy::{
    ProxyConfig,
    ProxyKind,
};
pub use utils::error::SupervisorError;
pub use utils::serialize::Serializer;
