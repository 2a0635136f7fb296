mod command;
mod contsec;
mod netsec;

pub use contsec::ContainerSecurity;
pub use netsec::{
    NetworkSecurity,
    NETSEC_FILE,
};
