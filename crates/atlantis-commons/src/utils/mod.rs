pub mod codec;
pub mod error;
pub mod paths;
pub mod serialize;
