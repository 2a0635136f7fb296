pub mod config;
pub mod healthz;
pub mod monitor;
pub mod rpc;
pub mod server;
pub mod tracker;
