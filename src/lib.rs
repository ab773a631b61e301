// Re-export the engine core so consumers work against one crate.
pub use stitchcore::{cache, net, normalize, reconcile, typing};

pub mod types {
    pub use stitchcore::types::*;
}

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod history;
pub mod http;
pub mod send;
pub mod session;
pub mod sidechannel;
pub mod transport;
pub mod upload;
