pub mod config;
pub mod error;
#[cfg(feature = "openai")]
pub mod http_client;
pub mod init;
pub mod instrumentation;
pub mod model;
pub mod normalizer;
pub mod provider;
#[cfg(feature = "openai")]
pub mod providers;
pub mod registry;
pub mod stream;
pub mod telemetry;

pub use init::{Anchor, init, init_with};
