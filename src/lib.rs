pub mod network;
pub mod fingerprint;
pub mod config;
pub mod error;
pub mod utils;

pub use error::{SniffError, Result};
pub use config::Config;
