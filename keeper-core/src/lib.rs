pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod retention;
pub mod target;
pub mod verifier;

pub use error::{KeeperError, Result};
