pub mod config;
pub mod context;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::ExecutionContext;
pub use error::{ConductorError, Result};
pub use types::*;
