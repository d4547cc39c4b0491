pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FlowConfig;
pub use error::{Result, WeirError};
pub use traits::{FnExecutor, StepExecutor};
pub use types::*;
