pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{AppConfig, McpServerConfig, McpTransport, ModelConfig, Provider, ResearchConfig};
pub use error::{Result, SleuthError};
pub use event::EventBus;
pub use types::*;
