pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, resolve_database_path};
pub use schema::{AiConfig, Config, LogFormat, LoggingConfig};
