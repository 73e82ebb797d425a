pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, CONTENT_ROOT_ENV};
pub use schema::{Config, LoggingConfig, MigrationConfig};
