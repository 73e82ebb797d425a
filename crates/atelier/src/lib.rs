pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migration;
pub mod sanitize;
pub mod storage;

pub use broadcast::{
    JobStatus, MigrationJob, MigrationJobStore, MigrationProgressBroadcaster,
    MigrationProgressEvent,
};
pub use config::{load_config, Config};
pub use db::{CatalogStore, Database, DatabaseError, SqliteCatalog};
pub use error::{AtelierError, ConfigError, Result, StorageError};
pub use logging::init_logging;
pub use migration::{
    ItemMigrator, MigrationError, MigrationReport, MigrationRequest, MigrationRunner,
    Orchestrator,
};
pub use storage::{ContentStore, LocalContentStore};
