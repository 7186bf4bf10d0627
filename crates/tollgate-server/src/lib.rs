pub mod bootstrap;
pub mod config;
pub mod housekeeping;
pub mod observability;
pub mod server;

pub use config::{AppConfig, PostgresStorageConfig, ServerConfig, StorageBackend};
pub use housekeeping::{Housekeeper, HousekeepingReport};
pub use observability::init_tracing;
pub use server::{ServerBuilder, TollgateServer, build_app};
