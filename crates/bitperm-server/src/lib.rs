pub mod config;
pub mod container;
pub mod health;
pub mod maintenance;
pub mod observability;

pub use config::{
    AppConfig, CacheConfig, CacheStrategy, ConfigError, PermissionsConfig, RateLimitConfig,
    RedisConfig, StorageBackend, StorageConfig,
};
pub use container::{AppContainer, StartupError};
pub use health::ServiceHealth;
pub use maintenance::{MaintenanceHandle, MaintenanceReport, MaintenanceTask};
pub use observability::{apply_logging_level, init_tracing};
