//! Layered configuration: TOML file + environment overlay + provider
//! descriptor directory.

pub mod secrets;
mod types;

pub use secrets::SecretString;
pub use types::{
    ApiKeyConfig, AuthConfig, CacheConfig, Config, CredentialsConfig, DatabaseConfig,
    DebateConfigDefaults, DebugConfig, GatewayConfig, LoggingConfig, ProviderConfig,
    ProviderConfigs, ProviderKind, RegistryConfig, TasksConfig,
};
