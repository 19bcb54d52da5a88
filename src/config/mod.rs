pub mod settings;

pub use settings::{
    generate_default_config, HealthSettings, LoggingSettings, PollingSettings, PreflightSettings,
    RebalanceSettings, Settings, StorageSettings,
};
