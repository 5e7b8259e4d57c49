mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, PartialSettings, PoolSettings, ServerSettings, Settings, StorageSettings,
};

/// Loads the configuration from `config/default` and `IMQ_`-prefixed
/// environment variables, then merges it over the default values.
///
/// Nested keys use a double underscore, e.g. `IMQ_SERVER__PORT=9000` or
/// `IMQ_STORAGE__SEED_TOPICS=golang,rust`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("IMQ")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("storage.seed_topics")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());

    validate(&settings)?;
    Ok(settings)
}

/// Rejects settings the server cannot run with.
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let pools = &settings.pools;

    if pools.publisher_workers == 0 || pools.subscriber_workers == 0 {
        return Err(ConfigError::Message(
            "worker pools must have at least one worker".to_string(),
        ));
    }

    if pools.publisher_port_start >= pools.publisher_port_end {
        return Err(ConfigError::Message(
            "publisher port range is empty".to_string(),
        ));
    }

    if pools.subscriber_port_start >= pools.subscriber_port_end {
        return Err(ConfigError::Message(
            "subscriber port range is empty".to_string(),
        ));
    }

    let overlap = pools.publisher_port_start < pools.subscriber_port_end
        && pools.subscriber_port_start < pools.publisher_port_end;
    if overlap {
        return Err(ConfigError::Message(
            "publisher and subscriber port ranges overlap".to_string(),
        ));
    }

    if settings.broker.mailbox_capacity == 0 {
        return Err(ConfigError::Message(
            "broker mailbox capacity must be positive".to_string(),
        ));
    }

    Ok(())
}
