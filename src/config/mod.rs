mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{DatabaseSettings, LogSettings, RelaySettings, ServerSettings, Settings};

/// Prefix of environment variables read by [`load_config`].
pub const ENV_PREFIX: &str = "PGRELAY";

/// Loads the configuration from `config/default` and `PGRELAY_*` environment
/// variables, then fills whatever is missing from `Settings::default()`.
///
/// Nested keys use a double underscore: `PGRELAY_SERVER__WS_PORT=9001`.
/// A plain `DATABASE_URL` is honoured when `database.url` is not set.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let mut settings = partial.merge(Settings::default());

    if settings.database.url.is_none() {
        settings.database.url = std::env::var("DATABASE_URL").ok();
    }

    Ok(settings)
}
