use std::path::Path;

use serde::de::DeserializeOwned;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the YAML configuration files.
const CONFIGURATION_DIR: &str = "configuration";

const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix of environment variables that override file settings.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, `APP_CACHE__BATCH_SIZE` sets `cache.batch_size`.
const ENV_SEPARATOR: &str = "__";

/// Separator for list values, `APP_CACHE__FTS_TABLES=concept,drug` sets a two element list.
const LIST_SEPARATOR: &str = ",";

/// Describes how a configuration type is read from the environment.
pub trait Config {
    /// Keys whose environment variable values are split on [`LIST_SEPARATOR`].
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads a configuration from `configuration/` in the current working directory.
///
/// Sources are layered in this order, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`, where the environment comes from `APP_ENVIRONMENT`
/// 3. environment variables prefixed with `APP_`
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(|err| {
        config::ConfigError::Message(format!("failed to determine the current directory: {err}"))
    })?;

    load_config_from(&base_path.join(CONFIGURATION_DIR))
}

/// Same as [`load_config`] but reads the YAML files from `configuration_directory`.
pub fn load_config_from<T>(configuration_directory: &Path) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment = Environment::load()
        .map_err(|err| config::ConfigError::Message(format!("invalid APP_ENVIRONMENT: {err}")))?;
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        // The environment specific file is optional.
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}
