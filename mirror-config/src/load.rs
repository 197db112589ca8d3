use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Default configuration directory, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Environment variable that overrides [`CONFIGURATION_DIR`].
const CONFIGURATION_DIR_ENV_NAME: &str = "APP_CONFIGURATION_DIR";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_TARGET__HOST`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Implemented by top level configuration structures.
pub trait Config {
    /// Keys whose environment variable values are parsed as comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// The two file layers of a configuration.
#[derive(Debug, Clone, Copy)]
enum ConfigFile {
    Base,
    Environment(Environment),
}

impl ConfigFile {
    fn stem(&self) -> &'static str {
        match self {
            ConfigFile::Base => "base",
            ConfigFile::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFile::Base => f.write_str("base configuration"),
            ConfigFile::Environment(environment) => {
                write!(f, "{environment} environment configuration")
            }
        }
    }
}

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate {file} in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        file: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load {file} from `{path}`: {source}")]
    ConfigurationFileLoad {
        file: String,
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to build configuration: {0}")]
    Builder(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads a configuration from the configuration directory and the process environment.
///
/// The directory is `./configuration` unless `APP_CONFIGURATION_DIR` points elsewhere. Inside
/// it, `base.(yaml|yml|json)` is loaded first, then `{environment}.(yaml|yml|json)` where the
/// environment comes from `APP_ENVIRONMENT`, then `APP_` prefixed environment variables.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = match std::env::var(CONFIGURATION_DIR_ENV_NAME) {
        Ok(directory) => PathBuf::from(directory),
        Err(_) => std::env::current_dir()
            .map_err(LoadConfigError::CurrentDir)?
            .join(CONFIGURATION_DIR),
    };
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&directory, environment)
}

/// Loads a configuration from an explicit directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let base_file = find_configuration_file(directory, ConfigFile::Base)?;
    let environment_file =
        find_configuration_file(directory, ConfigFile::Environment(environment))?;

    let builder = config::Config::builder().add_source(config::File::from(base_file.clone()));
    check_layer(&builder, ConfigFile::Base, &base_file)?;

    let builder = builder.add_source(config::File::from(environment_file.clone()));
    check_layer(
        &builder,
        ConfigFile::Environment(environment),
        &environment_file,
    )?;

    let settings = builder
        .add_source(environment_source::<T>())
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

fn environment_source<T: Config>() -> config::Environment {
    let mut source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !T::LIST_PARSE_KEYS.is_empty() {
        source = source.try_parsing(true).list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}

fn find_configuration_file(directory: &Path, file: ConfigFile) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", file.stem())))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        file: file.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the configuration accumulated so far so that a broken file is reported by name.
fn check_layer(
    builder: &ConfigBuilder<DefaultState>,
    file: ConfigFile,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            file: file.to_string(),
            path: path.to_path_buf(),
            source,
        })
}
