//! Ambient utilities shared by the coordination crates.
//!
//! Only the `config` surface is kept: environment-variable loading and typed config-file
//! loading, used by `durable-runtime` for its env-overridable [`crate::config`] builder.

pub mod error;

#[cfg(feature = "config")]
pub mod config;

pub use error::{Result, UtilsError};

#[cfg(feature = "config")]
pub use config::{
    get_env, get_env_bool, get_env_bool_or, get_env_or, get_env_parse, get_env_parse_or,
    load_config_file, load_json_config, load_yaml_config, ConfigBuilder, FromEnv, ValidateConfig,
};
