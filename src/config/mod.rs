//! Configuration management for the watch engine.
//!
//! Configuration is loaded from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Config file named by `WATCHSET_CONFIG_PATH`
//! 3. Explicit override files (`with_override_config`)
//! 4. Environment variables `WATCHSET__<SECTION>__<FIELD>` (highest priority)
//!
//! Loading never validates; call [`Settings::validate`] once all overrides are
//! applied.

mod watch;
pub use watch::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::constants::CONFIG_ENV_SEPARATOR;
use crate::constants::CONFIG_PATH_ENV;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Watch fan-out parameters
    #[serde(default)]
    pub watch: WatchSetConfig,
}

impl Settings {
    /// Builds settings from defaults, the optional `WATCHSET_CONFIG_PATH`
    /// file and environment variables.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional overrides from a TOML file without validation.
    ///
    /// Environment variables still take precedence over the file.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Loads and validates in one step.
    ///
    /// # Example
    /// ```ignore
    /// let settings = Settings::load(Some("watch.toml"))?;
    /// let watch_set: WatchSet<DynamicObject> = WatchSet::new(settings.watch);
    /// ```
    pub fn load(override_path: Option<&str>) -> Result<Self> {
        let mut settings = Self::new()?;
        if let Some(path) = override_path {
            settings = settings.with_override_config(path)?;
        }
        settings.validate()
    }

    /// Consumes self and validates every section.
    pub fn validate(self) -> Result<Self> {
        self.watch.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator(CONFIG_ENV_SEPARATOR)
        .ignore_empty(true)
        .try_parsing(true)
}
