use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

use super::cli::{CliConfig, Command};
use super::settings::Settings;
use super::types::LogLevel;
use crate::net::SessionOptions;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: LogLevel,
    pub session: SessionOptions,
    pub command: Command,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Panics on a bad settings file. Do not start with a half-read config.
    pub async fn init() {
        CliConfig::init();

        let cli = CliConfig::snapshot();
        let settings = Settings::load(cli.settings_file_location.as_deref())
            .await
            .unwrap_or_else(|e| panic!("failed to load settings: {e}"));

        Self::store(cli, settings);
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    fn store(cli: CliConfig, settings: Settings) {
        let next = Config {
            log_level: cli.log_level,
            session: settings.session,
            command: cli.command,
        };

        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init().await first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
