//! Configuration types, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::texts::TextTable;
use crate::wizard::steps::StepTable;

/// Telegram channel configuration. Absent when no bot token is set.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
}

/// Wizard configuration.
#[derive(Debug, Clone)]
pub struct WizardConfig {
    /// Root of the asset tree.
    pub assets_dir: PathBuf,
    /// JSON step table; the built-in postcard table when unset.
    pub steps_path: Option<PathBuf>,
    /// JSON text table merged over the built-in texts.
    pub texts_path: Option<PathBuf>,
    /// Where the latest composite per session is written, if anywhere.
    pub scratch_dir: Option<PathBuf>,
    /// Sessions idle for longer than this are dropped.
    pub session_idle_timeout: Duration,
    /// How often idle sessions are swept.
    pub sweep_interval: Duration,
    /// Where the CLI channel writes images.
    pub cli_out_dir: PathBuf,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("./assets"),
            steps_path: None,
            texts_path: None,
            scratch_dir: None,
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(60),
            cli_out_dir: PathBuf::from("./out"),
        }
    }
}

impl WizardConfig {
    pub fn load_step_table(&self) -> Result<StepTable, ConfigError> {
        match &self.steps_path {
            Some(path) => StepTable::load(path),
            None => Ok(StepTable::postcard()),
        }
    }

    pub fn load_texts(&self) -> Result<TextTable, ConfigError> {
        match &self.texts_path {
            Some(path) => TextTable::load(path),
            None => Ok(TextTable::builtin()),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram: Option<TelegramConfig>,
    pub wizard: WizardConfig,
    pub db_path: PathBuf,
    /// Port for the status REST endpoints; disabled when unset.
    pub status_port: Option<u16>,
    pub log: LogConfig,
}

impl BotConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (env-var name to value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = WizardConfig::default();

        let telegram = var("TELEGRAM_BOT_TOKEN").map(|token| TelegramConfig {
            bot_token: SecretString::from(token),
            allowed_users: parse_list(&var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|| "*".into())),
        });

        let wizard = WizardConfig {
            assets_dir: var("WIZARD_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            steps_path: var("WIZARD_STEPS_PATH").map(PathBuf::from),
            texts_path: var("WIZARD_TEXTS_PATH").map(PathBuf::from),
            scratch_dir: var("WIZARD_SCRATCH_DIR").map(PathBuf::from),
            session_idle_timeout: match var("WIZARD_SESSION_IDLE_SECS") {
                Some(raw) => Duration::from_secs(parse_number("WIZARD_SESSION_IDLE_SECS", &raw)?),
                None => defaults.session_idle_timeout,
            },
            sweep_interval: match var("WIZARD_SWEEP_INTERVAL_SECS") {
                Some(raw) => {
                    Duration::from_secs(parse_number::<u64>("WIZARD_SWEEP_INTERVAL_SECS", &raw)?.max(1))
                }
                None => defaults.sweep_interval,
            },
            cli_out_dir: var("WIZARD_CLI_OUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cli_out_dir),
        };

        let status_port = var("WIZARD_STATUS_PORT")
            .map(|raw| parse_number("WIZARD_STATUS_PORT", &raw))
            .transpose()?;

        Ok(Self {
            telegram,
            wizard,
            db_path: var("WIZARD_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/postcard-bot.db")),
            status_port,
            log: LogConfig {
                level: var("BOT_LOG_LEVEL").unwrap_or_else(|| "info".into()),
                file: var("BOT_LOG_FILE").map(PathBuf::from),
            },
        })
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
