//! Configuration, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::RetryPolicy;
use crate::error::ConfigError;

/// Which chat channel the bot runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Telegram,
    Cli,
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "cli" => Ok(Self::Cli),
            other => Err(format!("unknown channel '{other}' (expected telegram or cli)")),
        }
    }
}

/// How verdicts reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Receive verdict ids, one per line.
    Subscribe,
    /// Legacy request/reply liveness endpoint.
    Reply,
    Off,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subscribe" => Ok(Self::Subscribe),
            "reply" => Ok(Self::Reply),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!(
                "unknown relay mode '{other}' (expected subscribe, reply or off)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub addr: String,
    /// Subscribe mode connects to a publisher instead of binding.
    pub connect: bool,
    pub reply_delay: Duration,
}

#[derive(Debug)]
pub struct BotConfig {
    pub channel: ChannelKind,
    pub telegram_token: Option<SecretString>,
    pub db_path: PathBuf,
    /// Replaces the built-in questionnaire when set.
    pub questionnaire_path: Option<PathBuf>,
    pub relay: RelayConfig,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
    pub outbox_retry: Duration,
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let channel: ChannelKind = parse(&get, "INTAKE_CHANNEL", ChannelKind::Telegram)?;
        let telegram_token = get("TELEGRAM_BOT_TOKEN").map(SecretString::from);
        if channel == ChannelKind::Telegram && telegram_token.is_none() {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()));
        }

        let relay = RelayConfig {
            mode: parse(&get, "INTAKE_RELAY_MODE", RelayMode::Subscribe)?,
            addr: get("INTAKE_RELAY_ADDR").unwrap_or_else(|| "127.0.0.1:5555".to_string()),
            connect: parse(&get, "INTAKE_RELAY_CONNECT", false)?,
            reply_delay: Duration::from_secs(parse(&get, "INTAKE_RELAY_REPLY_DELAY_SECS", 10)?),
        };

        let max_attempts: u32 = parse(&get, "INTAKE_SEND_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INTAKE_SEND_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(parse(&get, "INTAKE_SEND_BASE_DELAY_MS", 500)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            channel,
            telegram_token,
            db_path: get("INTAKE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/intake.db")),
            questionnaire_path: get("INTAKE_QUESTIONNAIRE_PATH").map(PathBuf::from),
            relay,
            idle_timeout: Duration::from_secs(parse(&get, "INTAKE_IDLE_TIMEOUT_SECS", 86_400)?),
            sweep_interval: positive_secs(&get, "INTAKE_SWEEP_INTERVAL_SECS", 300)?,
            retry,
            outbox_retry: positive_secs(&get, "INTAKE_OUTBOX_RETRY_SECS", 30)?,
            log_dir: get("INTAKE_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Interval periods feed `tokio::time::interval`, which rejects zero.
fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse(get, key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
