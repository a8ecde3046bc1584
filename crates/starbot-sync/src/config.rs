use secrecy::SecretString;
use thiserror::Error;

use crate::reconcile::RolePolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),
    #[error("setting {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub database_url: String,
    pub discord_token: SecretString,
    /// Hex-encoded Ed25519 key used to verify interaction requests.
    pub discord_public_key: String,
    pub guild_id: u64,
    pub role_id: u64,
    /// Forum receiving daily puzzle posts; `None` disables announcements.
    pub announce_forum_id: Option<u64>,
    pub leaderboard_id: String,
    pub aoc_session: SecretString,
    pub leaderboard_invite: String,
    pub aoc_year: Option<i32>,
    pub event_month: u32,
    pub event_last_day: u32,
    pub announce_hour_utc: u32,
    pub aoc_base_url: String,
    pub discord_api_base: String,
    pub role_policy: RolePolicy,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub web_port: u16,
    pub scheduler_enabled: bool,
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed<T: std::str::FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn optional<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => parsed(key, raw).map(Some),
        None => Ok(None),
    }
}

fn parse_flag(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.as_str() {
        "1" | "true" | "TRUE" | "True" | "yes" => Ok(true),
        "0" | "false" | "FALSE" | "False" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let event_month = optional(&lookup, "EVENT_MONTH")?.unwrap_or(12u32);
        if !(1..=12).contains(&event_month) {
            return Err(ConfigError::Invalid {
                key: "EVENT_MONTH",
                value: event_month.to_string(),
            });
        }
        let event_last_day = optional(&lookup, "EVENT_LAST_DAY")?.unwrap_or(25u32);
        if !(1..=31).contains(&event_last_day) {
            return Err(ConfigError::Invalid {
                key: "EVENT_LAST_DAY",
                value: event_last_day.to_string(),
            });
        }
        let announce_hour_utc = optional(&lookup, "ANNOUNCE_HOUR_UTC")?.unwrap_or(5u32);
        if announce_hour_utc > 23 {
            return Err(ConfigError::Invalid {
                key: "ANNOUNCE_HOUR_UTC",
                value: announce_hour_utc.to_string(),
            });
        }
        let role_policy = match lookup("STARBOT_ROLE_POLICY") {
            Some(raw) => RolePolicy::parse(raw.trim()).ok_or(ConfigError::Invalid {
                key: "STARBOT_ROLE_POLICY",
                value: raw,
            })?,
            None => RolePolicy::default(),
        };
        let scheduler_enabled = match lookup("STARBOT_SCHEDULER_ENABLED") {
            Some(raw) => parse_flag("STARBOT_SCHEDULER_ENABLED", raw)?,
            None => true,
        };

        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            discord_token: SecretString::from(required(&lookup, "DISCORD_TOKEN")?),
            discord_public_key: required(&lookup, "DISCORD_PUBLIC_KEY")?,
            guild_id: parsed("GUILD_ID", required(&lookup, "GUILD_ID")?)?,
            role_id: parsed("AOC_ROLE_ID", required(&lookup, "AOC_ROLE_ID")?)?,
            announce_forum_id: optional(&lookup, "ANNOUNCE_FORUM_ID")?,
            leaderboard_id: required(&lookup, "LEADERBOARD_ID")?,
            aoc_session: SecretString::from(required(&lookup, "AOC_SESSION")?),
            leaderboard_invite: required(&lookup, "LEADERBOARD_INVITE")?,
            aoc_year: optional(&lookup, "AOC_YEAR")?,
            event_month,
            event_last_day,
            announce_hour_utc,
            aoc_base_url: lookup("AOC_BASE_URL")
                .unwrap_or_else(|| "https://adventofcode.com".to_string()),
            discord_api_base: lookup("DISCORD_API_BASE")
                .unwrap_or_else(|| "https://discord.com/api/v10".to_string()),
            role_policy,
            http_timeout_secs: optional(&lookup, "STARBOT_HTTP_TIMEOUT_SECS")?.unwrap_or(20),
            user_agent: lookup("STARBOT_USER_AGENT").unwrap_or_else(|| {
                format!("starbot/{} (+leaderboard sync bot)", env!("CARGO_PKG_VERSION"))
            }),
            web_port: optional(&lookup, "STARBOT_WEB_PORT")?.unwrap_or(8000),
            scheduler_enabled,
        })
    }
}
