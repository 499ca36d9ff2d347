// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use crate::errors::ConfigError;
use chrono_tz::Tz;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_WAITING_TIMES_URL: &str = "http://m.stib.be/api/getwaitingtimes.php?halt={halt}";

/// Display-only alias: real-time feeds number night lines differently from
/// the network feed, so colours are looked up under the canonical prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NightLineAlias {
    pub prefix: String,
    pub canonical_prefix: String,
}

impl Default for NightLineAlias {
    fn default() -> Self {
        NightLineAlias {
            prefix: String::from("N"),
            canonical_prefix: String::from("Noctis "),
        }
    }
}

impl NightLineAlias {
    pub fn canonical(&self, line_id: &str) -> Option<String> {
        line_id
            .strip_prefix(self.prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .map(|rest| format!("{}{}", self.canonical_prefix, rest))
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// `{halt}` is replaced with the source id.
    pub waiting_times_url: String,
    pub network_url: Option<String>,
    pub geometry_url: Option<String>,
    pub max_attempts: usize,
    pub default_attempts: usize,
    pub per_attempt_timeout: Duration,
    pub retry_delay: Duration,
    pub max_nclosest: usize,
    pub default_total_requests: usize,
    pub max_batch_stops: usize,
    pub max_fan_out: usize,
    pub timezone: Tz,
    pub night_line_alias: NightLineAlias,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            waiting_times_url: String::from(DEFAULT_WAITING_TIMES_URL),
            network_url: None,
            geometry_url: None,
            max_attempts: 5,
            default_attempts: 1,
            per_attempt_timeout: Duration::from_millis(5_000),
            retry_delay: Duration::ZERO,
            max_nclosest: 10,
            default_total_requests: 32,
            max_batch_stops: 32,
            max_fan_out: 16,
            timezone: chrono_tz::Europe::Brussels,
            night_line_alias: NightLineAlias::default(),
        }
    }
}

impl EngineConfig {
    /// Reads `.env` if present, then the process environment.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = EngineConfig::default();

        if let Ok(url) = std::env::var("WAITING_TIMES_URL") {
            config.waiting_times_url = url;
        }
        config.network_url = std::env::var("NETWORK_URL").ok();
        config.geometry_url = std::env::var("GEOMETRY_URL").ok();

        config.max_attempts = parse_var("MAX_ATTEMPTS", config.max_attempts)?;
        config.default_attempts = parse_var("DEFAULT_ATTEMPTS", config.default_attempts)?;
        config.per_attempt_timeout = Duration::from_millis(parse_var(
            "PER_ATTEMPT_TIMEOUT_MS",
            config.per_attempt_timeout.as_millis() as u64,
        )?);
        config.retry_delay = Duration::from_millis(parse_var(
            "RETRY_DELAY_MS",
            config.retry_delay.as_millis() as u64,
        )?);
        config.max_nclosest = parse_var("MAX_NCLOSEST", config.max_nclosest)?;
        config.default_total_requests =
            parse_var("MAX_TOTAL_REQUESTS", config.default_total_requests)?;
        config.max_batch_stops = parse_var("MAX_BATCH_STOPS", config.max_batch_stops)?;
        config.max_fan_out = parse_var("MAX_FAN_OUT", config.max_fan_out)?;

        if let Ok(tz) = std::env::var("STIB_TIMEZONE") {
            config.timezone = Tz::from_str(&tz).map_err(|_| ConfigError::Timezone(tz))?;
        }

        if let Ok(prefix) = std::env::var("NIGHT_LINE_PREFIX") {
            config.night_line_alias.prefix = prefix;
        }
        if let Ok(canonical_prefix) = std::env::var("NIGHT_LINE_CANONICAL_PREFIX") {
            config.night_line_alias.canonical_prefix = canonical_prefix;
        }

        config.validate()?;

        Ok(config)
    }

    /// Rejects limits the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("MAX_ATTEMPTS", self.max_attempts),
            ("DEFAULT_ATTEMPTS", self.default_attempts),
            ("MAX_NCLOSEST", self.max_nclosest),
            ("MAX_TOTAL_REQUESTS", self.default_total_requests),
            ("MAX_BATCH_STOPS", self.max_batch_stops),
            ("MAX_FAN_OUT", self.max_fan_out),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Inconsistent {
                name: *name,
                reason: "must be at least 1",
            });
        }

        if self.default_attempts > self.max_attempts {
            return Err(ConfigError::Inconsistent {
                name: "DEFAULT_ATTEMPTS",
                reason: "must not exceed MAX_ATTEMPTS",
            });
        }

        if self.per_attempt_timeout.is_zero() {
            return Err(ConfigError::Inconsistent {
                name: "PER_ATTEMPT_TIMEOUT_MS",
                reason: "must be at least 1",
            });
        }

        Ok(())
    }

    pub fn waiting_times_url_for(&self, source: &str) -> String {
        self.waiting_times_url.replace("{halt}", source)
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidVar { name, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_template() {
        let config = EngineConfig::default();
        assert_eq!(
            config.waiting_times_url_for("8042"),
            "http://m.stib.be/api/getwaitingtimes.php?halt=8042"
        );
    }

    #[test]
    fn defaults_are_consistent() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unusable_limits() {
        let reject = |config: EngineConfig, expected: &str| match config.validate() {
            Err(ConfigError::Inconsistent { name, .. }) => assert_eq!(name, expected),
            other => panic!("expected {} to be rejected, got {:?}", expected, other),
        };

        reject(
            EngineConfig {
                default_attempts: 6,
                ..EngineConfig::default()
            },
            "DEFAULT_ATTEMPTS",
        );
        reject(
            EngineConfig {
                default_attempts: 0,
                ..EngineConfig::default()
            },
            "DEFAULT_ATTEMPTS",
        );
        reject(
            EngineConfig {
                per_attempt_timeout: Duration::ZERO,
                ..EngineConfig::default()
            },
            "PER_ATTEMPT_TIMEOUT_MS",
        );
        reject(
            EngineConfig {
                max_fan_out: 0,
                ..EngineConfig::default()
            },
            "MAX_FAN_OUT",
        );

        // equal defaults and maximum are fine
        assert!(
            EngineConfig {
                default_attempts: 5,
                ..EngineConfig::default()
            }
            .validate()
            .is_ok()
        );
    }

    #[test]
    fn night_alias() {
        let alias = NightLineAlias::default();
        assert_eq!(alias.canonical("N04"), Some(String::from("Noctis 04")));
        assert_eq!(alias.canonical("N"), None);
        assert_eq!(alias.canonical("92"), None);
    }
}
