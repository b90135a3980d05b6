//! Ingestor Configuration Settings
//!
//! Configuration types for the ingestor, loaded from environment variables.

use std::time::Duration;

use chrono_tz::Tz;

use crate::application::ports::FeedCredentials;
use crate::application::services::{IngestMode, SupervisorSettings};
use crate::domain::schedule::MarketHours;

/// Remote store connection settings.
#[derive(Clone)]
pub struct StoreSettings {
    /// Base URL of the store project (no trailing `/rest/v1`).
    pub base_url: String,
    api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Pause between consecutive upserts.
    pub pacing: Duration,
}

impl StoreSettings {
    /// Create store settings.
    #[must_use]
    pub const fn new(base_url: String, api_key: String, timeout: Duration, pacing: Duration) -> Self {
        Self {
            base_url,
            api_key,
            timeout,
            pacing,
        }
    }

    /// API key sent with every request.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("pacing", &self.pacing)
            .finish()
    }
}

/// Feed gateway settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Base URL of the feed gateway.
    pub gateway_url: String,
    /// Long-poll wait the gateway may hold an events request for.
    pub events_wait: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            gateway_url: "http://127.0.0.1:8700".to_string(),
            events_wait: Duration::from_secs(5),
        }
    }
}

/// Complete ingestor configuration.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Remote store.
    pub store: StoreSettings,
    /// Feed login identity.
    pub credentials: FeedCredentials,
    /// Feed gateway.
    pub feed: FeedSettings,
    /// Cycle collection mode.
    pub mode: IngestMode,
    /// Trading window.
    pub market_hours: MarketHours,
    /// Supervisor timing.
    pub supervisor: SupervisorSettings,
    /// Health server port (0 = disabled).
    pub health_port: u16,
}

/// Default trading window (Buenos Aires, 11:00-17:00).
const DEFAULT_TIMEZONE: &str = "America/Argentina/Buenos_Aires";
const DEFAULT_OPEN_HOUR: u32 = 11;
const DEFAULT_CLOSE_HOUR: u32 = 17;
const DEFAULT_HEALTH_PORT: u16 = 8082;

impl IngestorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or if a
    /// value cannot be interpreted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`IngestorConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let base_url = env.required("SUPABASE_URL")?;
        let api_key = env.required("SUPABASE_API_KEY")?;
        let broker_id_raw = env.required("BROKER_ID")?;
        let broker_id = broker_id_raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::invalid("BROKER_ID", &broker_id_raw, "expected an integer"))?;
        let credentials = FeedCredentials::new(
            broker_id,
            env.required("BROKER_DNI")?,
            env.required("BROKER_USER")?,
            env.required("BROKER_PASSWORD")?,
        );

        let store = StoreSettings::new(
            base_url.trim_end_matches('/').to_string(),
            api_key,
            env.secs("STORE_TIMEOUT_SECS", Duration::from_secs(30)),
            env.millis("UPSERT_PACING_MS", Duration::ZERO),
        );

        let feed = FeedSettings {
            gateway_url: env
                .optional("FEED_GATEWAY_URL")
                .map_or_else(|| FeedSettings::default().gateway_url, |u| u.trim_end_matches('/').to_string()),
            events_wait: env.secs("FEED_EVENTS_WAIT_SECS", FeedSettings::default().events_wait),
        };

        let mode_raw = env.optional("INGEST_MODE").map(|m| m.trim().to_lowercase());
        let mode = match mode_raw.as_deref() {
            None | Some("push") => IngestMode::Push {
                window: env.secs("CYCLE_WINDOW_SECS", Duration::from_secs(60)),
                queue_capacity: env.parsed("FEED_QUEUE_CAPACITY", 256_usize),
            },
            Some("poll") => IngestMode::Poll {
                interval: env.secs("POLL_INTERVAL_SECS", Duration::from_secs(5)),
                settlement: env
                    .optional("POLL_SETTLEMENT")
                    .unwrap_or_else(|| "24hs".to_string()),
            },
            Some(other) => {
                return Err(ConfigError::invalid("INGEST_MODE", other, "expected push or poll"));
            }
        };

        let timezone_raw = env
            .optional("MARKET_TIMEZONE")
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone_raw
            .parse::<Tz>()
            .map_err(|_| ConfigError::invalid("MARKET_TIMEZONE", &timezone_raw, "unknown IANA timezone"))?;
        let open_hour = env.strict("MARKET_OPEN_HOUR", DEFAULT_OPEN_HOUR)?;
        let close_hour = env.strict("MARKET_CLOSE_HOUR", DEFAULT_CLOSE_HOUR)?;
        let market_hours = MarketHours::new(timezone, open_hour, close_hour).map_err(|e| {
            ConfigError::invalid(
                "MARKET_OPEN_HOUR/MARKET_CLOSE_HOUR",
                &format!("{open_hour}-{close_hour}"),
                &e.to_string(),
            )
        })?;

        let restart_after = env.secs("RESTART_AFTER_SECS", Duration::from_secs(3600));
        let supervisor = SupervisorSettings {
            recheck_interval: env.secs("GATE_RECHECK_SECS", SupervisorSettings::default().recheck_interval),
            restart_after: (!restart_after.is_zero()).then_some(restart_after),
        };

        Ok(Self {
            store,
            credentials,
            feed,
            mode,
            market_hours,
            supervisor,
            health_port: env.parsed("HEALTH_PORT", DEFAULT_HEALTH_PORT),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable cannot be interpreted.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// What was expected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Lenient parse: unparseable values fall back to the default.
    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.optional(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Strict parse: unparseable values are an error.
    fn strict<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.optional(key).map_or(Ok(default), |v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, &v, "expected an integer"))
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.optional(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REQUIRED: [(&str, &str); 6] = [
        ("SUPABASE_URL", "https://project.supabase.co/"),
        ("SUPABASE_API_KEY", "service-key"),
        ("BROKER_ID", "265"),
        ("BROKER_DNI", "20123456"),
        ("BROKER_USER", "trader"),
        ("BROKER_PASSWORD", "hunter2"),
    ];

    fn load(extra: &[(&str, &str)], without: &[&str]) -> Result<IngestorConfig, ConfigError> {
        let mut map: HashMap<&str, &str> = REQUIRED.into_iter().collect();
        for key in without {
            map.remove(key);
        }
        map.extend(extra.iter().copied());
        IngestorConfig::from_lookup(|key| map.get(key).map(ToString::to_string))
    }

    #[test]
    fn defaults_with_required_only() {
        let config = load(&[], &[]).unwrap();

        assert_eq!(config.store.base_url, "https://project.supabase.co");
        assert_eq!(config.store.api_key(), "service-key");
        assert_eq!(config.store.timeout, Duration::from_secs(30));
        assert_eq!(config.store.pacing, Duration::ZERO);
        assert_eq!(config.credentials.broker_id(), 265);
        assert_eq!(config.credentials.user(), "trader");
        assert_eq!(config.feed, FeedSettings::default());
        assert_eq!(
            config.mode,
            IngestMode::Push {
                window: Duration::from_secs(60),
                queue_capacity: 256
            }
        );
        assert_eq!(config.market_hours.open_hour(), 11);
        assert_eq!(config.market_hours.close_hour(), 17);
        assert_eq!(
            config.market_hours.timezone(),
            chrono_tz::America::Argentina::Buenos_Aires
        );
        assert_eq!(config.supervisor, SupervisorSettings::default());
        assert_eq!(config.health_port, 8082);
    }

    #[test]
    fn each_required_variable_is_enforced() {
        for (key, _) in REQUIRED {
            let err = load(&[], &[key]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::MissingEnvVar(k) if k == key),
                "{key}: {err}"
            );
        }
    }

    #[test]
    fn blank_required_variable_is_empty_value() {
        let err = load(&[("BROKER_PASSWORD", "  ")], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(k) if k == "BROKER_PASSWORD"));
    }

    #[test]
    fn non_numeric_broker_id_is_invalid() {
        let err = load(&[("BROKER_ID", "cocos")], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "BROKER_ID"));
    }

    #[test]
    fn poll_mode_settings() {
        let config = load(
            &[
                ("INGEST_MODE", "POLL"),
                ("POLL_INTERVAL_SECS", "2"),
                ("POLL_SETTLEMENT", "CI"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(
            config.mode,
            IngestMode::Poll {
                interval: Duration::from_secs(2),
                settlement: "CI".to_string()
            }
        );
    }

    #[test]
    fn unknown_mode_is_invalid() {
        let err = load(&[("INGEST_MODE", "stream")], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "INGEST_MODE"));
    }

    #[test]
    fn bad_timezone_and_hours_are_invalid() {
        assert!(matches!(
            load(&[("MARKET_TIMEZONE", "Mars/Olympus")], &[]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            load(&[("MARKET_OPEN_HOUR", "eleven")], &[]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            load(&[("MARKET_OPEN_HOUR", "18")], &[]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn zero_restart_budget_disables_restart() {
        let config = load(&[("RESTART_AFTER_SECS", "0")], &[]).unwrap();
        assert_eq!(config.supervisor.restart_after, None);
    }

    #[test]
    fn optional_numbers_fall_back_when_unparseable() {
        let config = load(&[("CYCLE_WINDOW_SECS", "soon"), ("HEALTH_PORT", "x")], &[]).unwrap();
        assert_eq!(
            config.mode,
            IngestMode::Push {
                window: Duration::from_secs(60),
                queue_capacity: 256
            }
        );
        assert_eq!(config.health_port, 8082);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let config = load(&[], &[]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("service-key"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("20123456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
