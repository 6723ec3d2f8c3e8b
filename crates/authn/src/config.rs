//! Service configuration.
//!
//! [`Config`] is built either with its validating builder or from the
//! process environment via [`Config::from_env`]. Secrets (the database
//! encryption key and the static signing key) are never serialized.
//!
//! # Environment
//!
//! | Variable | Format | Default |
//! |----------|--------|---------|
//! | `ACCESS_TOKEN_TTL` | seconds | 3600 |
//! | `REFRESH_TOKEN_TTL` | seconds | 2592000 (30 days) |
//! | `DB_ENCRYPTION_KEY` | 64 hex chars | unset (blobs stored unencrypted) |
//! | `IDENTITY_SIGNING_KEY` | base64url Ed25519 seed | unset (keys rotate) |
//! | `KEY_RETENTION_DEPTH` | integer ≥ 2 | 3 |
//! | `DAILY_ACTIVES_RETENTION` | days | 365 |
//! | `WEEKLY_ACTIVES_RETENTION` | weeks | 104 |
//! | `MONTHLY_ACTIVES_RETENTION` | months | 60 |
//! | `TIME_ZONE_OFFSET` | `+HH:MM` | `+00:00` |

use std::{fmt, str::FromStr, time::Duration};

use chrono::{FixedOffset, Offset, Utc};
use keyward_storage::{ActivesRetention, ConfigError, MASTER_KEY_LEN, Zeroizing};
use serde::{Deserialize, Serialize};

use crate::signing_key::SigningKey;

/// Default access-token TTL (1 hour).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3_600);

/// Default refresh-token TTL (30 days).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3_600);

/// Default number of signing keys kept for verification.
pub const DEFAULT_KEY_RETENTION_DEPTH: usize = 3;

/// Smallest accepted token TTL.
pub const MIN_TOKEN_TTL: Duration = Duration::from_secs(2);

/// Smallest accepted key retention depth.
pub const MIN_KEY_RETENTION_DEPTH: usize = 2;

const ACCESS_TOKEN_TTL: &str = "ACCESS_TOKEN_TTL";
const REFRESH_TOKEN_TTL: &str = "REFRESH_TOKEN_TTL";
const DB_ENCRYPTION_KEY: &str = "DB_ENCRYPTION_KEY";
const IDENTITY_SIGNING_KEY: &str = "IDENTITY_SIGNING_KEY";
const KEY_RETENTION_DEPTH: &str = "KEY_RETENTION_DEPTH";
const DAILY_ACTIVES_RETENTION: &str = "DAILY_ACTIVES_RETENTION";
const WEEKLY_ACTIVES_RETENTION: &str = "WEEKLY_ACTIVES_RETENTION";
const MONTHLY_ACTIVES_RETENTION: &str = "MONTHLY_ACTIVES_RETENTION";
const TIME_ZONE_OFFSET: &str = "TIME_ZONE_OFFSET";

/// Configuration for [`App`](crate::App).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use keyward_authn::Config;
///
/// let config = Config::builder()
///     .access_token_ttl(Duration::from_secs(900))
///     .key_retention_depth(4)
///     .build()?;
///
/// assert_eq!(config.rotation_interval(), Duration::from_secs(450));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Lifetime of identity tokens. Half of it is the key rotation interval.
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    pub(crate) access_token_ttl: Duration,

    /// Lifetime of refresh tokens.
    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    pub(crate) refresh_token_ttl: Duration,

    /// Number of signing keys kept for verification.
    #[serde(default = "default_key_retention_depth")]
    pub(crate) key_retention_depth: usize,

    /// Daily activity buckets kept.
    #[serde(default = "default_daily_actives_retention")]
    pub(crate) daily_actives_retention: u32,

    /// Weekly activity buckets kept.
    #[serde(default = "default_weekly_actives_retention")]
    pub(crate) weekly_actives_retention: u32,

    /// Monthly activity buckets kept.
    #[serde(default = "default_monthly_actives_retention")]
    pub(crate) monthly_actives_retention: u32,

    /// Offset in which activity buckets are cut.
    #[serde(with = "offset_serde", default = "utc_offset")]
    pub(crate) time_zone: FixedOffset,

    /// AES-256 key for blobs at rest.
    #[serde(skip)]
    pub(crate) db_encryption_key: Option<Zeroizing<[u8; MASTER_KEY_LEN]>>,

    /// Operator-supplied signing key that disables rotation.
    #[serde(skip)]
    pub(crate) identity_signing_key: Option<SigningKey>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("key_retention_depth", &self.key_retention_depth)
            .field("daily_actives_retention", &self.daily_actives_retention)
            .field("weekly_actives_retention", &self.weekly_actives_retention)
            .field("monthly_actives_retention", &self.monthly_actives_retention)
            .field("time_zone", &self.time_zone)
            .field("db_encryption_key", &self.db_encryption_key.as_ref().map(|_| "<redacted>"))
            .field("identity_signing_key", &self.identity_signing_key.as_ref().map(SigningKey::kid))
            .finish()
    }
}

fn default_access_token_ttl() -> Duration {
    DEFAULT_ACCESS_TOKEN_TTL
}

fn default_refresh_token_ttl() -> Duration {
    DEFAULT_REFRESH_TOKEN_TTL
}

fn default_key_retention_depth() -> usize {
    DEFAULT_KEY_RETENTION_DEPTH
}

fn default_daily_actives_retention() -> u32 {
    ActivesRetention::default().days
}

fn default_weekly_actives_retention() -> u32 {
    ActivesRetention::default().weeks
}

fn default_monthly_actives_retention() -> u32 {
    ActivesRetention::default().months
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

mod offset_serde {
    use std::str::FromStr;

    use chrono::FixedOffset;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer>(
        offset: &FixedOffset,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(offset)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FixedOffset, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FixedOffset::from_str(&raw).map_err(D::Error::custom)
    }
}

#[bon::bon]
impl Config {
    /// Creates a new configuration, validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if a TTL is shorter than
    /// [`MIN_TOKEN_TTL`], the retention depth is below
    /// [`MIN_KEY_RETENTION_DEPTH`], or an actives retention is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_ACCESS_TOKEN_TTL)] access_token_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_TTL)] refresh_token_ttl: Duration,
        #[builder(default = DEFAULT_KEY_RETENTION_DEPTH)] key_retention_depth: usize,
        #[builder(default = default_daily_actives_retention())] daily_actives_retention: u32,
        #[builder(default = default_weekly_actives_retention())] weekly_actives_retention: u32,
        #[builder(default = default_monthly_actives_retention())] monthly_actives_retention: u32,
        #[builder(default = utc_offset())] time_zone: FixedOffset,
        db_encryption_key: Option<Zeroizing<[u8; MASTER_KEY_LEN]>>,
        identity_signing_key: Option<SigningKey>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            access_token_ttl,
            refresh_token_ttl,
            key_retention_depth,
            daily_actives_retention,
            weekly_actives_retention,
            monthly_actives_retention,
            time_zone,
            db_encryption_key,
            identity_signing_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a malformed variable and the
    /// builder's validation errors otherwise.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let signing_key = match lookup(IDENTITY_SIGNING_KEY) {
            Some(raw) => {
                let raw = Zeroizing::new(raw);
                Some(SigningKey::from_encoded_seed(&raw).map_err(|e| ConfigError::Invalid {
                    field: IDENTITY_SIGNING_KEY,
                    reason: e.to_string(),
                })?)
            },
            None => None,
        };

        Self::builder()
            .maybe_access_token_ttl(parse_secs(&lookup, ACCESS_TOKEN_TTL)?)
            .maybe_refresh_token_ttl(parse_secs(&lookup, REFRESH_TOKEN_TTL)?)
            .maybe_key_retention_depth(parse(&lookup, KEY_RETENTION_DEPTH)?)
            .maybe_daily_actives_retention(parse(&lookup, DAILY_ACTIVES_RETENTION)?)
            .maybe_weekly_actives_retention(parse(&lookup, WEEKLY_ACTIVES_RETENTION)?)
            .maybe_monthly_actives_retention(parse(&lookup, MONTHLY_ACTIVES_RETENTION)?)
            .maybe_time_zone(parse(&lookup, TIME_ZONE_OFFSET)?)
            .maybe_db_encryption_key(parse_master_key(&lookup)?)
            .maybe_identity_signing_key(signing_key)
            .build()
    }

    /// Checks every field against its minimum.
    ///
    /// Deserialized configurations skip the builder, so [`App::new`] calls
    /// this again.
    ///
    /// [`App::new`]: crate::App::new
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, ttl) in [
            ("access_token_ttl", self.access_token_ttl),
            ("refresh_token_ttl", self.refresh_token_ttl),
        ] {
            if ttl < MIN_TOKEN_TTL {
                return Err(ConfigError::BelowMinimum {
                    field,
                    value: format!("{ttl:?}"),
                    min: format!("{MIN_TOKEN_TTL:?}"),
                });
            }
        }

        if self.key_retention_depth < MIN_KEY_RETENTION_DEPTH {
            return Err(ConfigError::BelowMinimum {
                field: "key_retention_depth",
                value: self.key_retention_depth.to_string(),
                min: MIN_KEY_RETENTION_DEPTH.to_string(),
            });
        }

        for (field, buckets) in [
            ("daily_actives_retention", self.daily_actives_retention),
            ("weekly_actives_retention", self.weekly_actives_retention),
            ("monthly_actives_retention", self.monthly_actives_retention),
        ] {
            if buckets == 0 {
                return Err(ConfigError::BelowMinimum {
                    field,
                    value: "0".to_owned(),
                    min: "1".to_owned(),
                });
            }
        }

        Ok(())
    }

    /// Returns the identity-token TTL.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Returns the refresh-token TTL.
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Returns the number of signing keys kept for verification.
    #[must_use]
    pub fn key_retention_depth(&self) -> usize {
        self.key_retention_depth
    }

    /// Returns the key rotation interval: half the access-token TTL.
    #[must_use]
    pub fn rotation_interval(&self) -> Duration {
        self.access_token_ttl / 2
    }

    /// Returns the activity bucket retention.
    #[must_use]
    pub fn actives_retention(&self) -> ActivesRetention {
        ActivesRetention {
            days: self.daily_actives_retention,
            weeks: self.weekly_actives_retention,
            months: self.monthly_actives_retention,
        }
    }

    /// Returns the statistics time zone.
    #[must_use]
    pub fn time_zone(&self) -> FixedOffset {
        self.time_zone
    }

    /// Returns the blob encryption key, if configured.
    #[must_use]
    pub fn db_encryption_key(&self) -> Option<&Zeroizing<[u8; MASTER_KEY_LEN]>> {
        self.db_encryption_key.as_ref()
    }

    /// Returns the static signing key, if configured.
    #[must_use]
    pub fn identity_signing_key(&self) -> Option<&SigningKey> {
        self.identity_signing_key.as_ref()
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    field: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(field)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::Invalid { field, reason: e.to_string() })
        })
        .transpose()
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    field: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, field)?.map(Duration::from_secs))
}

fn parse_master_key(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Zeroizing<[u8; MASTER_KEY_LEN]>>, ConfigError> {
    let Some(raw) = lookup(DB_ENCRYPTION_KEY).map(Zeroizing::new) else {
        return Ok(None);
    };
    let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    hex::decode_to_slice(raw.trim(), key.as_mut_slice()).map_err(|e| ConfigError::Invalid {
        field: DB_ENCRYPTION_KEY,
        reason: format!("expected {} hex characters: {e}", MASTER_KEY_LEN * 2),
    })?;
    Ok(Some(key))
}
