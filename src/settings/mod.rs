//! Settings of the backup download supplied by the configuration collaborator.
//!
//! The core only reads [BackupSettings] and writes back a single field,
//! [`last_backup_time`](BackupSettings::last_backup_time), through a [SettingsStore].

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDateTime, TimeDelta};
use derive_more::{Display, Error, From};

pub mod store;

pub use store::TomlSettingsStore;

/// Source and sink of the [BackupSettings].
///
/// Settings are loaded once at the start of every invocation and are passed
/// explicitly to every component from there on.
pub trait SettingsStore {
    /// Load the current settings.
    fn load(&self) -> Result<BackupSettings, ConfigError>;

    /// Persist the time of the last successful backup.
    ///
    /// Implementations must never move the stored value backwards.
    fn store_last_backup_time(&mut self, at: NaiveDateTime) -> Result<(), ConfigError>;
}

/// Settings of the remote site to download backups from.
#[derive(Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackupSettings {
    /// Base url of the remote site, e.g. `https://erp.example.com`.
    pub remote_url: String,

    /// API key of the user on the remote site.
    pub api_key: String,

    /// API secret of the user on the remote site.
    pub api_secret: String,

    /// Retention cap: how many backup sets to keep on disk.
    #[serde(default = "default_max_backup_sets")]
    pub max_backup_sets: usize,

    /// Minimal time between two backups.
    #[serde(default)]
    pub download_interval: DownloadInterval,

    /// Time of the last successful backup in local time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp"
    )]
    pub last_backup_time: Option<NaiveDateTime>,
}

fn default_max_backup_sets() -> usize {
    3
}

// api_secret must not end up in logs
impl fmt::Debug for BackupSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSettings")
            .field("remote_url", &self.remote_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("max_backup_sets", &self.max_backup_sets)
            .field("download_interval", &self.download_interval)
            .field("last_backup_time", &self.last_backup_time)
            .finish()
    }
}

impl BackupSettings {
    /// Settings written as a starting point if no settings exist yet.
    pub fn template() -> Self {
        Self {
            remote_url: "https://erp.example.com".into(),
            api_key: String::new(),
            api_secret: String::new(),
            max_backup_sets: default_max_backup_sets(),
            download_interval: DownloadInterval::default(),
            last_backup_time: None,
        }
    }

    /// Checks the invariants the core relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.remote_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "remote_url must be an http(s) url: {url:?}"
            )));
        }
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "api_key and api_secret must be set".into(),
            ));
        }
        if self.max_backup_sets == 0 {
            return Err(ConfigError::Invalid(
                "max_backup_sets must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Errors of the configuration collaborator.
#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    /// No settings exist.
    #[display("No settings found at {}", _0.display())]
    Missing(#[error(ignore)] PathBuf),
    /// Settings exist but can't be read.
    #[display("Unable to read settings: {_0}")]
    Unreadable(io::Error),
    /// Settings aren't valid TOML or miss required fields.
    #[display("Settings are malformed: {_0}")]
    #[from]
    Malformed(toml::de::Error),
    /// Settings violate an invariant.
    #[display("Settings are invalid: {_0}")]
    Invalid(#[error(ignore)] String),
    /// Settings can't be serialized.
    #[display("Unable to serialize settings: {_0}")]
    #[from]
    Serialize(toml::ser::Error),
    /// Settings can't be written back.
    #[display("Unable to write settings: {_0}")]
    Unwritable(io::Error),
}

/// Minimal time between two backups.
///
/// The labels are the ones used by the settings of the remote site.
#[derive(Copy, Clone, Debug, Default, Display, PartialEq, Eq, serde::Serialize)]
pub enum DownloadInterval {
    #[default]
    #[display("1 Hour")]
    #[serde(rename = "1 Hour")]
    OneHour,
    #[display("2 Hour")]
    #[serde(rename = "2 Hour")]
    TwoHours,
    #[display("4 Hour")]
    #[serde(rename = "4 Hour")]
    FourHours,
    #[display("6 Hour")]
    #[serde(rename = "6 Hour")]
    SixHours,
    #[display("8 Hour")]
    #[serde(rename = "8 Hour")]
    EightHours,
    #[display("12 Hour")]
    #[serde(rename = "12 Hour")]
    TwelveHours,
    #[display("1 Day")]
    #[serde(rename = "1 Day")]
    OneDay,
    #[display("1 Week")]
    #[serde(rename = "1 Week")]
    OneWeek,
    /// Fixed 30 days, not a calendar month.
    #[display("1 Month")]
    #[serde(rename = "1 Month")]
    OneMonth,
}

impl DownloadInterval {
    /// All intervals in ascending order.
    pub const ALL: [DownloadInterval; 9] = [
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Length of the interval in seconds.
    pub fn seconds(self) -> i64 {
        const HOUR: i64 = 60 * 60;
        const DAY: i64 = 24 * HOUR;

        match self {
            Self::OneHour => HOUR,
            Self::TwoHours => 2 * HOUR,
            Self::FourHours => 4 * HOUR,
            Self::SixHours => 6 * HOUR,
            Self::EightHours => 8 * HOUR,
            Self::TwelveHours => 12 * HOUR,
            Self::OneDay => DAY,
            Self::OneWeek => 7 * DAY,
            Self::OneMonth => 30 * DAY,
        }
    }

    pub fn duration(self) -> TimeDelta {
        TimeDelta::seconds(self.seconds())
    }

    /// Parses the label, falling back to the [default](Self::default) on unknown labels.
    pub fn parse_or_default(label: &str) -> Self {
        label.parse().unwrap_or_else(|e| {
            log::warn!(target: "settings", "{e}, falling back to {}", Self::default());
            Self::default()
        })
    }
}

/// Label of a [DownloadInterval] is unknown.
#[derive(Debug, Display, Error)]
#[display("Download interval is unknown: {_0}")]
pub struct UnknownInterval(#[error(ignore)] String);

impl FromStr for DownloadInterval {
    type Err = UnknownInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        Self::ALL
            .into_iter()
            .find(|interval| interval.to_string().eq_ignore_ascii_case(label))
            .ok_or_else(|| UnknownInterval(s.to_string()))
    }
}

impl<'de> serde::Deserialize<'de> for DownloadInterval {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::parse_or_default(&label))
    }
}

/// (De)serialization of [NaiveDateTime] in the format used by the remote site.
///
/// ISO-8601 (`2024-05-01T13:37:00`) is accepted as well.
mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
    const ACCEPTED: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => serializer.serialize_str(&at.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        ACCEPTED
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const SETTINGS: &str = r#"
remote_url = "https://erp.example.com"
api_key = "key"
api_secret = "secret"
max_backup_sets = 4
download_interval = "12 Hour"
last_backup_time = "2024-05-01 13:37:00.123456"
"#;

    #[test]
    fn interval_seconds_match_labels() {
        let expected = [
            ("1 Hour", 3600),
            ("2 Hour", 7200),
            ("4 Hour", 14400),
            ("6 Hour", 21600),
            ("8 Hour", 28800),
            ("12 Hour", 43200),
            ("1 Day", 86400),
            ("1 Week", 604800),
            ("1 Month", 2592000),
        ];
        for (label, seconds) in expected {
            let interval: DownloadInterval = label.parse().unwrap();
            assert_eq!(interval.seconds(), seconds, "{label}");
            assert_eq!(interval.to_string(), label);
        }
    }

    #[test]
    fn unknown_interval_defaults_to_one_hour() {
        assert!("3 Fortnights".parse::<DownloadInterval>().is_err());
        assert_eq!(
            DownloadInterval::parse_or_default("3 Fortnights"),
            DownloadInterval::OneHour
        );
        assert_eq!(DownloadInterval::default().seconds(), 3600);
    }

    #[test]
    fn parses_settings() {
        let settings: BackupSettings = toml::from_str(SETTINGS).unwrap();
        assert_eq!(settings.max_backup_sets, 4);
        assert_eq!(settings.download_interval, DownloadInterval::TwelveHours);
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_micro_opt(13, 37, 0, 123_456)
            .unwrap();
        assert_eq!(settings.last_backup_time, Some(expected));
        settings.validate().unwrap();
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let settings: BackupSettings = toml::from_str(
            r#"
remote_url = "https://erp.example.com"
api_key = "key"
api_secret = "secret"
download_interval = "every now and then"
"#,
        )
        .unwrap();
        assert_eq!(settings.max_backup_sets, 3);
        assert_eq!(settings.download_interval, DownloadInterval::OneHour);
        assert_eq!(settings.last_backup_time, None);
    }

    #[test]
    fn accepts_iso_timestamps() {
        let settings: BackupSettings = toml::from_str(&SETTINGS.replace(
            "2024-05-01 13:37:00.123456",
            "2024-05-01T13:37:00",
        ))
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(13, 37, 0)
            .unwrap();
        assert_eq!(settings.last_backup_time, Some(expected));
    }

    #[test]
    fn timestamp_survives_serialization() {
        let settings: BackupSettings = toml::from_str(SETTINGS).unwrap();
        let serialized = toml::to_string_pretty(&settings).unwrap();
        assert!(serialized.contains("2024-05-01 13:37:00.123456"));
        let reparsed: BackupSettings = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed, settings);
    }

    #[test]
    fn rejects_zero_retention_cap() {
        let mut settings: BackupSettings = toml::from_str(SETTINGS).unwrap();
        settings.max_backup_sets = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn template_needs_credentials() {
        assert!(matches!(
            BackupSettings::template().validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let settings: BackupSettings = toml::from_str(SETTINGS).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("<redacted>"));
    }
}
