//! Core types for noise monitor data.

use core::fmt;
use core::str::FromStr;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::error::{ParseError, ParseResult};

/// Number of days readings are kept, which is also how far back a window may reach.
///
/// The retention sweep and the request validator both use this value; they
/// must never diverge.
pub const RETENTION_DAYS: i64 = 7;

/// Maximum length of a monitor identifier.
pub const MAX_MONITOR_ID_LEN: usize = 50;

/// Clock skew tolerated before a reading is rejected as future-dated.
pub const FUTURE_TOLERANCE_SECS: i64 = 60;

/// Length of the trailing window used by realtime requests.
pub const REALTIME_WINDOW: Duration = Duration::hours(1);

/// The retention horizon as a [`Duration`].
#[must_use]
pub fn retention_window() -> Duration {
    Duration::days(RETENTION_DAYS)
}

/// Identifier of a noise monitor.
///
/// The upstream API names monitors with dot-separated serials (`10.1.1.1`)
/// while storage uses underscores (`10_1_1_1`). A `MonitorId` always holds the
/// upstream form; parsing either form yields the same value.
///
/// # Examples
///
/// ```
/// use noise_types::MonitorId;
///
/// let id = MonitorId::parse("10.1.1.1").unwrap();
/// assert_eq!(id.storage_key(), "10_1_1_1");
/// assert_eq!(MonitorId::parse("10_1_1_1").unwrap(), id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonitorId(String);

impl MonitorId {
    /// Parse an identifier in either its upstream or storage encoding.
    pub fn parse(raw: &str) -> ParseResult<Self> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_MONITOR_ID_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
        if !valid {
            return Err(ParseError::InvalidMonitorId(raw.to_string()));
        }
        Ok(Self(trimmed.replace('_', ".")))
    }

    /// The upstream (dot-separated) form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The storage (underscore-separated) form.
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.0.replace('.', "_")
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MonitorId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MonitorId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MonitorId> for String {
    fn from(id: MonitorId) -> Self {
        id.0
    }
}

/// Operational status of a monitor in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// Listed by upstream at the last registry sync.
    Active,
    /// No longer listed by upstream.
    Inactive,
    /// Status was never recorded.
    #[default]
    Unknown,
}

impl MonitorStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Active => "active",
            MonitorStatus::Inactive => "inactive",
            MonitorStatus::Unknown => "unknown",
        }
    }

    /// Interpret a stored status column. Missing or unrecognized values read as `Unknown`.
    #[must_use]
    pub fn from_column(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("active") => MonitorStatus::Active,
            Some("inactive") => MonitorStatus::Inactive,
            _ => MonitorStatus::Unknown,
        }
    }

    /// Whether background refresh and retention apply to this monitor.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        !matches!(self, MonitorStatus::Inactive)
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the last sync attempt for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Synchronized,
    Failed,
}

impl SyncOutcome {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Synchronized => "synchronized",
            SyncOutcome::Failed => "failed",
        }
    }

    /// Interpret a stored sync status column.
    #[must_use]
    pub fn from_column(value: &str) -> Option<Self> {
        match value {
            "synchronized" => Some(SyncOutcome::Synchronized),
            "failed" => Some(SyncOutcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight acoustic metrics recorded per reading, in dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// A-weighted equivalent continuous level.
    pub laeq: f64,
    /// A-weighted level exceeded 10% of the time.
    pub la10: f64,
    /// A-weighted level exceeded 90% of the time.
    pub la90: f64,
    /// A-weighted maximum level (fast).
    pub lafmax: f64,
    /// C-weighted equivalent continuous level.
    pub lceq: f64,
    /// C-weighted maximum level (fast).
    pub lcfmax: f64,
    /// C-weighted level exceeded 10% of the time.
    pub lc10: f64,
    /// C-weighted level exceeded 90% of the time.
    pub lc90: f64,
}

/// A single reading from one monitor.
///
/// Serializes in the upstream wire shape:
/// `{"datetime": "2024-05-01 10:00:00", "laeq": 55.2, ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the reading was taken (UTC, second resolution).
    #[serde(rename = "datetime", with = "datetime")]
    pub timestamp: OffsetDateTime,
    /// Measured levels.
    #[serde(flatten)]
    pub metrics: Metrics,
}

impl Reading {
    /// Create a reading, truncating the timestamp to whole seconds.
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, metrics: Metrics) -> Self {
        let timestamp = OffsetDateTime::from_unix_timestamp(timestamp.unix_timestamp())
            .unwrap_or(timestamp);
        Self { timestamp, metrics }
    }
}

/// A loosely typed field as delivered by upstream or by save requests.
///
/// Upstream sends some metrics as JSON numbers and others as numeric strings.
/// Anything else is kept as `Invalid` so one bad field rejects only its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    #[serde(skip_serializing)]
    Invalid(IgnoredAny),
}

impl RawValue {
    fn describe(&self) -> String {
        match self {
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.clone(),
            RawValue::Invalid(_) => "<unsupported>".to_string(),
        }
    }

    /// Interpret the value as a finite number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RawValue::Number(n) => *n,
            RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
            RawValue::Invalid(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// An unvalidated reading record in wire shape.
///
/// Every field is optional at the decoding stage so that a single malformed
/// record inside a batch can be skipped instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingRecord {
    pub datetime: Option<RawValue>,
    pub laeq: Option<RawValue>,
    pub la10: Option<RawValue>,
    pub la90: Option<RawValue>,
    pub lafmax: Option<RawValue>,
    pub lceq: Option<RawValue>,
    pub lcfmax: Option<RawValue>,
    pub lc10: Option<RawValue>,
    pub lc90: Option<RawValue>,
}

impl ReadingRecord {
    /// Validate the record into a [`Reading`].
    ///
    /// Rejects missing or non-finite metrics, unparseable datetimes, and
    /// timestamps more than [`FUTURE_TOLERANCE_SECS`] after `now`.
    ///
    /// There is no lower bound: a reading older than its monitor's
    /// registration is accepted, since the record does not carry the monitor.
    pub fn to_reading(&self, now: OffsetDateTime) -> ParseResult<Reading> {
        let timestamp = match &self.datetime {
            None => return Err(ParseError::MissingField("datetime")),
            Some(RawValue::Text(s)) => parse_datetime(s)?,
            Some(RawValue::Number(n)) if n.is_finite() && n.fract() == 0.0 => {
                OffsetDateTime::from_unix_timestamp(*n as i64)
                    .map_err(|_| ParseError::InvalidDatetime(n.to_string()))?
            }
            Some(other) => return Err(ParseError::InvalidDatetime(other.describe())),
        };

        if timestamp.unix_timestamp() > now.unix_timestamp() + FUTURE_TOLERANCE_SECS {
            return Err(ParseError::FutureTimestamp(timestamp.unix_timestamp()));
        }

        let metrics = Metrics {
            laeq: metric("laeq", &self.laeq)?,
            la10: metric("la10", &self.la10)?,
            la90: metric("la90", &self.la90)?,
            lafmax: metric("lafmax", &self.lafmax)?,
            lceq: metric("lceq", &self.lceq)?,
            lcfmax: metric("lcfmax", &self.lcfmax)?,
            lc10: metric("lc10", &self.lc10)?,
            lc90: metric("lc90", &self.lc90)?,
        };

        Ok(Reading::new(timestamp, metrics))
    }
}

impl From<&Reading> for ReadingRecord {
    fn from(reading: &Reading) -> Self {
        let m = &reading.metrics;
        Self {
            datetime: Some(RawValue::Text(format_datetime(reading.timestamp))),
            laeq: Some(m.laeq.into()),
            la10: Some(m.la10.into()),
            la90: Some(m.la90.into()),
            lafmax: Some(m.lafmax.into()),
            lceq: Some(m.lceq.into()),
            lcfmax: Some(m.lcfmax.into()),
            lc10: Some(m.lc10.into()),
            lc90: Some(m.lc90.into()),
        }
    }
}

fn metric(name: &'static str, value: &Option<RawValue>) -> ParseResult<f64> {
    let value = value.as_ref().ok_or(ParseError::MissingField(name))?;
    value.as_f64().ok_or_else(|| ParseError::InvalidMetric {
        name,
        value: value.describe(),
    })
}

/// Validated readings extracted from a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Well-formed readings, ascending by timestamp, one per timestamp.
    pub readings: Vec<Reading>,
    /// Number of records that failed validation.
    pub rejected: usize,
}

/// Validate a batch of records.
///
/// When the same timestamp appears more than once, the later record wins,
/// matching the store's upsert semantics.
#[must_use]
pub fn normalize_records(records: &[ReadingRecord], now: OffsetDateTime) -> NormalizedBatch {
    let mut by_time = std::collections::BTreeMap::new();
    let mut rejected = 0;
    for record in records {
        match record.to_reading(now) {
            Ok(reading) => {
                by_time.insert(reading.timestamp.unix_timestamp(), reading);
            }
            Err(_) => rejected += 1,
        }
    }
    NormalizedBatch {
        readings: by_time.into_values().collect(),
        rejected,
    }
}

/// Monitor metadata as listed by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMonitor {
    /// Dot-separated serial used as the monitor id.
    pub serial_number: String,
    /// Human readable label, e.g. "Noise Monitor - Ballyfermot".
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl UpstreamMonitor {
    /// Whether this entry is a noise monitor (upstream also lists air quality sensors).
    #[must_use]
    pub fn is_noise_monitor(&self) -> bool {
        self.label.to_lowercase().contains("noise")
    }
}

/// Format a timestamp in the wire datetime form `YYYY-MM-DD HH:MM:SS` (UTC).
#[must_use]
pub fn format_datetime(timestamp: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

/// Parse a wire datetime.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` (interpreted as UTC) and RFC 3339. Sub-second
/// precision is truncated.
pub fn parse_datetime(value: &str) -> ParseResult<OffsetDateTime> {
    let value = value.trim();
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    let parsed = PrimitiveDateTime::parse(value, &format)
        .map(PrimitiveDateTime::assume_utc)
        .or_else(|_| OffsetDateTime::parse(value, &Rfc3339))
        .map_err(|_| ParseError::InvalidDatetime(value.to_string()))?;

    OffsetDateTime::from_unix_timestamp(parsed.unix_timestamp())
        .map_err(|_| ParseError::InvalidDatetime(value.to_string()))
}

/// Serde adapter for the wire datetime form.
pub mod datetime {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_datetime(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_datetime(&raw).map_err(serde::de::Error::custom)
    }

    /// Optional variant of the datetime adapter.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&super::super::format_datetime(*v)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::super::parse_datetime(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
