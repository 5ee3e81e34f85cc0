//! Query builder for readings.
//!
//! [`RangeQuery`] follows the builder pattern for filtering and limiting the
//! rows read from a monitor's readings table.
//!
//! # Example
//!
//! ```
//! use noise_store::{RangeQuery, Store};
//! use noise_types::MonitorId;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let id = MonitorId::parse("10.1.1.1").unwrap();
//! store.register_monitor(&id, "Noise Monitor - Drumcondra", None)?;
//!
//! let now = OffsetDateTime::now_utc();
//! let query = RangeQuery::new()
//!     .since(now - Duration::hours(1))
//!     .until(now)
//!     .limit(100);
//!
//! let readings = store.query_readings(&id, &query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), noise_store::Error>(())
//! ```

use time::OffsetDateTime;

use crate::models::TableName;

/// Fluent query builder for a monitor's readings.
///
/// By default, queries return results ordered by timestamp ascending
/// (oldest first), which is the order the dashboard charts them in.
///
/// # Example
///
/// ```
/// use noise_store::RangeQuery;
///
/// // The most recent reading
/// let latest = RangeQuery::new().newest_first().limit(1);
/// assert!(latest.newest_first);
/// ```
#[derive(Debug, Default, Clone)]
pub struct RangeQuery {
    /// Filter readings at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter readings at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Order by timestamp descending.
    pub newest_first: bool,
}

impl RangeQuery {
    /// Create a new query: no bounds, no limit, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inclusive range query between two instants.
    pub fn between(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self::new().since(start).until(end)
    }

    /// Filter to readings at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<i64>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(since.unix_timestamp());
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(until.unix_timestamp());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query against a validated table.
    pub(crate) fn build_sql(&self, table: &TableName) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT timestamp, laeq, la10, la90, lafmax, lceq, lcfmax, lc10, lc90 \
             FROM {} {} ORDER BY timestamp {}",
            table, where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}
