//! Metric points: the append-only series a run logs per key

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logged value of a run metric. Never mutated once stored.
///
/// ## Ordering
///
/// Points for one key are totally ordered by `(step, timestamp)`, with
/// insertion order breaking remaining ties. The "latest" point surfaced in
/// run summaries is the maximum under that order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    key: String,
    step: i64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Point at `step` stamped with the current time.
    #[must_use]
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, step: i64, value: f64) -> Self {
        Self::builder(run_id, key, step, value).build()
    }

    /// Builder for a point with an explicit timestamp.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        key: impl Into<String>,
        step: i64,
        value: f64,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(run_id, key, step, value)
    }

    /// Owning run.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Series key, e.g. `loss`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Step (or epoch) the value belongs to.
    #[must_use]
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// Logged value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Client-supplied wall-clock time of the point.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether `other` is a replay of this exact data point.
    ///
    /// Values are compared bitwise so that NaN replays are recognized too.
    #[must_use]
    pub fn same_point(&self, other: &Self) -> bool {
        self.key == other.key
            && self.step == other.step
            && self.timestamp == other.timestamp
            && self.value.to_bits() == other.value.to_bits()
    }

    /// Time-series order: step first, then timestamp.
    #[must_use]
    pub fn series_cmp(&self, other: &Self) -> Ordering {
        self.step
            .cmp(&other.step)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }

    pub(crate) fn with_run_id(mut self, run_id: &str) -> Self {
        run_id.clone_into(&mut self.run_id);
        self
    }
}

/// Builder for [`MetricRecord`].
#[derive(Debug)]
pub struct MetricRecordBuilder {
    run_id: String,
    key: String,
    step: i64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecordBuilder {
    /// Builder from the required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, step: i64, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            run_id: self.run_id,
            key: self.key,
            step: self.step,
            value: self.value,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("run-1", "loss", 0, 0.5);
        assert_eq!(metric.run_id(), "run-1");
        assert_eq!(metric.key(), "loss");
        assert_eq!(metric.step(), 0);
        assert!((metric.value() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_series_order_step_then_timestamp() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let a = MetricRecord::builder("r", "loss", 1, 0.4).timestamp(late).build();
        let b = MetricRecord::builder("r", "loss", 2, 0.3).timestamp(early).build();
        let c = MetricRecord::builder("r", "loss", 1, 0.5).timestamp(early).build();
        assert_eq!(a.series_cmp(&b), Ordering::Less);
        assert_eq!(c.series_cmp(&a), Ordering::Less);
    }

    #[test]
    fn test_same_point_handles_nan() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let a = MetricRecord::builder("r", "loss", 0, f64::NAN).timestamp(ts).build();
        let b = MetricRecord::builder("r", "loss", 0, f64::NAN).timestamp(ts).build();
        assert!(a.same_point(&b));
        let c = MetricRecord::builder("r", "loss", 0, 1.0).timestamp(ts).build();
        assert!(!a.same_point(&c));
    }
}
