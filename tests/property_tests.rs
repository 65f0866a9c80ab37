//! Property-based tests for trueno-track
//!
//! - Metric history ordering and completeness
//! - Param write-once semantics
//! - Keyset pagination covers every run exactly once
//! - Run with ProptestConfig::with_cases(64)

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use trueno_track::config::TrackingConfig;
use trueno_track::experiment::{MetricHistoryView, SearchRuns, TrackingStore, DEFAULT_EXPERIMENT_ID};
use trueno_track::signature::DataType;
use trueno_track::ErrorKind;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

fn ts(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap()
}

/// Metric points with distinct (step, timestamp) pairs
fn arb_metric_points() -> impl Strategy<Value = Vec<(i64, i64, f64)>> {
    proptest::collection::btree_map((0i64..20, 0i64..1000), -1e6f64..1e6, 1..60).prop_map(
        |points| {
            points
                .into_iter()
                .map(|((step, offset), value)| (step, offset, value))
                .collect()
        },
    )
}

fn arb_data_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::Boolean),
        Just(DataType::Integer),
        Just(DataType::Long),
        Just(DataType::Float),
        Just(DataType::Double),
        Just(DataType::String),
        Just(DataType::Binary),
        Just(DataType::Datetime),
    ]
}

fn store() -> TrackingStore {
    TrackingStore::new(TrackingConfig::default())
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: history returns exactly the logged points, ordered by (step, timestamp)
    #[test]
    fn prop_metric_history_is_complete_and_ordered(
        points in arb_metric_points().prop_shuffle()
    ) {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        for (step, offset, value) in &points {
            store.log_metric(&run, "loss", *value, ts(*offset), *step).unwrap();
        }

        let history = store
            .get_metric_history(&run, "loss", MetricHistoryView::All)
            .unwrap();
        prop_assert_eq!(history.len(), points.len());

        let mut expected = points.clone();
        expected.sort_by_key(|(step, offset, _)| (*step, *offset));
        for (record, (step, offset, value)) in history.iter().zip(&expected) {
            prop_assert_eq!(record.step(), *step);
            prop_assert_eq!(record.timestamp(), ts(*offset));
            prop_assert_eq!(record.value().to_bits(), value.to_bits());
        }
    }

    /// Property: latest-per-step keeps one point per step, the newest one
    #[test]
    fn prop_latest_per_step_keeps_newest(points in arb_metric_points()) {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        for (step, offset, value) in &points {
            store.log_metric(&run, "loss", *value, ts(*offset), *step).unwrap();
        }

        let latest = store
            .get_metric_history(&run, "loss", MetricHistoryView::LatestPerStep)
            .unwrap();
        let mut steps: Vec<i64> = points.iter().map(|(s, _, _)| *s).collect();
        steps.sort_unstable();
        steps.dedup();
        prop_assert_eq!(latest.iter().map(|m| m.step()).collect::<Vec<_>>(), steps);

        for record in &latest {
            let newest = points
                .iter()
                .filter(|(s, _, _)| *s == record.step())
                .map(|(_, offset, _)| *offset)
                .max()
                .unwrap();
            prop_assert_eq!(record.timestamp(), ts(newest));
        }
    }

    /// Property: the first param value wins; repeats succeed, changes conflict
    #[test]
    fn prop_param_write_once(first in "[a-z0-9.]{1,12}", second in "[a-z0-9.]{1,12}") {
        let store = store();
        let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
        store.log_param(&run, "p", &first).unwrap();
        prop_assert!(store.log_param(&run, "p", &first).is_ok());

        let result = store.log_param(&run, "p", &second);
        if second == first {
            prop_assert!(result.is_ok());
        } else {
            prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        }
        let stored = store.get_run(&run).unwrap().data.params["p"].clone();
        prop_assert_eq!(stored, first);
    }

    /// Property: paging through any page size visits every run exactly once
    #[test]
    fn prop_pagination_partitions_results(
        losses in proptest::collection::vec(proptest::option::of(0.0f64..1.0), 1..40),
        page_size in 1usize..10,
        ascending in any::<bool>(),
    ) {
        let store = store();
        let mut ids = Vec::new();
        for (i, loss) in losses.iter().enumerate() {
            let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
            if let Some(loss) = loss {
                store.log_metric(&run, "loss", *loss, ts(i64::try_from(i).unwrap()), 0).unwrap();
            }
            ids.push(run);
        }

        let direction = if ascending { "ASC" } else { "DESC" };
        let request = SearchRuns::new([DEFAULT_EXPERIMENT_ID])
            .order_by(format!("metrics.loss {direction}"))
            .max_results(page_size);
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut next = request.clone();
            if let Some(t) = token.take() {
                next = next.page_token(t);
            }
            let page = store.search_runs(&next).unwrap();
            prop_assert!(page.items.len() <= page_size);
            seen.extend(page.items.iter().map(|r| r.info.run_id().to_string()));
            match page.next_page_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        prop_assert_eq!(seen.len(), ids.len());
        seen.sort();
        ids.sort();
        prop_assert_eq!(seen, ids);
    }

    /// Property: widening is reflexive and never narrows back
    #[test]
    fn prop_widening_is_antisymmetric(a in arb_data_type(), b in arb_data_type()) {
        prop_assert!(a.widens_to(&a));
        if a != b && a.widens_to(&b) {
            prop_assert!(!b.widens_to(&a));
        }
    }
}
