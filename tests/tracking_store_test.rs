//! Integration tests for the Tracking Store
//!
//! Covers the experiment/run lifecycle, write-once params, append-only
//! metrics, filtered search and keyset pagination under concurrent appends.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, TimeZone, Utc};
use trueno_track::config::TrackingConfig;
use trueno_track::experiment::{
    CreateRun, MetricHistoryView, MetricRecord, ParamRecord, RunStatus, SearchRuns, TagRecord,
    TrackingStore, ViewType, DEFAULT_EXPERIMENT_ID,
};
use trueno_track::{Error, ErrorKind};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn store() -> TrackingStore {
    TrackingStore::new(TrackingConfig::default())
}

#[test]
fn test_experiment_lifecycle() {
    let store = store();
    let id = store.create_experiment("exp-1", None).unwrap();
    assert_eq!(
        store.create_experiment("exp-1", None).unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );
    assert_eq!(store.get_experiment_by_name("exp-1").unwrap().experiment_id(), id);

    let run = store.create_run(&id, ts(0)).unwrap();
    store.delete_experiment(&id).unwrap();
    assert_eq!(store.get_experiment(&id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.get_run(&run).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        store.create_run(&id, ts(1)).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        store.create_run("does-not-exist", ts(1)).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    // the name is free again while the experiment is deleted
    let other = store.create_experiment("exp-1", None).unwrap();
    assert_eq!(
        store.restore_experiment(&id).unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );
    store.rename_experiment(&other, "exp-2").unwrap();
    store.restore_experiment(&id).unwrap();
    assert!(store.get_run(&run).is_ok());
}

#[test]
fn test_param_write_once() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.log_param(&run, "lr", "0.01").unwrap();
    store.log_param(&run, "lr", "0.01").unwrap();

    match store.log_param(&run, "lr", "0.02").unwrap_err() {
        Error::Conflict {
            key,
            existing,
            attempted,
            ..
        } => {
            assert_eq!(key, "lr");
            assert_eq!(existing, "0.01");
            assert_eq!(attempted, "0.02");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.get_run(&run).unwrap().data.params["lr"], "0.01");
}

#[test]
fn test_metric_history_views() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.log_metric(&run, "loss", 0.9, ts(3), 1).unwrap();
    store.log_metric(&run, "loss", 1.0, ts(1), 0).unwrap();
    store.log_metric(&run, "loss", 0.8, ts(2), 1).unwrap();
    // exact replay is a no-op
    store.log_metric(&run, "loss", 1.0, ts(1), 0).unwrap();

    let all = store
        .get_metric_history(&run, "loss", MetricHistoryView::All)
        .unwrap();
    let points: Vec<(i64, f64)> = all.iter().map(|m| (m.step(), m.value())).collect();
    assert_eq!(points, vec![(0, 1.0), (1, 0.8), (1, 0.9)]);

    let latest = store
        .get_metric_history(&run, "loss", MetricHistoryView::LatestPerStep)
        .unwrap();
    let points: Vec<(i64, f64)> = latest.iter().map(|m| (m.step(), m.value())).collect();
    assert_eq!(points, vec![(0, 1.0), (1, 0.9)]);

    assert_eq!(store.get_run(&run).unwrap().latest_metric("loss"), Some(0.9));
}

#[test]
fn test_terminal_runs_reject_logging() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.log_metric(&run, "acc", 0.5, ts(1), 0).unwrap();
    store
        .update_run_status(&run, RunStatus::Finished, Some(ts(10)))
        .unwrap();

    assert_eq!(
        store.log_metric(&run, "acc", 0.6, ts(2), 1).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        store
            .update_run_status(&run, RunStatus::Running, None)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidState
    );
    // a retried metric write that already landed still succeeds
    store.log_metric(&run, "acc", 0.5, ts(1), 0).unwrap();
    // tags stay writable
    store.set_tag(&run, "note", "done").unwrap();

    let info = store.get_run(&run).unwrap().info;
    assert_eq!(info.status(), RunStatus::Finished);
    assert_eq!(info.end_time(), Some(ts(10)));
}

#[test]
fn test_log_batch_is_all_or_nothing() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.log_param(&run, "depth", "4").unwrap();

    let metrics = vec![MetricRecord::new(&run, "loss", 0, 0.3)];
    let params = vec![ParamRecord::new("width", "64"), ParamRecord::new("depth", "8")];
    let tags = vec![TagRecord::new("stage", "sweep")];
    let err = store.log_batch(&run, &metrics, &params, &tags).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let data = store.get_run(&run).unwrap().data;
    assert!(data.metrics.is_empty());
    assert!(!data.params.contains_key("width"));
    assert!(data.tags.is_empty());

    let params = vec![ParamRecord::new("width", "64")];
    store.log_batch(&run, &metrics, &params, &tags).unwrap();
    let data = store.get_run(&run).unwrap().data;
    assert_eq!(data.metrics.len(), 1);
    assert_eq!(data.params.len(), 2);
    assert_eq!(data.tags["stage"], "sweep");
}

#[test]
fn test_search_runs_filter_and_order() {
    let store = store();
    let exp = store.create_experiment("search", None).unwrap();
    for (i, (loss, model)) in [(0.5, "cnn"), (0.2, "mlp"), (0.9, "cnn")].iter().enumerate() {
        let run = store
            .create_run_with(CreateRun::new(&exp).start_time(ts(i64::try_from(i).unwrap())).tag("model", *model))
            .unwrap();
        store
            .log_metric(run.info.run_id(), "loss", *loss, ts(10), 0)
            .unwrap();
    }

    let page = store
        .search_runs(
            &SearchRuns::new([exp.as_str()])
                .filter("tags.model = 'cnn' AND metrics.loss < 0.8")
                .order_by("metrics.loss DESC"),
        )
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].latest_metric("loss"), Some(0.5));

    let ordered = store
        .search_runs(&SearchRuns::new([exp.as_str()]).order_by("metrics.loss ASC"))
        .unwrap();
    let losses: Vec<f64> = ordered
        .items
        .iter()
        .filter_map(|r| r.latest_metric("loss"))
        .collect();
    assert_eq!(losses, vec![0.2, 0.5, 0.9]);

    // default order is newest first
    let newest = store.search_runs(&SearchRuns::new([exp.as_str()])).unwrap();
    assert_eq!(newest.items[0].info.start_time(), ts(2));
}

#[test]
fn test_search_undefined_metric_is_empty_not_error() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.log_metric(&run, "loss", 0.1, ts(1), 0).unwrap();
    let page = store
        .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).filter("metrics.never_logged > 0"))
        .unwrap();
    assert!(page.items.is_empty());
    assert!(page.next_page_token.is_none());
}

#[test]
fn test_search_rejects_malformed_requests() {
    let store = store();
    for filter in ["metrics.loss < 1 OR metrics.loss > 2", "metrics.loss <", "foo.bar = 1"] {
        let err = store
            .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).filter(filter))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{filter}");
    }
    let err = store
        .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).max_results(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = store
        .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).page_token("garbage"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_pagination_stable_under_concurrent_appends() {
    let store = Arc::new(store());
    let exp = store.create_experiment("pages", None).unwrap();
    let mut original = Vec::new();
    for i in 0..25 {
        original.push(store.create_run(&exp, ts(i)).unwrap());
    }

    let request = SearchRuns::new([exp.as_str()]).order_by("start_time ASC").max_results(7);
    let mut seen = Vec::new();
    let mut page = store.search_runs(&request).unwrap();
    loop {
        seen.extend(page.items.iter().map(|r| r.info.run_id().to_string()));

        // append newer runs between page fetches
        let writer = Arc::clone(&store);
        let exp_id = exp.clone();
        thread::spawn(move || {
            for i in 0..3 {
                writer.create_run(&exp_id, ts(1000 + i)).unwrap();
            }
        })
        .join()
        .unwrap();

        let Some(token) = page.next_page_token.clone() else {
            break;
        };
        page = store
            .search_runs(&request.clone().page_token(token))
            .unwrap();
    }

    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), seen.len(), "no run is returned twice");
    for run in &original {
        assert!(seen.contains(run), "run {run} was skipped");
    }
}

#[test]
fn test_soft_delete_and_view_types() {
    let store = store();
    let keep = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    let gone = store.create_run(DEFAULT_EXPERIMENT_ID, ts(1)).unwrap();
    store.delete_run(&gone).unwrap();

    let active = store.search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID])).unwrap();
    assert_eq!(active.items.len(), 1);
    assert_eq!(active.items[0].info.run_id(), keep);

    let deleted = store
        .search_runs(&SearchRuns::new([DEFAULT_EXPERIMENT_ID]).view(ViewType::DeletedOnly))
        .unwrap();
    assert_eq!(deleted.items[0].info.run_id(), gone);

    assert!(store.find_run(&gone, ViewType::All).is_ok());
    assert_eq!(
        store.log_param(&gone, "k", "v").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    store.restore_run(&gone).unwrap();
    store.log_param(&gone, "k", "v").unwrap();
}

#[test]
fn test_purge_respects_restore_window() {
    let store = store();
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();
    store.delete_run(&run).unwrap();

    let report = store.purge_deleted(Utc::now());
    assert!(report.run_ids.is_empty());

    let later = Utc::now() + chrono::Duration::days(31);
    let report = store.purge_deleted(later);
    assert_eq!(report.run_ids, vec![run.clone()]);
    assert_eq!(report.artifact_uris.len(), 1);
    assert!(store.find_run(&run, ViewType::All).is_err());
}

#[test]
fn test_concurrent_logging_to_one_run() {
    let store = Arc::new(store());
    let run = store.create_run(DEFAULT_EXPERIMENT_ID, ts(0)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let run = run.clone();
            thread::spawn(move || {
                for step in 0..50 {
                    store
                        .log_metric(&run, "loss", f64::from(worker), ts(step), step)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let history = store
        .get_metric_history(&run, "loss", MetricHistoryView::All)
        .unwrap();
    assert_eq!(history.len(), 400);
    assert!(history.windows(2).all(|w| w[0].step() <= w[1].step()));
}

#[test]
fn test_metric_ordering_follows_current_values_between_pages() {
    let store = store();
    let exp = store.create_experiment("moving", None).unwrap();
    let mut ids = Vec::new();
    for (i, loss) in [0.1, 0.2, 0.3].into_iter().enumerate() {
        let run = store.create_run(&exp, ts(i64::try_from(i).unwrap())).unwrap();
        store.log_metric(&run, "loss", loss, ts(10), 0).unwrap();
        ids.push(run);
    }

    let by_loss = SearchRuns::new([exp.as_str()]).order_by("metrics.loss ASC").max_results(1);
    let by_start = SearchRuns::new([exp.as_str()]).order_by("start_time ASC").max_results(1);
    let mut loss_page = store.search_runs(&by_loss).unwrap();
    let mut start_page = store.search_runs(&by_start).unwrap();
    let mut by_loss_seen = vec![loss_page.items[0].info.run_id().to_string()];
    let mut by_start_seen = vec![start_page.items[0].info.run_id().to_string()];

    // the first run's loss moves past the cursor of the metric ordering
    store.log_metric(&ids[0], "loss", 0.9, ts(20), 1).unwrap();

    while let Some(token) = loss_page.next_page_token.clone() {
        loss_page = store.search_runs(&by_loss.clone().page_token(token)).unwrap();
        by_loss_seen.extend(loss_page.items.iter().map(|r| r.info.run_id().to_string()));
    }
    while let Some(token) = start_page.next_page_token.clone() {
        start_page = store.search_runs(&by_start.clone().page_token(token)).unwrap();
        by_start_seen.extend(start_page.items.iter().map(|r| r.info.run_id().to_string()));
    }

    assert_eq!(by_loss_seen, vec![ids[0].clone(), ids[1].clone(), ids[2].clone(), ids[0].clone()]);
    assert_eq!(by_start_seen, ids);
}
