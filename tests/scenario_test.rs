//! End-to-end: track a run, package its model, register and promote it,
//! then serve it back through a `models:/` URI.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use trueno_track::experiment::{MetricHistoryView, RunStatus, SearchRuns};
use trueno_track::flavor::{LinearModel, SaveOptions};
use trueno_track::registry::{ModelStage, ModelVersionStatus};
use trueno_track::service::TrackingService;
use trueno_track::signature::ModelData;
use trueno_track::telemetry::try_init_tracing;
use trueno_track::ErrorKind;

fn features() -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        ("tenure", Arc::new(Float64Array::from(vec![1.0, 24.0])) as ArrayRef),
        ("spend", Arc::new(Float64Array::from(vec![10.0, 80.0])) as ArrayRef),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_track_register_promote_serve() {
    try_init_tracing("trueno_track=info");
    let service = TrackingService::builder().build().unwrap();
    let exp = service.tracking().create_experiment("exp-1", None).unwrap();

    let run = service.start_run(&exp).unwrap();
    let run_id = run.run_id().to_string();
    run.log_param("lr", "0.01").unwrap();
    for (step, loss) in [0.9, 0.6, 0.4].into_iter().enumerate() {
        run.log_metric("loss", loss, i64::try_from(step).unwrap()).unwrap();
    }
    let model = LinearModel::new(vec!["tenure".into(), "spend".into()], vec![-0.1, 0.02], 0.5);
    service
        .log_model(
            &run_id,
            "model",
            &model,
            &["linear"],
            SaveOptions::default().input_example(features()),
        )
        .await
        .unwrap();
    let model_uri = run.artifact_path_uri("model");
    assert_eq!(model_uri, format!("runs:/{run_id}/model"));
    run.finish().unwrap();

    let finished = service.tracking().get_run(&run_id).unwrap();
    assert_eq!(finished.info.status(), RunStatus::Finished);
    assert!(finished.info.end_time().is_some());
    assert_eq!(finished.data.params.len(), 1);
    assert_eq!(finished.data.params["lr"], "0.01");
    let history = service
        .tracking()
        .get_metric_history(&run_id, "loss", MetricHistoryView::All)
        .unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].value() > w[1].value()));

    let registry = service.registry();
    registry.create_registered_model("churn", None).unwrap();
    let version = registry
        .create_model_version("churn", &model_uri, Some(&run_id))
        .await
        .unwrap();
    assert_eq!(version.version(), 1);
    assert_eq!(version.status(), ModelVersionStatus::Ready);
    assert_eq!(version.current_stage(), ModelStage::None);
    assert_eq!(version.run_id(), Some(run_id.as_str()));

    let staged = registry.transition_stage("churn", 1, "Staging", false).unwrap();
    assert_eq!(staged.current_stage(), ModelStage::Staging);
    assert_eq!(
        registry.get_model_version("churn", 1).unwrap().current_stage(),
        ModelStage::Staging
    );

    // the registered copy serves predictions on its own
    let loaded = service.load_model("models:/churn/Staging").await.unwrap();
    assert_eq!(loaded.descriptor().run_id(), Some(run_id.as_str()));
    let output = loaded.predict(&ModelData::Table(features())).unwrap();
    let predictions = output
        .as_table()
        .and_then(|t| t.column_by_name(LinearModel::OUTPUT_COLUMN))
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .unwrap();
    assert!((predictions.value(0) - 0.6).abs() < 1e-9);
    assert!(!predictions.is_null(1));
}

#[tokio::test]
async fn test_register_model_in_one_call() {
    try_init_tracing("trueno_track=info");
    let service = TrackingService::builder().build().unwrap();
    let exp = service.tracking().create_experiment("exp-2", None).unwrap();
    let run = service.start_run(&exp).unwrap();
    let model = LinearModel::new(vec!["tenure".into(), "spend".into()], vec![1.0, 1.0], 0.0);

    let first = service
        .register_model(run.run_id(), "model", &model, &["linear"], SaveOptions::default(), "churn")
        .await
        .unwrap();
    let second = service
        .register_model(run.run_id(), "model-v2", &model, &["linear"], SaveOptions::default(), "churn")
        .await
        .unwrap();
    assert_eq!((first.version(), second.version()), (1, 2));
    assert_eq!(second.source(), format!("runs:/{}/model-v2", run.run_id()));

    let run_id = run.run_id().to_string();
    run.finish().unwrap();
    let err = service
        .log_model(&run_id, "late", &model, &["linear"], SaveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_dropped_run_is_marked_failed() {
    let service = TrackingService::builder().build().unwrap();
    let exp = service.tracking().create_experiment("crashy", None).unwrap();
    let run_id = {
        let run = service.start_run(&exp).unwrap();
        run.log_metric("loss", 1.0, 0).unwrap();
        run.run_id().to_string()
    };
    let info = service.tracking().get_run(&run_id).unwrap().info;
    assert_eq!(info.status(), RunStatus::Failed);
}

#[test]
fn test_undefined_metric_filter_yields_empty_page() {
    let service = TrackingService::builder().build().unwrap();
    let exp = service.tracking().create_experiment("exp-1", None).unwrap();
    for loss in [0.3, 0.7] {
        let run = service.start_run(&exp).unwrap();
        run.log_metric("loss", loss, 0).unwrap();
        run.finish().unwrap();
    }

    let page = service
        .tracking()
        .search_runs(&SearchRuns::new([exp.as_str()]).filter("metrics.accuracy > 0.5"))
        .unwrap();
    assert!(page.items.is_empty());
    assert!(page.next_page_token.is_none());
}

#[tokio::test]
async fn test_purge_removes_run_artifacts() {
    let service = TrackingService::builder().build().unwrap();
    let exp = service.tracking().create_experiment("cleanup", None).unwrap();
    let run = service.start_run(&exp).unwrap();
    let run_id = run.run_id().to_string();
    let root = service.run_artifacts(&run_id).unwrap();
    root.put("notes.txt", b"scratch".to_vec()).await.unwrap();
    run.finish().unwrap();

    service.tracking().delete_run(&run_id).unwrap();
    let report = service
        .purge_deleted(Utc::now() + chrono::Duration::days(60))
        .await
        .unwrap();
    assert_eq!(report.run_ids, vec![run_id]);
    assert!(root.list("").await.unwrap().is_empty());
}
