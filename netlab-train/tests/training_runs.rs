//! Integration tests for complete training runs.
//!
//! These drive the controller end-to-end through `ScriptedModel`, covering the
//! status machine, both epoch-boundary policies and the event streams.

use netlab_train::config::{EngineConfig, TrainingCallback};
use netlab_train::model::EpochLogs;
use netlab_train::{
    EngineError, ModelError, RecordingSink, ScriptedModel, Tensor, TrainingConfig,
    TrainingController, TrainingEvent, TrainingStatus,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Helper to create a controller with a recording sink.
fn create_controller() -> (TrainingController, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let controller = TrainingController::new(&EngineConfig::default()).with_sink(sink.clone());
    (controller, sink)
}

fn data(samples: usize) -> (Tensor, Tensor) {
    let x = Tensor::column(&vec![0.0; samples]);
    let y = Tensor::column(&vec![1.0; samples]);
    (x, y)
}

fn config(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        batch_size: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_run_completes_all_epochs() {
    let (mut controller, sink) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.7, 0.5, 0.3, 0.2]);
    let (x, y) = data(25);

    let history = controller
        .run(&mut model, &x, &y, config(5))
        .await
        .unwrap();

    assert_eq!(history.epochs_run(), 5);
    assert_eq!(history.best_epoch, 4);
    assert_eq!(history.best_loss, 0.2);
    assert_eq!(controller.status(), TrainingStatus::Completed);

    let epochs: Vec<usize> = history.history.iter().map(|m| m.epoch).collect();
    assert_eq!(epochs, vec![0, 1, 2, 3, 4]);

    let names = sink.names();
    assert_eq!(names.first(), Some(&"run_started"));
    assert_eq!(names.last(), Some(&"run_completed"));
    assert_eq!(names.iter().filter(|n| **n == "epoch_completed").count(), 5);

    let progress = controller.current_progress().unwrap();
    assert_eq!(progress.current_epoch, 5);
    assert_eq!(progress.current_batch, 3);
    assert_eq!(progress.total_batches, 3);
}

#[tokio::test]
async fn test_early_stopping_restores_best_weights() {
    let (mut controller, sink) = create_controller();
    // best at epoch 2, flat afterwards
    let mut model = ScriptedModel::from_losses(&[0.9, 0.7, 0.5, 0.6]);
    let (x, y) = data(20);

    let history = controller
        .run(&mut model, &x, &y, config(50))
        .await
        .unwrap();

    // best epoch + patience + 1
    assert_eq!(history.epochs_run(), 13);
    assert_eq!(model.epochs_run(), 13);
    assert_eq!(model.weights_epoch(), Some(2));
    assert_eq!(model.weight_restores().len(), 1);
    assert_eq!(controller.status(), TrainingStatus::Completed);

    let triggered = sink
        .events()
        .into_iter()
        .find(|e| matches!(e, TrainingEvent::EarlyStopTriggered { .. }));
    assert_eq!(
        triggered,
        Some(TrainingEvent::EarlyStopTriggered {
            epoch: 12,
            best_epoch: 2,
            best_value: 0.5,
            weights_restored: true,
        })
    );
}

#[tokio::test]
async fn test_early_stopping_without_restore() {
    let mut engine = EngineConfig::default();
    engine.early_stopping.restore_best_weights = false;
    engine.early_stopping.patience = 3;
    let mut controller = TrainingController::new(&engine);
    let mut model = ScriptedModel::from_losses(&[0.5, 0.6]);
    let (x, y) = data(10);

    let history = controller
        .run(&mut model, &x, &y, config(20))
        .await
        .unwrap();

    assert_eq!(history.epochs_run(), 4);
    assert!(model.weight_restores().is_empty());
    assert_eq!(model.weights_epoch(), Some(3));
}

#[tokio::test]
async fn test_plateau_halves_learning_rate() {
    let (mut controller, sink) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.5, 0.6]).with_learning_rate(0.01);
    let (x, y) = data(10);
    let config = config(7).with_callbacks([TrainingCallback::ReduceLrOnPlateau]);

    let history = controller.run(&mut model, &x, &y, config).await.unwrap();

    assert_eq!(history.epochs_run(), 7);
    assert_eq!(model.learning_rate_writes(), &[0.005]);
    // a sample records the rate in effect while its epoch ran
    assert_eq!(history.history[5].learning_rate, 0.01);
    assert_eq!(history.history[6].learning_rate, 0.005);
    assert!(sink.events().contains(&TrainingEvent::LearningRateReduced {
        epoch: 5,
        from: 0.01,
        to: 0.005,
    }));
}

#[tokio::test]
async fn test_plateau_and_early_stopping_together() {
    let (mut controller, _) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.7, 0.5, 0.6]);
    let (x, y) = data(20);

    controller
        .run(&mut model, &x, &y, config(50))
        .await
        .unwrap();

    // plateau patience 5 fires at epochs 7 and 12
    assert_eq!(model.learning_rate_writes(), &[0.005, 0.0025]);
}

#[tokio::test]
async fn test_missing_learning_rate_disables_scheduler() {
    let (mut controller, sink) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.5, 0.6]).without_learning_rate();
    let (x, y) = data(10);
    let config = config(8).with_callbacks([TrainingCallback::ReduceLrOnPlateau]);

    let history = controller.run(&mut model, &x, &y, config).await.unwrap();

    assert_eq!(history.epochs_run(), 8);
    assert!(model.learning_rate_writes().is_empty());
    assert!(history.history.iter().all(|m| m.learning_rate == 0.001));
    let unavailable = sink
        .names()
        .into_iter()
        .filter(|n| *n == "learning_rate_unavailable")
        .count();
    assert_eq!(unavailable, 1);
}

#[tokio::test]
async fn test_model_failure_moves_to_error() {
    let (mut controller, sink) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.8, 0.7])
        .failing_at(2, ModelError::NumericalInstability("loss is NaN".into()));
    let (x, y) = data(10);

    let err = controller
        .run(&mut model, &x, &y, config(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Training(ModelError::NumericalInstability(_))
    ));
    assert!(err.is_training_failure());
    assert_eq!(controller.status(), TrainingStatus::Error);
    assert_eq!(sink.names().last(), Some(&"run_failed"));

    // a failed run may be followed by a new one
    let mut model = ScriptedModel::from_losses(&[0.4]);
    let history = controller
        .run(&mut model, &x, &y, config(2))
        .await
        .unwrap();
    assert_eq!(history.epochs_run(), 2);
    assert_eq!(controller.status(), TrainingStatus::Completed);
}

#[tokio::test]
async fn test_mismatched_rows_fail_run() {
    let (mut controller, _) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.5]);
    let x = Tensor::column(&[0.0; 10]);
    let y = Tensor::column(&[0.0; 8]);

    let err = controller
        .run(&mut model, &x, &y, config(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Training(ModelError::ShapeMismatch { .. })
    ));
    assert_eq!(controller.status(), TrainingStatus::Error);
    assert_eq!(model.epochs_run(), 0);
}

#[tokio::test]
async fn test_not_ready_model_is_reported() {
    let (mut controller, _) = create_controller();
    let mut model = ScriptedModel::new(Vec::new());
    let (x, y) = data(10);

    let err = controller
        .run(&mut model, &x, &y, config(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ModelNotReady(_)));
    assert_eq!(controller.status(), TrainingStatus::Error);
}

#[tokio::test]
async fn test_best_accuracy_tie_keeps_earliest_epoch() {
    let (mut controller, _) = create_controller();
    let mut model = ScriptedModel::new(vec![
        EpochLogs::new(0.6, 0.7),
        EpochLogs::new(0.5, 0.8),
        EpochLogs::new(0.4, 0.8),
        EpochLogs::new(0.3, 0.75),
    ]);
    let (x, y) = data(10);

    let history = controller
        .run(&mut model, &x, &y, config(4))
        .await
        .unwrap();
    assert_eq!(history.best_epoch, 1);
    assert_eq!(history.best_accuracy, 0.8);
    assert_eq!(history.best_loss, 0.5);
}

#[tokio::test]
async fn test_validation_metrics_drive_early_stopping() {
    let mut engine = EngineConfig::default();
    engine.early_stopping.patience = 2;
    let mut controller = TrainingController::new(&engine);
    // training loss keeps falling while validation loss turns up
    let mut model = ScriptedModel::new(vec![
        EpochLogs::new(0.9, 0.5).with_validation(0.8, 0.5),
        EpochLogs::new(0.7, 0.6).with_validation(0.6, 0.6),
        EpochLogs::new(0.5, 0.7).with_validation(0.7, 0.55),
        EpochLogs::new(0.3, 0.8).with_validation(0.9, 0.5),
        EpochLogs::new(0.2, 0.9).with_validation(1.0, 0.45),
    ]);
    let (x, y) = data(10);

    let history = controller
        .run(&mut model, &x, &y, config(5))
        .await
        .unwrap();
    assert_eq!(history.epochs_run(), 4);
    assert_eq!(model.weights_epoch(), Some(1));
    assert_eq!(history.history[1].val_loss, Some(0.6));
}

#[tokio::test]
async fn test_streams_deliver_every_epoch() {
    let (mut controller, _) = create_controller();
    let mut metrics = controller.subscribe_metrics();
    let mut batches = controller.subscribe_batches();
    let status = controller.subscribe_status();
    let mut model = ScriptedModel::from_losses(&[0.8, 0.6, 0.4]);
    let (x, y) = data(25);

    controller
        .run(&mut model, &x, &y, config(3))
        .await
        .unwrap();

    let mut epochs = Vec::new();
    while let Ok(Some(sample)) = metrics.try_recv() {
        epochs.push(sample.epoch);
    }
    assert_eq!(epochs, vec![0, 1, 2]);

    let mut batch_count = 0;
    while let Ok(batch) = batches.try_recv() {
        assert_eq!(batch.size, 10);
        batch_count += 1;
    }
    assert_eq!(batch_count, 3 * 3);

    assert_eq!(*status.borrow(), TrainingStatus::Completed);
    assert_eq!(controller.latest_metric().map(|m| m.epoch), Some(2));
}

#[tokio::test]
async fn test_stop_request_before_run_is_cleared() {
    let (mut controller, sink) = create_controller();
    let handle = controller.stop_handle();
    handle.request_stop();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.8, 0.7]);
    let (x, y) = data(10);

    let history = controller
        .run(&mut model, &x, &y, config(10))
        .await
        .unwrap();

    assert_eq!(history.epochs_run(), 10);
    assert!(!sink.names().contains(&"stop_requested"));
}

#[tokio::test]
async fn test_external_stop_ends_run_early() {
    let (mut controller, sink) = create_controller();
    let handle = controller.stop_handle();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.8, 0.7, 0.6, 0.5]);
    let (x, y) = data(10);

    // runs once the fit loop yields after the first epoch
    tokio::spawn(async move { handle.request_stop() });

    let history = controller
        .run(&mut model, &x, &y, config(50))
        .await
        .unwrap();

    assert!(history.epochs_run() < 50);
    assert!(sink.names().contains(&"stop_requested"));
    assert_eq!(controller.status(), TrainingStatus::Completed);
}

#[tokio::test]
async fn test_reset_then_rerun() {
    let (mut controller, _) = create_controller();
    let mut model = ScriptedModel::from_losses(&[0.9, 0.8]);
    let (x, y) = data(10);

    controller
        .run(&mut model, &x, &y, config(2))
        .await
        .unwrap();
    controller.reset();
    assert_eq!(controller.status(), TrainingStatus::Idle);
    assert!(controller.history().is_empty());
    assert!(controller.current_progress().is_none());

    let history = controller
        .run(&mut model, &x, &y, config(3))
        .await
        .unwrap();
    assert_eq!(history.epochs_run(), 3);
}
