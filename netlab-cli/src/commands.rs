//! CLI subcommand handlers.

use crate::scenario;
use crate::{Commands, ConfigAction, TrainArgs};
use netlab_train::config::{EngineConfig, TrainingCallback, load_config};
use netlab_train::training::session::{SessionStore, TrainingSession};
use netlab_train::{
    ConfusionMatrix, ConfusionMatrixEvaluator, ScriptedModel, Tensor, TrainingController,
    TrainingHistory,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, workspace).await,
        Commands::Evaluate {
            classes,
            samples,
            skill,
            seed,
        } => handle_evaluate(classes, samples, skill, seed).await,
        Commands::Sessions { json } => handle_sessions(json, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Session log inside the workspace.
pub fn sessions_path(workspace: &Path) -> PathBuf {
    workspace.join(".netlab").join("sessions.json")
}

fn load_engine_config(workspace: &Path) -> anyhow::Result<EngineConfig> {
    load_config(Some(workspace), None).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

async fn handle_train(args: TrainArgs, workspace: &Path) -> anyhow::Result<()> {
    let engine = load_engine_config(workspace)?;
    let mut config = engine.training.clone();
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(split) = args.validation_split {
        config.validation_split = split;
    }
    if args.no_early_stopping {
        config.callbacks.remove(&TrainingCallback::EarlyStopping);
    }
    if args.no_reduce_lr {
        config.callbacks.remove(&TrainingCallback::ReduceLrOnPlateau);
    }
    config.validate()?;

    let mut model = scenario::model(
        args.scenario,
        config.epochs,
        config.has_validation(),
        args.seed,
    );
    let x = Tensor::column(&vec![0.0; args.samples]);
    let y = Tensor::column(&vec![0.0; args.samples]);

    let mut controller = TrainingController::new(&engine);
    let mut metrics = controller.subscribe_metrics();
    let printer = tokio::spawn(async move {
        loop {
            let sample = match metrics.recv().await {
                Ok(Some(sample)) => sample,
                Ok(None) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            let val = sample
                .val_loss
                .map(|v| format!("  val_loss {v:.4}"))
                .unwrap_or_default();
            println!(
                "  epoch {:>3}  loss {:.4}  acc {:.3}{}  lr {:.2e}",
                sample.epoch + 1,
                sample.loss,
                sample.accuracy,
                val,
                sample.learning_rate
            );
        }
    });

    info!(scenario = ?args.scenario, epochs = config.epochs, "Starting training run");
    let result = controller.run(&mut model, &x, &y, config.clone()).await;
    // closing the streams ends the printer
    drop(controller);
    join_printer(printer).await;
    let history = result?;

    print_history(&history, config.epochs);

    if args.record {
        let path = sessions_path(workspace);
        let mut store = SessionStore::load(&path)?;
        let mut session = TrainingSession::from_history(&config, &history);
        if let Some(name) = args.name {
            session = session.with_name(name);
        }
        println!("Recorded session {}", session.id);
        store.add(session);
        store.save(&path)?;
    }
    Ok(())
}

/// Wait for the epoch printer. Returns false if the task panicked or was cancelled.
async fn join_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Epoch printer task failed");
            false
        }
    }
}

fn print_history(history: &TrainingHistory, epochs: usize) {
    println!();
    println!("Training complete");
    println!("  Epochs run:     {} / {}", history.epochs_run(), epochs);
    println!("  Best epoch:     {}", history.best_epoch + 1);
    println!("  Best accuracy:  {:.4}", history.best_accuracy);
    println!("  Best loss:      {:.4}", history.best_loss);
    println!("  Converged:      {}", if history.converged { "yes" } else { "no" });
    println!("  Total time:     {:.2}s", history.total_time.as_secs_f64());
}

async fn handle_evaluate(classes: usize, samples: usize, skill: f64, seed: u64) -> anyhow::Result<()> {
    let (predictions, targets) = scenario::classifier_output(classes, samples, skill, seed)?;
    let model = ScriptedModel::new(Vec::new()).with_predictions(predictions);
    let x = Tensor::column(&vec![0.0; samples]);

    let report = ConfusionMatrixEvaluator::new()
        .evaluate(&model, &x, &targets, classes)
        .await?;
    print!("{}", render_report(&report));
    Ok(())
}

/// Render the matrix and per-class scores as a text table.
pub fn render_report(report: &ConfusionMatrix) -> String {
    let mut out = String::new();
    out.push_str("Confusion matrix (rows: true, columns: predicted)\n");
    out.push_str("       ");
    for class in &report.classes {
        out.push_str(&format!("{class:>6}"));
    }
    out.push('\n');
    for (class, row) in report.classes.iter().zip(&report.matrix) {
        out.push_str(&format!("{class:>6} "));
        for count in row {
            out.push_str(&format!("{count:>6}"));
        }
        out.push('\n');
    }

    out.push_str("\nclass  precision  recall  f1     support\n");
    for &class in &report.classes {
        out.push_str(&format!(
            "{:>5}  {:>9.3}  {:>6.3}  {:>5.3}  {:>7}\n",
            class,
            report.precision[class],
            report.recall[class],
            report.f1_score[class],
            report.support(class)
        ));
    }

    let summary = report.summary();
    out.push_str(&format!(
        "\naccuracy {:.4}  macro precision {:.4}  macro recall {:.4}  macro f1 {:.4}\n",
        summary.accuracy, summary.precision, summary.recall, summary.f1_score
    ));
    out
}

fn handle_sessions(json: bool, workspace: &Path) -> anyhow::Result<()> {
    let store = SessionStore::load(&sessions_path(workspace))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&store.sessions)?);
        return Ok(());
    }
    if store.sessions.is_empty() {
        println!("No sessions recorded. Run `netlab train --record` to add one.");
        return Ok(());
    }

    println!("Recorded sessions ({}):", store.sessions.len());
    let best_id = store.best().map(|s| s.id.clone());
    for session in &store.sessions {
        let marker = if best_id.as_deref() == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            " {} {}  {:<16} epochs {:>3}/{:<3} best acc {:.4} (epoch {})  {}",
            marker,
            session.recorded_at.format("%Y-%m-%d %H:%M"),
            session.name.as_deref().unwrap_or("-"),
            session.epochs_run,
            session.epochs,
            session.best_accuracy,
            session.best_epoch + 1,
            if session.stopped_early() {
                "stopped early"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".netlab");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&EngineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_engine_config(workspace)?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
