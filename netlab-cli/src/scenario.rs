//! Synthetic loss curves and predictions for demo runs.

use netlab_train::model::EpochLogs;
use netlab_train::{ScriptedModel, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of a synthetic training curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Loss decays steadily for the whole run.
    Improving,
    /// Loss decays for a few epochs, then stalls.
    Plateau,
    /// Loss wanders with large epoch-to-epoch noise.
    Noisy,
}

/// Epoch logs for `epochs` epochs of `scenario`.
pub fn epoch_logs(scenario: Scenario, epochs: usize, validated: bool, seed: u64) -> Vec<EpochLogs> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut logs = Vec::with_capacity(epochs);
    let mut loss: f64 = 2.3;

    for epoch in 0..epochs {
        loss = match scenario {
            Scenario::Improving => (loss * 0.9 + rng.gen_range(-0.005..0.005)).max(0.01),
            Scenario::Plateau if epoch < 8 => loss * 0.8,
            Scenario::Plateau => loss + rng.gen_range(-0.0004..0.0004),
            Scenario::Noisy => (loss * 0.97 + rng.gen_range(-0.15..0.15)).clamp(0.05, 3.0),
        };
        let accuracy = accuracy_for(loss);
        let mut entry = EpochLogs::new(loss, accuracy);
        if validated {
            let gap = rng.gen_range(0.0..0.08);
            entry = entry.with_validation(loss + gap, (accuracy - gap / 2.0).max(0.0));
        }
        logs.push(entry);
    }
    logs
}

/// Scripted model that replays `scenario`.
pub fn model(scenario: Scenario, epochs: usize, validated: bool, seed: u64) -> ScriptedModel {
    ScriptedModel::new(epoch_logs(scenario, epochs, validated, seed))
}

fn accuracy_for(loss: f64) -> f64 {
    (1.0 - loss / 2.5).clamp(0.0, 1.0)
}

/// Synthetic classifier output: `(predictions, one-hot targets)`.
///
/// Each sample is classified correctly with probability `skill`.
pub fn classifier_output(
    classes: usize,
    samples: usize,
    skill: f64,
    seed: u64,
) -> anyhow::Result<(Tensor, Tensor)> {
    anyhow::ensure!(classes >= 2, "classes must be at least 2");
    let mut rng = StdRng::seed_from_u64(seed);
    let skill = skill.clamp(0.0, 1.0);

    let mut truth = Vec::with_capacity(samples);
    let mut rows = Vec::with_capacity(samples);
    for _ in 0..samples {
        let label = rng.gen_range(0..classes);
        let predicted = if rng.gen_bool(skill) {
            label
        } else {
            rng.gen_range(0..classes)
        };
        let mut row = vec![0.0f32; classes];
        for (class, value) in row.iter_mut().enumerate() {
            *value = if class == predicted {
                rng.gen_range(0.5..1.0)
            } else {
                rng.gen_range(0.0..0.3)
            };
        }
        truth.push(label);
        rows.push(row);
    }

    let predictions = if samples == 0 {
        Tensor::new(vec![0, classes], Vec::new())?
    } else {
        Tensor::from_rows(&rows)?
    };
    let targets = Tensor::one_hot(&truth, classes)?;
    Ok((predictions, targets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenarios_are_deterministic() {
        let a = epoch_logs(Scenario::Noisy, 20, true, 3);
        let b = epoch_logs(Scenario::Noisy, 20, true, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_plateau_stalls() {
        let logs = epoch_logs(Scenario::Plateau, 30, false, 1);
        let late = &logs[10..];
        let spread = late
            .iter()
            .map(|l| l.loss)
            .fold(f64::NEG_INFINITY, f64::max)
            - late.iter().map(|l| l.loss).fold(f64::INFINITY, f64::min);
        assert!(spread < 0.01);
        assert!(logs.iter().all(|l| l.val_loss.is_none()));
    }

    #[test]
    fn test_classifier_output_shapes() {
        let (predictions, targets) = classifier_output(4, 50, 0.9, 11).unwrap();
        assert_eq!(predictions.shape(), &[50, 4]);
        assert_eq!(targets.shape(), &[50, 4]);
    }
}
