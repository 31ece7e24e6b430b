use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calculator::{CalculationSettings, Calculator};
use crate::model::{StateId, Task, TransitionId};
use crate::traits::{NoProgress, ProgressListener};

/// Task input varied by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    Probability(TransitionId),
    InitialCount(StateId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub value: f64,
    pub final_counts: Vec<f64>,
    pub stable_from: Option<usize>,
}

impl SweepParameter {
    fn apply(self, task: &mut Task, value: f64) -> Result<()> {
        match self {
            SweepParameter::Probability(id) => {
                let Some(transition) = task.transitions.iter_mut().find(|t| t.id == id) else {
                    bail!("Transition {id} does not exist.");
                };
                transition.probability = value;
            }
            SweepParameter::InitialCount(id) => {
                let Some(state) = task.states.iter_mut().find(|s| s.id == id) else {
                    bail!("State {id} does not exist.");
                };
                state.count = value;
            }
        }
        Ok(())
    }
}

/// Runs one independent calculation per value, each on its own copy of `task`, and collects
/// the final counts. `listener` hears the fraction of points done.
pub fn sweep(
    task: &Task,
    parameter: SweepParameter,
    values: &[f64],
    settings: &CalculationSettings,
    listener: &dyn ProgressListener,
) -> Result<Vec<SweepPoint>> {
    if values.is_empty() {
        bail!("Sweep requires at least one parameter value.");
    }
    if let Some(value) = values.iter().find(|value| !value.is_finite()) {
        bail!("Sweep value {value} is not finite.");
    }

    let mut points = Vec::with_capacity(values.len());
    for (index, &value) in values.iter().enumerate() {
        let mut variant = task.clone();
        parameter.apply(&mut variant, value)?;
        let mut calculator = Calculator::owned(variant, settings.clone())
            .with_context(|| format!("Failed to prepare sweep point {value}."))?;
        calculator
            .calculate(&NoProgress)
            .with_context(|| format!("Sweep point {value} failed."))?;
        let result = calculator.into_result();
        debug!(value, steps = result.steps(), stable_from = ?result.stable_from, "Sweep point done.");
        points.push(SweepPoint {
            value,
            final_counts: result.final_counts().to_vec(),
            stable_from: result.stable_from,
        });
        listener.on_progress((index + 1) as f64 / values.len() as f64);
    }
    Ok(points)
}
