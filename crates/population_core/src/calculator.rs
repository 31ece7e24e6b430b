use std::borrow::Cow;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CalculationError;
use crate::model::{CalculationResult, Task};
use crate::numeric::Decimal;
use crate::stability::StabilityTracker;
use crate::stepper::{PreparedTransition, Stepper};
use crate::traits::{Count, ProgressListener, RowHistory};

/// Largest scale accepted for stored rows; beyond it `f64` carries no more digits anyway.
const MAX_SCALE: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationSettings {
    /// Fractional digits kept in stored rows.
    pub scale: u32,
    /// Minimum progress increase between two listener notifications.
    pub progress_threshold: f64,
}

impl Default for CalculationSettings {
    fn default() -> Self {
        Self {
            scale: 16,
            progress_threshold: 0.01,
        }
    }
}

impl CalculationSettings {
    pub fn validate(&self) -> Result<(), CalculationError> {
        if self.scale > MAX_SCALE {
            return Err(CalculationError::InvalidSettings(format!(
                "scale must not exceed {MAX_SCALE}."
            )));
        }
        if !(0.0..1.0).contains(&self.progress_threshold) {
            return Err(CalculationError::InvalidSettings(
                "progress_threshold must be in [0, 1).".into(),
            ));
        }
        Ok(())
    }
}

/// The most recent full-precision rows of a higher-accuracy run.
#[derive(Debug, Clone)]
pub struct RowWindow<T> {
    first_step: usize,
    rows: VecDeque<Vec<T>>,
    capacity: usize,
}

impl<T> RowWindow<T> {
    pub fn new(initial: Vec<T>, capacity: usize) -> Self {
        let mut rows = VecDeque::with_capacity(capacity);
        rows.push_back(initial);
        Self {
            first_step: 0,
            rows,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, row: Vec<T>) {
        if self.rows.len() == self.capacity {
            self.rows.pop_front();
            self.first_step += 1;
        }
        self.rows.push_back(row);
    }

    pub fn last_step(&self) -> usize {
        self.first_step + self.rows.len() - 1
    }
}

impl<T: Count> RowHistory<T> for RowWindow<T> {
    fn row(&self, step: usize) -> &[T] {
        debug_assert!(step >= self.first_step, "step {step} left the row window");
        &self.rows[step - self.first_step]
    }
}

enum Engine {
    Standard(Stepper<f64>),
    Higher {
        stepper: Stepper<Decimal>,
        window: RowWindow<Decimal>,
    },
}

/// Steps a task row by row, in batches, keeping the full history as `f64` rows.
///
/// The calculator works either on a live reference to the caller's task or on its own snapshot
/// (see [`Calculator::snapshot`]); a snapshot can be moved to another thread.
pub struct Calculator<'a> {
    task: Cow<'a, Task>,
    settings: CalculationSettings,
    engine: Engine,
    stability: StabilityTracker,
    rows: Vec<Vec<f64>>,
    last_reported: Option<f64>,
}

impl<'a> Calculator<'a> {
    pub fn new(task: &'a Task, settings: CalculationSettings) -> Result<Self, CalculationError> {
        Self::build(Cow::Borrowed(task), settings)
    }

    fn build(task: Cow<'a, Task>, settings: CalculationSettings) -> Result<Self, CalculationError> {
        task.validate()?;
        settings.validate()?;
        let transitions = PreparedTransition::prepare(&task)?;
        let max_delay = task.max_delay();
        let initial: Vec<f64> = task.states.iter().map(|state| state.count).collect();

        let engine = if task.higher_accuracy {
            let first = initial.iter().map(|count| <Decimal as Count>::from_f64(*count)).collect();
            Engine::Higher {
                stepper: Stepper::new(transitions, task.parallel, task.allow_negative),
                window: RowWindow::new(first, max_delay + 2),
            }
        } else {
            Engine::Standard(Stepper::new(transitions, task.parallel, task.allow_negative))
        };

        debug!(
            task = %task.name,
            states = task.states.len(),
            transitions = task.transitions.len(),
            steps = task.steps_count,
            max_delay,
            higher_accuracy = task.higher_accuracy,
            parallel = task.parallel,
            "Prepared calculation."
        );

        let mut rows = Vec::with_capacity(task.steps_count);
        rows.push(initial);
        Ok(Self {
            stability: StabilityTracker::new(max_delay, settings.scale),
            task,
            settings,
            engine,
            rows,
            last_reported: None,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn settings(&self) -> &CalculationSettings {
        &self.settings
    }

    pub fn max_delay(&self) -> usize {
        self.task.max_delay()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows available, row 0 included.
    pub fn steps_calculated(&self) -> usize {
        self.rows.len()
    }

    pub fn is_finished(&self) -> bool {
        self.rows.len() >= self.task.steps_count
    }

    pub fn is_task_stable(&self) -> bool {
        self.stability.is_stable()
    }

    pub fn stable_from(&self) -> Option<usize> {
        self.stability.stable_from()
    }

    /// Computes up to `batch` more rows and returns how many were added.
    pub fn calculate_steps(
        &mut self,
        batch: usize,
        listener: &dyn ProgressListener,
    ) -> Result<usize, CalculationError> {
        if self.last_reported.is_none() {
            self.report(0, listener);
        }
        let mut added = 0;
        while added < batch && !self.is_finished() {
            let step = self.rows.len();
            self.calculate_step(step)?;
            self.report(step, listener);
            added += 1;
        }
        Ok(added)
    }

    /// Computes every remaining row.
    pub fn calculate(&mut self, listener: &dyn ProgressListener) -> Result<(), CalculationError> {
        let remaining = self.task.steps_count.saturating_sub(self.rows.len());
        self.calculate_steps(remaining, listener)?;
        Ok(())
    }

    fn calculate_step(&mut self, step: usize) -> Result<(), CalculationError> {
        if self.stability.detect(&self.rows, step) {
            let last = self.rows[step - 1].clone();
            self.rows.push(last);
            return Ok(());
        }

        let allow_negative = self.task.allow_negative;
        let mut row = match &mut self.engine {
            Engine::Standard(stepper) => stepper.next_row(self.rows.as_slice(), step)?,
            Engine::Higher { stepper, window } => {
                let mut exact = stepper.next_row(&*window, step)?;
                self.stability.snap_decimal_row(&mut exact, allow_negative);
                let projected = self.stability.project_decimal_row(&exact);
                window.push(exact);
                projected
            }
        };
        self.stability.round_row(&mut row, allow_negative);
        self.rows.push(row);
        Ok(())
    }

    fn report(&mut self, step: usize, listener: &dyn ProgressListener) {
        let last_step = self.task.steps_count.saturating_sub(1);
        let fraction = if last_step == 0 {
            1.0
        } else {
            step as f64 / last_step as f64
        };
        let due = match self.last_reported {
            None => true,
            Some(previous) => step == last_step || fraction - previous > self.settings.progress_threshold,
        };
        if due && self.last_reported != Some(fraction) {
            self.last_reported = Some(fraction);
            listener.on_progress(fraction);
        }
    }

    pub fn result(&self) -> CalculationResult {
        CalculationResult {
            start_point: self.task.start_point,
            states: self.task.states.iter().map(|state| state.id).collect(),
            rows: self.rows.clone(),
            stable_from: self.stability.stable_from(),
        }
    }

    pub fn into_result(self) -> CalculationResult {
        CalculationResult {
            start_point: self.task.start_point,
            states: self.task.states.iter().map(|state| state.id).collect(),
            rows: self.rows,
            stable_from: self.stability.stable_from(),
        }
    }
}

impl Calculator<'static> {
    /// Calculator over an owned task.
    pub fn owned(task: Task, settings: CalculationSettings) -> Result<Self, CalculationError> {
        Self::build(Cow::Owned(task), settings)
    }

    /// Calculator over a private copy of `task`, unaffected by later edits to the original.
    pub fn snapshot(task: &Task, settings: CalculationSettings) -> Result<Self, CalculationError> {
        Self::owned(task.clone(), settings)
    }
}
