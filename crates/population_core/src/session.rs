//! Host-facing entry points: synchronous runs and runs on a worker thread.
//!
//! Worker runs report through an `mpsc` channel. Sending never blocks, and a host that dropped
//! its receiver simply stops hearing about the run.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::warn;

use crate::analysis::{self, AnalysisSettings, DominanceReport};
use crate::calculator::{CalculationSettings, Calculator};
use crate::error::CalculationError;
use crate::model::{CalculationResult, StateId, Task};
use crate::traits::ProgressListener;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<R> {
    Progress(f64),
    Completed(R),
    /// Display of the full error chain.
    Failed(String),
}

struct ChannelListener<R> {
    sender: Sender<SessionEvent<R>>,
}

impl<R> ChannelListener<R> {
    fn send(&self, event: SessionEvent<R>) {
        let _ = self.sender.send(event);
    }

    fn finish(&self, outcome: &Result<R>)
    where
        R: Clone,
    {
        match outcome {
            Ok(value) => self.send(SessionEvent::Completed(value.clone())),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "Worker run failed.");
                self.send(SessionEvent::Failed(format!("{err:#}")));
            }
        }
    }
}

impl<R> ProgressListener for ChannelListener<R> {
    fn on_progress(&self, fraction: f64) {
        self.send(SessionEvent::Progress(fraction));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn join_worker<R>(worker: JoinHandle<Result<R>>, what: &str) -> Result<R> {
    match worker.join() {
        Ok(outcome) => outcome,
        Err(payload) => Err(CalculationError::Worker(format!(
            "{what} worker panicked: {}",
            panic_message(payload)
        ))
        .into()),
    }
}

pub fn run_calculation(
    task: &Task,
    settings: &CalculationSettings,
    listener: &dyn ProgressListener,
) -> Result<CalculationResult> {
    let mut calculator = Calculator::new(task, settings.clone())
        .with_context(|| format!("Failed to prepare task \"{}\".", task.name))?;
    calculator
        .calculate(listener)
        .with_context(|| format!("Calculation of task \"{}\" failed.", task.name))?;
    Ok(calculator.into_result())
}

pub struct CalculationHandle {
    events: Receiver<SessionEvent<CalculationResult>>,
    worker: JoinHandle<Result<CalculationResult>>,
}

impl CalculationHandle {
    pub fn events(&self) -> &Receiver<SessionEvent<CalculationResult>> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<CalculationResult> {
        join_worker(self.worker, "Calculation")
    }
}

/// Runs a snapshot of `task` on a worker thread. Later edits to `task` do not reach the run.
pub fn spawn_calculation(task: &Task, settings: CalculationSettings) -> Result<CalculationHandle> {
    let mut calculator = Calculator::snapshot(task, settings)
        .with_context(|| format!("Failed to prepare task \"{}\".", task.name))?;
    let name = task.name.clone();
    let (sender, events) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("population-calculation".into())
        .spawn(move || {
            let listener = ChannelListener { sender };
            let outcome = calculator
                .calculate(&listener)
                .with_context(|| format!("Calculation of task \"{name}\" failed."))
                .map(|()| calculator.into_result());
            listener.finish(&outcome);
            outcome
        })
        .context("Failed to start the calculation worker.")?;
    Ok(CalculationHandle { events, worker })
}

pub fn run_analysis(
    task: &Task,
    analysed_states: &[StateId],
    calculation: &CalculationSettings,
    settings: &AnalysisSettings,
    listener: &dyn ProgressListener,
    should_stop: &dyn Fn() -> bool,
) -> Result<Option<DominanceReport>> {
    analysis::analyse(task, analysed_states, calculation, settings, listener, should_stop)
        .with_context(|| format!("Analysis of task \"{}\" failed.", task.name))
}

pub struct AnalysisHandle {
    events: Receiver<SessionEvent<Option<DominanceReport>>>,
    stop: Arc<AtomicBool>,
    worker: JoinHandle<Result<Option<DominanceReport>>>,
}

impl AnalysisHandle {
    pub fn events(&self) -> &Receiver<SessionEvent<Option<DominanceReport>>> {
        &self.events
    }

    /// Asks the worker to stop before its next batch.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<Option<DominanceReport>> {
        join_worker(self.worker, "Analysis")
    }
}

pub fn spawn_analysis(
    task: &Task,
    analysed_states: &[StateId],
    calculation: CalculationSettings,
    settings: AnalysisSettings,
) -> Result<AnalysisHandle> {
    let task = task.clone();
    let analysed_states = analysed_states.to_vec();
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let (sender, events) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("population-analysis".into())
        .spawn(move || {
            let listener = ChannelListener { sender };
            let should_stop = || worker_stop.load(Ordering::Relaxed);
            let outcome = run_analysis(
                &task,
                &analysed_states,
                &calculation,
                &settings,
                &listener,
                &should_stop,
            );
            listener.finish(&outcome);
            outcome
        })
        .context("Failed to start the analysis worker.")?;
    Ok(AnalysisHandle {
        events,
        stop,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{State, Transition, TransitionType};
    use crate::traits::NoProgress;

    fn decay(steps: usize) -> Task {
        Task::new(
            "decay",
            vec![State::new(1, "A", 100.0), State::new(2, "B", 0.0)],
            vec![Transition::new(1, TransitionType::Linear, 1, 1, 2, 0.5)],
            steps,
        )
    }

    #[test]
    fn synchronous_failure_carries_context() {
        let mut task = decay(3);
        task.transitions[0].result = 5;
        let err = run_calculation(&task, &CalculationSettings::default(), &NoProgress)
            .expect_err("unknown state");
        let chain = format!("{err:#}");
        assert!(chain.contains("Failed to prepare task \"decay\""), "{chain}");
        assert!(chain.contains("unknown state 5"), "{chain}");
    }

    #[test]
    fn worker_streams_progress_then_result() {
        let handle = spawn_calculation(&decay(50), CalculationSettings::default()).expect("spawn");
        let CalculationHandle { events, worker } = handle;
        let result = join_worker(worker, "Calculation").expect("worker result");
        let events: Vec<_> = events.try_iter().collect();
        assert!(matches!(events.first(), Some(SessionEvent::Progress(p)) if *p == 0.0));
        assert!(matches!(events.last(), Some(SessionEvent::Completed(_))));
        assert_eq!(result.steps(), 50);
    }

    #[test]
    fn dropped_receiver_does_not_fail_the_run() {
        let CalculationHandle { events, worker } =
            spawn_calculation(&decay(20), CalculationSettings::default()).expect("spawn");
        drop(events);
        let result = join_worker(worker, "Calculation").expect("worker result");
        let b = result.final_count(2).expect("B");
        assert!((b - (100.0 - 100.0 * 0.5f64.powi(19))).abs() < 1e-9, "{b}");
    }

    #[test]
    fn analysis_worker_can_be_stopped() {
        let mut task = decay(100_000);
        task.transitions[0].probability = 1e-9;
        let settings = AnalysisSettings {
            batch_size: 1,
            predict_trends: false,
            ..AnalysisSettings::default()
        };
        let handle = spawn_analysis(&task, &[1, 2], CalculationSettings::default(), settings)
            .expect("spawn");
        handle.request_stop();
        assert_eq!(handle.join().expect("analysis"), None);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let worker = thread::spawn(|| -> Result<()> { panic!("boom") });
        let err = join_worker(worker, "Test").expect_err("panicked");
        assert!(err.to_string().contains("boom"));
    }
}
