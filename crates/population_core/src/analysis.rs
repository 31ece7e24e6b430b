//! Prediction of which states dominate a task.
//!
//! The analyser watches a calculation batch by batch. After each batch it refreshes the
//! dependency graph (which states can still change, in which direction) and decides whether the
//! run has finished in a recognisable way: the task is stable, every trend is known, or the
//! budget ran out on an oscillating task. Once a reason allows a prediction, the analysed states
//! are ordered into dominance tiers.

pub mod dominance;
pub mod graph;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calculator::{CalculationSettings, Calculator};
use crate::error::CalculationError;
use crate::model::{StateId, Task};
use crate::traits::ProgressListener;
use graph::{DependencyGraph, StateVertex, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Steps computed between two analyser updates.
    pub batch_size: usize,
    /// Stop as soon as every trend is determined instead of waiting for stability.
    pub predict_trends: bool,
    /// Largest difference still treated as "unchanged".
    pub stability_epsilon: f64,
    /// Minimum share of the total a state needs to count as dominant when the task is stable.
    pub dominance_share: f64,
    /// Relative difference under which stable values tie.
    pub tie_tolerance: f64,
    /// Relative difference under which cyclic areas tie.
    pub cyclic_tolerance: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            predict_trends: true,
            stability_epsilon: 1e-10,
            dominance_share: 0.01,
            tie_tolerance: 1e-6,
            cyclic_tolerance: 0.1,
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<(), CalculationError> {
        if self.batch_size == 0 {
            return Err(CalculationError::InvalidSettings(
                "batch_size must be at least 1.".into(),
            ));
        }
        let tolerances = [
            self.stability_epsilon,
            self.dominance_share,
            self.tie_tolerance,
            self.cyclic_tolerance,
        ];
        if tolerances.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(CalculationError::InvalidSettings(
                "tolerances must be finite and non-negative.".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationFinishedReason {
    TaskStable,
    AllStatesTrendsIdentified,
    TaskCyclic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominanceReport {
    pub reason: CalculationFinishedReason,
    /// Tiers of analysed states, least dominant first.
    pub tiers: Vec<Vec<StateId>>,
    pub steps_calculated: usize,
}

impl DominanceReport {
    /// The most dominant tier.
    pub fn dominant(&self) -> &[StateId] {
        self.tiers.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct TaskAnalyser {
    settings: AnalysisSettings,
    graph: DependencyGraph,
    analysed: Vec<usize>,
    max_delay: usize,
    reason: Option<CalculationFinishedReason>,
    directions: StepDirections,
}

impl TaskAnalyser {
    /// Builds the dependency graph of `task`. Only `analysed_states` are ranked.
    pub fn new(
        task: &Task,
        analysed_states: &[StateId],
        settings: AnalysisSettings,
    ) -> Result<Self, CalculationError> {
        settings.validate()?;
        let graph = DependencyGraph::build(task)?;
        let analysed = analysed_states
            .iter()
            .map(|&id| {
                graph.vertex_of(id).ok_or_else(|| {
                    CalculationError::InvalidTask(format!("analysed state {id} is not in the task."))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            graph,
            analysed,
            max_delay: task.max_delay(),
            reason: None,
            directions: StepDirections::new(settings.stability_epsilon),
            settings,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn reason(&self) -> Option<CalculationFinishedReason> {
        self.reason
    }

    /// Re-evaluates the graph against the rows computed so far.
    ///
    /// `rows` is expected to grow by appending between calls; only the new rows are scanned for
    /// trends. `task_stable` is the calculator's own stability verdict and `budget_exhausted`
    /// tells whether no more rows will come.
    pub fn update(&mut self, rows: &[Vec<f64>], task_stable: bool, budget_exhausted: bool) {
        if rows.is_empty() {
            return;
        }
        self.directions.extend(rows);
        self.graph.resolve_changeability(rows);
        self.assign_trends(rows);

        let all_locally_stable = rows.len() >= self.max_delay + 2
            && self
                .graph
                .states
                .iter()
                .filter(|state| !state.is_external())
                .all(|state| state.locally_stable);

        self.reason = if task_stable || all_locally_stable {
            Some(CalculationFinishedReason::TaskStable)
        } else if budget_exhausted && self.oscillates_with_period_two(rows) {
            Some(CalculationFinishedReason::TaskStable)
        } else if self.settings.predict_trends && self.all_trends_identified() {
            Some(CalculationFinishedReason::AllStatesTrendsIdentified)
        } else if budget_exhausted {
            Some(CalculationFinishedReason::TaskCyclic)
        } else {
            None
        };
        debug!(steps = rows.len(), reason = ?self.reason, "Analyser updated.");
    }

    fn assign_trends(&mut self, rows: &[Vec<f64>]) {
        let epsilon = self.settings.stability_epsilon;
        let window = self.max_delay + 2;
        let trends: Vec<(Trend, bool)> = self
            .graph
            .states
            .iter()
            .map(|state| {
                let Some(column) = state.column else {
                    return (Trend::Stable, true);
                };
                let locally_stable = rows.len() >= window
                    && unchanged(rows[rows.len() - window..].iter().map(|row| row[column]), epsilon);
                (self.trend_of_vertex(state, column), locally_stable)
            })
            .collect();
        for (state, (trend, locally_stable)) in self.graph.states.iter_mut().zip(trends) {
            state.trend = trend;
            state.locally_stable = locally_stable;
        }

        let can_be_stable: Vec<bool> = (0..self.graph.states.len())
            .map(|vertex| {
                let state = &self.graph.states[vertex];
                state.trend != Trend::Decrease
                    || !state.decreased_by.iter().any(|&transition| {
                        self.graph.transitions[transition].invokable && self.graph.drains(transition, vertex)
                    })
            })
            .collect();
        for (state, value) in self.graph.states.iter_mut().zip(can_be_stable) {
            state.can_be_stable = value;
        }
    }

    fn trend_of_vertex(&self, state: &StateVertex, column: usize) -> Trend {
        if !state.can_change {
            return Trend::Stable;
        }
        let fires = |transitions: &[usize]| {
            transitions
                .iter()
                .any(|&transition| self.graph.transitions[transition].invokable)
        };
        match (fires(&state.increased_by), fires(&state.decreased_by)) {
            (true, false) => Trend::Increase,
            (false, true) => Trend::Decrease,
            (false, false) => Trend::Stable,
            (true, true) => self.directions.back_half_trend(column),
        }
    }

    fn oscillates_with_period_two(&self, rows: &[Vec<f64>]) -> bool {
        if rows.len() < 4 {
            return false;
        }
        let epsilon = self.settings.stability_epsilon;
        let n = rows.len();
        self.analysed
            .iter()
            .map(|&vertex| &self.graph.states[vertex])
            .filter(|state| state.is_alive())
            .filter_map(|state| state.column)
            .all(|column| {
                (rows[n - 1][column] - rows[n - 3][column]).abs() <= epsilon
                    && (rows[n - 2][column] - rows[n - 4][column]).abs() <= epsilon
            })
    }

    fn all_trends_identified(&self) -> bool {
        !self.graph.states.iter().any(|state| {
            !state.is_external()
                && state.is_alive()
                && !state.locally_stable
                && (state.trend == Trend::Any || (state.trend == Trend::Decrease && state.can_be_stable))
        })
    }

    fn analysed_states(&self) -> impl Iterator<Item = &StateVertex> {
        self.analysed
            .iter()
            .map(move |&vertex| &self.graph.states[vertex])
            .filter(|state| state.is_alive())
    }

    pub fn can_predict_dominant_states(&self) -> bool {
        match self.reason {
            Some(CalculationFinishedReason::TaskStable | CalculationFinishedReason::TaskCyclic) => true,
            Some(CalculationFinishedReason::AllStatesTrendsIdentified) => {
                let increasing: Vec<&StateVertex> = self
                    .analysed_states()
                    .filter(|state| state.trend == Trend::Increase)
                    .collect();
                let [leader] = increasing.as_slice() else {
                    return false;
                };
                self.analysed_states()
                    .filter(|state| state.trend == Trend::Decrease && state.can_be_stable)
                    .all(|state| state.count < leader.count)
            }
            None => false,
        }
    }

    /// Dominance tiers of the analysed states, least dominant first, read against the rows of
    /// the last update. Empty until a finishing reason has been found.
    pub fn dominants_ordered(&self, rows: &[Vec<f64>]) -> Vec<Vec<StateId>> {
        match self.reason {
            Some(CalculationFinishedReason::TaskStable) => {
                dominance::stable_tiers(&self.graph, &self.analysed, rows, &self.settings)
            }
            Some(CalculationFinishedReason::AllStatesTrendsIdentified) => {
                dominance::trend_tiers(&self.graph, &self.analysed)
            }
            Some(CalculationFinishedReason::TaskCyclic) => {
                dominance::cyclic_tiers(&self.graph, &self.analysed, rows, &self.settings)
            }
            None => Vec::new(),
        }
    }

    /// Predicted trend of one analysed state.
    pub fn trend_of(&self, id: StateId) -> Result<Trend, CalculationError> {
        if !self.settings.predict_trends {
            return Err(CalculationError::NotInTrendMode);
        }
        let vertex = self
            .graph
            .vertex_of(id)
            .ok_or_else(|| CalculationError::InvalidTask(format!("state {id} is not in the task.")))?;
        Ok(self.graph.states[vertex].trend)
    }

    /// Predicted trends of all analysed states.
    pub fn trends(&self) -> Result<Vec<(StateId, Trend)>, CalculationError> {
        if !self.settings.predict_trends {
            return Err(CalculationError::NotInTrendMode);
        }
        Ok(self
            .analysed
            .iter()
            .map(|&vertex| {
                let state = &self.graph.states[vertex];
                (state.id, state.trend)
            })
            .collect())
    }

    pub fn report(&self, rows: &[Vec<f64>]) -> Option<DominanceReport> {
        self.reason.map(|reason| DominanceReport {
            reason,
            tiers: self.dominants_ordered(rows),
            steps_calculated: rows.len(),
        })
    }
}

fn unchanged(mut values: impl Iterator<Item = f64>, epsilon: f64) -> bool {
    let Some(first) = values.next() else {
        return true;
    };
    values.all(|value| (value - first).abs() <= epsilon)
}

/// Latest rising and falling step of every column. Kept current as rows are appended, so the
/// direction over the back half of the rows is known without rescanning them.
#[derive(Debug, Clone)]
struct StepDirections {
    epsilon: f64,
    scanned: usize,
    /// Last scanned row, to notice a history that was replaced rather than extended.
    last_row: Vec<f64>,
    last_rising: Vec<Option<usize>>,
    last_falling: Vec<Option<usize>>,
}

impl StepDirections {
    fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            scanned: 0,
            last_row: Vec::new(),
            last_rising: Vec::new(),
            last_falling: Vec::new(),
        }
    }

    fn extend(&mut self, rows: &[Vec<f64>]) {
        let continues = self.scanned > 0
            && rows.len() >= self.scanned
            && rows[self.scanned - 1] == self.last_row;
        if !continues {
            let columns = rows.first().map_or(0, Vec::len);
            self.scanned = 0;
            self.last_rising = vec![None; columns];
            self.last_falling = vec![None; columns];
        }
        // a step is named by the row it lands on
        for step in self.scanned.max(1)..rows.len() {
            for (column, (before, after)) in rows[step - 1].iter().zip(&rows[step]).enumerate() {
                let delta = after - before;
                if delta > self.epsilon {
                    self.last_rising[column] = Some(step);
                }
                if delta < -self.epsilon {
                    self.last_falling[column] = Some(step);
                }
            }
        }
        if let Some(last) = rows.last() {
            self.last_row = last.clone();
            self.scanned = rows.len();
        }
    }

    /// Direction of `column` over the steps inside the back half `rows[n / 2..]`.
    fn back_half_trend(&self, column: usize) -> Trend {
        let n = self.scanned;
        if n - n / 2 < 2 {
            return Trend::Any;
        }
        let recent = |last: &[Option<usize>]| last[column].is_some_and(|step| step > n / 2);
        match (recent(&self.last_rising), recent(&self.last_falling)) {
            (true, false) => Trend::Increase,
            (false, true) => Trend::Decrease,
            (false, false) => Trend::Stable,
            (true, true) => Trend::Any,
        }
    }
}

/// Runs `task` in batches until the analyser can predict the dominant states, the step budget
/// runs out, or `should_stop` asks to stop. Returns `None` when stopped early.
pub fn analyse(
    task: &Task,
    analysed_states: &[StateId],
    calculation: &CalculationSettings,
    settings: &AnalysisSettings,
    listener: &dyn ProgressListener,
    should_stop: &dyn Fn() -> bool,
) -> Result<Option<DominanceReport>, CalculationError> {
    let mut analyser = TaskAnalyser::new(task, analysed_states, settings.clone())?;
    let mut calculator = Calculator::new(task, calculation.clone())?;

    loop {
        if should_stop() {
            info!(task = %task.name, steps = calculator.steps_calculated(), "Analysis stopped.");
            return Ok(None);
        }
        calculator.calculate_steps(settings.batch_size, listener)?;
        analyser.update(
            calculator.rows(),
            calculator.is_task_stable(),
            calculator.is_finished(),
        );
        if analyser.can_predict_dominant_states() || calculator.is_finished() {
            break;
        }
    }

    let report = analyser.report(calculator.rows());
    if let Some(report) = &report {
        info!(
            task = %task.name,
            reason = ?report.reason,
            steps = report.steps_calculated,
            tiers = report.tiers.len(),
            "Analysis finished."
        );
    }
    if !calculator.is_finished() {
        listener.on_progress(1.0);
    }
    Ok(report)
}
