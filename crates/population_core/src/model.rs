use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CalculationError;

pub type StateId = i64;
pub type TransitionId = i64;

/// Placeholder id for "no state": an unbounded reservoir that is never read and never written.
pub const EXTERNAL_STATE_ID: StateId = -1;

/// Largest source or operand coefficient a task may use. Power-law rates take the factorial of
/// these coefficients.
pub const MAX_COEFFICIENT: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: StateId,
    pub name: String,
    pub count: f64,
}

impl State {
    pub fn new(id: StateId, name: impl Into<String>, count: f64) -> Self {
        Self {
            id,
            name: name.into(),
            count,
        }
    }
}

/// How a transition's interaction term is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionType {
    /// Rate limited by the smaller of the two participants.
    Linear,
    /// Mass action normalised by the total population.
    Solute,
    /// Mass action normalised by the two participants only.
    Blend,
}

/// How a transition's value is applied to its participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionMode {
    Simple,
    Retaining,
    Removing,
    Residual,
    Inhibitor,
}

impl FromStr for TransitionType {
    type Err = CalculationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LINEAR" => Ok(Self::Linear),
            "SOLUTE" => Ok(Self::Solute),
            "BLEND" => Ok(Self::Blend),
            _ => Err(CalculationError::UnknownTransitionType(s.to_string())),
        }
    }
}

impl FromStr for TransitionMode {
    type Err = CalculationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(Self::Simple),
            "RETAINING" => Ok(Self::Retaining),
            "REMOVING" => Ok(Self::Removing),
            "RESIDUAL" => Ok(Self::Residual),
            "INHIBITOR" => Ok(Self::Inhibitor),
            _ => Err(CalculationError::UnknownTransitionMode(s.to_string())),
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linear => "LINEAR",
            Self::Solute => "SOLUTE",
            Self::Blend => "BLEND",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "SIMPLE",
            Self::Retaining => "RETAINING",
            Self::Removing => "REMOVING",
            Self::Residual => "RESIDUAL",
            Self::Inhibitor => "INHIBITOR",
        };
        f.write_str(name)
    }
}

fn unit_coefficient() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    #[serde(rename = "type")]
    pub transition_type: TransitionType,
    pub mode: TransitionMode,
    pub source: StateId,
    pub operand: StateId,
    pub result: StateId,
    #[serde(default = "unit_coefficient")]
    pub source_coefficient: f64,
    #[serde(default = "unit_coefficient")]
    pub operand_coefficient: f64,
    #[serde(default = "unit_coefficient")]
    pub result_coefficient: f64,
    #[serde(default)]
    pub source_delay: usize,
    #[serde(default)]
    pub operand_delay: usize,
    pub probability: f64,
}

impl Transition {
    /// A `SIMPLE` transition with unit coefficients and no delays.
    pub fn new(
        id: TransitionId,
        transition_type: TransitionType,
        source: StateId,
        operand: StateId,
        result: StateId,
        probability: f64,
    ) -> Self {
        Self {
            id,
            transition_type,
            mode: TransitionMode::Simple,
            source,
            operand,
            result,
            source_coefficient: 1.0,
            operand_coefficient: 1.0,
            result_coefficient: 1.0,
            source_delay: 0,
            operand_delay: 0,
            probability,
        }
    }

    pub fn with_mode(mut self, mode: TransitionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_coefficients(mut self, source: f64, operand: f64, result: f64) -> Self {
        self.source_coefficient = source;
        self.operand_coefficient = operand;
        self.result_coefficient = result;
        self
    }

    pub fn with_delays(mut self, source: usize, operand: usize) -> Self {
        self.source_delay = source;
        self.operand_delay = operand;
        self
    }

    pub fn max_delay(&self) -> usize {
        self.source_delay.max(self.operand_delay)
    }
}

/// A model to step: states, transitions, and how to run them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    /// Label of row 0. Only shifts reported step numbers.
    #[serde(default)]
    pub start_point: i64,
    pub steps_count: usize,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub higher_accuracy: bool,
    #[serde(default)]
    pub allow_negative: bool,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        states: Vec<State>,
        transitions: Vec<Transition>,
        steps_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            states,
            transitions,
            start_point: 0,
            steps_count,
            parallel: false,
            higher_accuracy: false,
            allow_negative: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_higher_accuracy(mut self, higher_accuracy: bool) -> Self {
        self.higher_accuracy = higher_accuracy;
        self
    }

    pub fn with_allow_negative(mut self, allow_negative: bool) -> Self {
        self.allow_negative = allow_negative;
        self
    }

    pub fn with_start_point(mut self, start_point: i64) -> Self {
        self.start_point = start_point;
        self
    }

    /// Largest source/operand delay over all transitions.
    pub fn max_delay(&self) -> usize {
        self.transitions
            .iter()
            .map(Transition::max_delay)
            .max()
            .unwrap_or(0)
    }

    /// Matrix column of every state, keyed by id.
    pub fn state_indices(&self) -> HashMap<StateId, usize> {
        self.states
            .iter()
            .enumerate()
            .map(|(index, state)| (state.id, index))
            .collect()
    }

    pub fn validate(&self) -> Result<(), CalculationError> {
        if self.steps_count == 0 {
            return Err(CalculationError::InvalidTask(
                "steps_count must be at least 1.".into(),
            ));
        }
        if self.states.is_empty() {
            return Err(CalculationError::InvalidTask(
                "a task needs at least one state.".into(),
            ));
        }
        let mut seen = HashSet::new();
        for state in &self.states {
            if state.id == EXTERNAL_STATE_ID {
                return Err(CalculationError::InvalidTask(format!(
                    "state \"{}\" uses the reserved external id {EXTERNAL_STATE_ID}.",
                    state.name
                )));
            }
            if !seen.insert(state.id) {
                return Err(CalculationError::DuplicateState(state.id));
            }
            if !state.count.is_finite() {
                return Err(CalculationError::InvalidTask(format!(
                    "state {} has a non-finite initial count.",
                    state.id
                )));
            }
        }
        for transition in &self.transitions {
            for endpoint in [transition.source, transition.operand, transition.result] {
                if endpoint != EXTERNAL_STATE_ID && !seen.contains(&endpoint) {
                    return Err(CalculationError::UnknownState {
                        transition: transition.id,
                        state: endpoint,
                    });
                }
            }
            let numbers = [
                transition.probability,
                transition.source_coefficient,
                transition.operand_coefficient,
                transition.result_coefficient,
            ];
            if numbers.iter().any(|value| !value.is_finite()) {
                return Err(CalculationError::InvalidTask(format!(
                    "transition {} has a non-finite probability or coefficient.",
                    transition.id
                )));
            }
            if transition.source_coefficient > MAX_COEFFICIENT
                || transition.operand_coefficient > MAX_COEFFICIENT
            {
                return Err(CalculationError::InvalidTask(format!(
                    "transition {} has a coefficient above {MAX_COEFFICIENT}.",
                    transition.id
                )));
            }
        }
        Ok(())
    }

    /// Copy of this task whose initial counts are the final row of `result`, starting where
    /// `result` ended.
    pub fn continued_from(&self, result: &CalculationResult) -> Task {
        let mut next = self.clone();
        for state in &mut next.states {
            if let Some(count) = result.final_count(state.id) {
                state.count = count;
            }
        }
        next.start_point = result.end_point();
        next
    }
}

/// Rows of state counts produced by one calculation. Row `k` is labelled `start_point + k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub start_point: i64,
    pub states: Vec<StateId>,
    pub rows: Vec<Vec<f64>>,
    /// First step whose row was copied forward instead of computed.
    pub stable_from: Option<usize>,
}

impl CalculationResult {
    pub fn steps(&self) -> usize {
        self.rows.len()
    }

    pub fn end_point(&self) -> i64 {
        self.start_point + self.rows.len().saturating_sub(1) as i64
    }

    pub fn row(&self, step: usize) -> Option<&[f64]> {
        self.rows.get(step).map(Vec::as_slice)
    }

    pub fn column(&self, id: StateId) -> Option<usize> {
        self.states.iter().position(|state| *state == id)
    }

    pub fn count(&self, step: usize, id: StateId) -> Option<f64> {
        let column = self.column(id)?;
        self.row(step).map(|row| row[column])
    }

    pub fn final_counts(&self) -> &[f64] {
        self.rows.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn final_count(&self, id: StateId) -> Option<f64> {
        let column = self.column(id)?;
        self.final_counts().get(column).copied()
    }

    /// Appends a continuation run. Its row 0 repeats this result's last row and is dropped.
    pub fn merge(mut self, next: CalculationResult) -> Result<Self, CalculationError> {
        if next.states != self.states {
            return Err(CalculationError::InvalidTask(
                "cannot merge results over different states.".into(),
            ));
        }
        if next.start_point != self.end_point() {
            return Err(CalculationError::InvalidTask(format!(
                "continuation starts at {} but the previous run ends at {}.",
                next.start_point,
                self.end_point()
            )));
        }
        let offset = self.rows.len().saturating_sub(1);
        if self.stable_from.is_none() {
            self.stable_from = next.stable_from.map(|step| step + offset);
        }
        self.rows.extend(next.rows.into_iter().skip(1));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_task() -> Task {
        Task::new(
            "pair",
            vec![State::new(1, "A", 10.0), State::new(2, "B", 0.0)],
            vec![Transition::new(7, TransitionType::Linear, 1, 1, 2, 0.5)],
            4,
        )
    }

    #[test]
    fn parses_type_and_mode_names() {
        assert_eq!("solute".parse::<TransitionType>().ok(), Some(TransitionType::Solute));
        assert_eq!(" INHIBITOR ".parse::<TransitionMode>().ok(), Some(TransitionMode::Inhibitor));
        assert!(matches!(
            "QUADRATIC".parse::<TransitionType>(),
            Err(CalculationError::UnknownTransitionType(name)) if name == "QUADRATIC"
        ));
        assert!(matches!(
            "KEEPING".parse::<TransitionMode>(),
            Err(CalculationError::UnknownTransitionMode(_))
        ));
    }

    #[test]
    fn validation_rejects_broken_tasks() {
        assert!(pair_task().validate().is_ok());

        let mut task = pair_task();
        task.states.push(State::new(1, "again", 1.0));
        assert!(matches!(task.validate(), Err(CalculationError::DuplicateState(1))));

        let mut task = pair_task();
        task.transitions[0].result = 99;
        assert!(matches!(
            task.validate(),
            Err(CalculationError::UnknownState { transition: 7, state: 99 })
        ));

        let mut task = pair_task();
        task.steps_count = 0;
        assert!(matches!(task.validate(), Err(CalculationError::InvalidTask(_))));

        let mut task = pair_task();
        task.states[0].count = f64::NAN;
        assert!(task.validate().is_err());

        let mut task = pair_task();
        task.transitions[0].operand_coefficient = 1e18;
        assert!(matches!(
            task.validate(),
            Err(CalculationError::InvalidTask(message)) if message.contains("coefficient above")
        ));
        task.transitions[0].operand_coefficient = MAX_COEFFICIENT;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn external_endpoints_are_valid() {
        let mut task = pair_task();
        task.transitions
            .push(Transition::new(8, TransitionType::Linear, EXTERNAL_STATE_ID, EXTERNAL_STATE_ID, 2, 1.0));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "name": "json",
            "states": [{"id": 1, "name": "A", "count": 3.0}],
            "transitions": [{
                "id": 1, "type": "BLEND", "mode": "RETAINING",
                "source": 1, "operand": -1, "result": 1, "probability": 0.25
            }],
            "steps_count": 5
        }"#;
        let task: Task = serde_json::from_str(json).expect("task json");
        let transition = &task.transitions[0];
        assert_eq!(transition.transition_type, TransitionType::Blend);
        assert_eq!(transition.mode, TransitionMode::Retaining);
        assert_eq!(transition.source_coefficient, 1.0);
        assert_eq!(transition.source_delay, 0);
        assert!(!task.higher_accuracy);
        assert_eq!(task.start_point, 0);
    }

    #[test]
    fn continuation_and_merge_line_up() {
        let first = CalculationResult {
            start_point: 0,
            states: vec![1, 2],
            rows: vec![vec![10.0, 0.0], vec![5.0, 5.0], vec![2.5, 7.5]],
            stable_from: None,
        };
        let next_task = pair_task().continued_from(&first);
        assert_eq!(next_task.start_point, 2);
        assert_eq!(next_task.states[0].count, 2.5);
        assert_eq!(next_task.states[1].count, 7.5);

        let second = CalculationResult {
            start_point: 2,
            states: vec![1, 2],
            rows: vec![vec![2.5, 7.5], vec![1.25, 8.75]],
            stable_from: Some(1),
        };
        let merged = first.merge(second).expect("merge");
        assert_eq!(merged.steps(), 4);
        assert_eq!(merged.end_point(), 3);
        assert_eq!(merged.count(3, 2), Some(8.75));
        assert_eq!(merged.stable_from, Some(3));
    }

    #[test]
    fn merge_rejects_gaps() {
        let first = CalculationResult {
            start_point: 0,
            states: vec![1],
            rows: vec![vec![1.0], vec![1.0]],
            stable_from: None,
        };
        let gap = CalculationResult {
            start_point: 5,
            states: vec![1],
            rows: vec![vec![1.0]],
            stable_from: None,
        };
        assert!(first.merge(gap).is_err());
    }
}
