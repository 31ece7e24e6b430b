//! Dependency graph between states and transitions.
//!
//! States and transitions live in two arenas and refer to each other by index. A transition
//! depends on the states it reads (source and operand, with their delays) and affects the states
//! it writes. The external state gets its own vertex; it is always alive and never analysed.

use serde::Serialize;

use crate::error::CalculationError;
use crate::model::{StateId, Task, TransitionId, TransitionMode, EXTERNAL_STATE_ID};
use crate::stepper::PreparedTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Increase,
    Decrease,
    Stable,
    /// Both directions are possible and the rows do not settle the question.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Influence {
    Increase,
    Decrease,
}

#[derive(Debug, Clone)]
pub struct StateVertex {
    pub id: StateId,
    /// Matrix column, `None` for the external vertex.
    pub column: Option<usize>,
    pub increased_by: Vec<usize>,
    pub decreased_by: Vec<usize>,
    pub count: f64,
    pub can_change: bool,
    pub trend: Trend,
    pub can_be_stable: bool,
    pub locally_stable: bool,
}

impl StateVertex {
    fn new(id: StateId, column: Option<usize>) -> Self {
        Self {
            id,
            column,
            increased_by: Vec::new(),
            decreased_by: Vec::new(),
            count: 0.0,
            can_change: column.is_none(),
            trend: Trend::Stable,
            can_be_stable: true,
            locally_stable: false,
        }
    }

    pub fn is_external(&self) -> bool {
        self.column.is_none()
    }

    /// Has a non-zero count now or can still get one.
    pub fn is_alive(&self) -> bool {
        self.is_external() || self.count != 0.0 || self.can_change
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub vertex: usize,
    pub delay: usize,
}

#[derive(Debug, Clone)]
pub struct TransitionVertex {
    pub id: TransitionId,
    pub probability: f64,
    pub dependencies: Vec<Dependency>,
    pub effects: Vec<(usize, Influence)>,
    pub invokable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Resolved(bool),
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub states: Vec<StateVertex>,
    pub transitions: Vec<TransitionVertex>,
    external: usize,
}

impl DependencyGraph {
    pub fn build(task: &Task) -> Result<Self, CalculationError> {
        let prepared = PreparedTransition::prepare(task)?;
        let mut states: Vec<StateVertex> = task
            .states
            .iter()
            .enumerate()
            .map(|(column, state)| StateVertex::new(state.id, Some(column)))
            .collect();
        let external = states.len();
        states.push(StateVertex::new(EXTERNAL_STATE_ID, None));
        let vertex = |column: Option<usize>| column.unwrap_or(external);

        let mut transitions = Vec::with_capacity(prepared.len());
        for (index, transition) in prepared.iter().enumerate() {
            let mut dependencies = Vec::new();
            let mut effects = Vec::new();
            if !transition.is_noop() {
                dependencies.push(Dependency {
                    vertex: vertex(transition.source),
                    delay: transition.source_delay,
                });
                if !transition.is_self_interaction() || transition.operand_delay != transition.source_delay {
                    dependencies.push(Dependency {
                        vertex: vertex(transition.operand),
                        delay: transition.operand_delay,
                    });
                }

                if transition.mode == TransitionMode::Removing {
                    if let Some(column) = transition.source {
                        effects.push((column, Influence::Decrease));
                    }
                }
                let operand_debited = match transition.mode {
                    TransitionMode::Retaining => false,
                    TransitionMode::Removing => !transition.is_self_interaction(),
                    _ => true,
                };
                if operand_debited {
                    if let Some(column) = transition.operand {
                        effects.push((column, Influence::Decrease));
                    }
                }
                if transition.result_coefficient != 0.0 {
                    if let Some(column) = transition.result {
                        effects.push((column, Influence::Increase));
                    }
                }
            }

            for &(column, influence) in &effects {
                let list = match influence {
                    Influence::Increase => &mut states[column].increased_by,
                    Influence::Decrease => &mut states[column].decreased_by,
                };
                if !list.contains(&index) {
                    list.push(index);
                }
            }
            transitions.push(TransitionVertex {
                id: transition.id,
                probability: transition.probability,
                dependencies,
                effects,
                invokable: false,
            });
        }

        Ok(Self {
            states,
            transitions,
            external,
        })
    }

    pub fn external(&self) -> usize {
        self.external
    }

    pub fn vertex_of(&self, id: StateId) -> Option<usize> {
        self.states
            .iter()
            .position(|state| state.id == id && !state.is_external())
    }

    /// Refreshes counts, `can_change` and `invokable` from the rows computed so far.
    ///
    /// A state can change if some transition touching it is invokable; a transition is invokable
    /// if its probability is non-zero and every state it reads is non-zero somewhere in its delay
    /// window or can itself change. Cycles are broken by treating a vertex under evaluation as
    /// unable to change.
    pub fn resolve_changeability(&mut self, rows: &[Vec<f64>]) {
        let Some(last) = rows.last() else {
            return;
        };
        for state in &mut self.states {
            state.count = state.column.map_or(0.0, |column| last[column]);
        }

        let mut state_marks = vec![Mark::Unvisited; self.states.len()];
        let mut transition_marks = vec![Mark::Unvisited; self.transitions.len()];
        for vertex in 0..self.states.len() {
            self.state_can_change(vertex, rows, &mut state_marks, &mut transition_marks);
        }
        for transition in 0..self.transitions.len() {
            self.transition_invokable(transition, rows, &mut state_marks, &mut transition_marks);
        }

        for (state, mark) in self.states.iter_mut().zip(&state_marks) {
            state.can_change = matches!(mark, Mark::Resolved(true));
        }
        for (transition, mark) in self.transitions.iter_mut().zip(&transition_marks) {
            transition.invokable = matches!(mark, Mark::Resolved(true));
        }
    }

    fn state_can_change(
        &self,
        vertex: usize,
        rows: &[Vec<f64>],
        state_marks: &mut [Mark],
        transition_marks: &mut [Mark],
    ) -> bool {
        match state_marks[vertex] {
            Mark::Resolved(value) => return value,
            Mark::InProgress => return false,
            Mark::Unvisited => {}
        }
        if self.states[vertex].is_external() {
            state_marks[vertex] = Mark::Resolved(true);
            return true;
        }
        state_marks[vertex] = Mark::InProgress;
        let state = &self.states[vertex];
        let result = state
            .increased_by
            .iter()
            .chain(&state.decreased_by)
            .any(|&transition| self.transition_invokable(transition, rows, state_marks, transition_marks));
        state_marks[vertex] = Mark::Resolved(result);
        result
    }

    fn transition_invokable(
        &self,
        index: usize,
        rows: &[Vec<f64>],
        state_marks: &mut [Mark],
        transition_marks: &mut [Mark],
    ) -> bool {
        match transition_marks[index] {
            Mark::Resolved(value) => return value,
            Mark::InProgress => return false,
            Mark::Unvisited => {}
        }
        transition_marks[index] = Mark::InProgress;
        let transition = &self.transitions[index];
        let result = transition.probability != 0.0
            && !transition.dependencies.is_empty()
            && transition.dependencies.iter().all(|dependency| {
                !self.zero_over_window(dependency, rows)
                    || self.state_can_change(dependency.vertex, rows, state_marks, transition_marks)
            });
        transition_marks[index] = Mark::Resolved(result);
        result
    }

    fn zero_over_window(&self, dependency: &Dependency, rows: &[Vec<f64>]) -> bool {
        let Some(column) = self.states[dependency.vertex].column else {
            return false;
        };
        let from = rows.len().saturating_sub(dependency.delay + 1);
        rows[from..].iter().all(|row| row[column] == 0.0)
    }

    /// Whether decreasing transition `transition` keeps firing for as long as `vertex` is
    /// non-zero: every other state it reads is alive and not itself decreasing.
    pub fn drains(&self, transition: usize, vertex: usize) -> bool {
        self.transitions[transition]
            .dependencies
            .iter()
            .filter(|dependency| dependency.vertex != vertex)
            .all(|dependency| {
                let other = &self.states[dependency.vertex];
                other.is_external() || (other.count != 0.0 && other.trend != Trend::Decrease)
            })
    }
}
