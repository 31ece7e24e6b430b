//! One discrete step of the population model.
//!
//! Each transition reads its participants from (possibly delayed) earlier rows, computes a value
//! from its type, adjusts it by its mode, and debits or credits the new row. All transitions of a
//! step read the same history, so the order in which their effects land does not matter and the
//! parallel path gives the same row as the sequential one up to floating-point summation order.

use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;

use crate::error::CalculationError;
use crate::model::{StateId, Task, TransitionId, TransitionMode, TransitionType, EXTERNAL_STATE_ID};
use crate::traits::{Count, RowHistory};

/// A transition with its endpoints resolved to matrix columns. `None` is the external state.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTransition {
    pub id: TransitionId,
    pub transition_type: TransitionType,
    pub mode: TransitionMode,
    pub source: Option<usize>,
    pub operand: Option<usize>,
    pub result: Option<usize>,
    pub source_coefficient: f64,
    pub operand_coefficient: f64,
    pub result_coefficient: f64,
    pub source_delay: usize,
    pub operand_delay: usize,
    pub probability: f64,
}

impl PreparedTransition {
    pub fn prepare(task: &Task) -> Result<Vec<Self>, CalculationError> {
        let indices = task.state_indices();
        let resolve = |transition: TransitionId, state: StateId| {
            if state == EXTERNAL_STATE_ID {
                Ok(None)
            } else {
                indices
                    .get(&state)
                    .copied()
                    .map(Some)
                    .ok_or(CalculationError::UnknownState { transition, state })
            }
        };
        task.transitions
            .iter()
            .map(|t| {
                Ok(Self {
                    id: t.id,
                    transition_type: t.transition_type,
                    mode: t.mode,
                    source: resolve(t.id, t.source)?,
                    operand: resolve(t.id, t.operand)?,
                    result: resolve(t.id, t.result)?,
                    source_coefficient: t.source_coefficient,
                    operand_coefficient: t.operand_coefficient,
                    result_coefficient: t.result_coefficient,
                    source_delay: t.source_delay,
                    operand_delay: t.operand_delay,
                    probability: t.probability,
                })
            })
            .collect()
    }

    /// Neither side is a real state, so nothing is read or written.
    pub fn is_noop(&self) -> bool {
        self.source.is_none() && self.operand.is_none()
    }

    /// Source and operand are the same state; the interaction is computed from one side.
    pub fn is_self_interaction(&self) -> bool {
        self.source.is_some() && self.source == self.operand
    }
}

/// Per-transition constants converted once into the count type of the run.
#[derive(Debug, Clone)]
struct Constants<T> {
    probability: T,
    source_coefficient: T,
    operand_coefficient: T,
    result_coefficient: T,
    source_factorial: T,
    operand_factorial: T,
}

impl<T: Count> Constants<T> {
    fn new(transition: &PreparedTransition) -> Self {
        Self {
            probability: T::from_f64(transition.probability),
            source_coefficient: T::from_f64(transition.source_coefficient),
            operand_coefficient: T::from_f64(transition.operand_coefficient),
            result_coefficient: T::from_f64(transition.result_coefficient),
            source_factorial: T::probabilistic_factorial(transition.source_coefficient),
            operand_factorial: T::probabilistic_factorial(transition.operand_coefficient),
        }
    }
}

#[derive(Debug)]
enum Change<T> {
    Credit(usize, T),
    Debit(usize, T),
}

pub struct Stepper<T: Count> {
    transitions: Vec<PreparedTransition>,
    constants: Vec<Constants<T>>,
    parallel: bool,
    allow_negative: bool,
}

impl<T: Count> Stepper<T> {
    pub fn new(transitions: Vec<PreparedTransition>, parallel: bool, allow_negative: bool) -> Self {
        let constants = transitions.iter().map(Constants::new).collect();
        Self {
            transitions,
            constants,
            parallel,
            allow_negative,
        }
    }

    pub fn transitions(&self) -> &[PreparedTransition] {
        &self.transitions
    }

    /// Computes row `step` (which must be at least 1) from the rows before it.
    pub fn next_row<H>(&self, history: &H, step: usize) -> Result<Vec<T>, CalculationError>
    where
        H: RowHistory<T> + ?Sized,
    {
        let previous = history.row(step - 1);
        let total = previous.iter().fold(T::zero(), |acc, count| acc.add(count));
        let row = Mutex::new(previous.to_vec());

        if self.parallel {
            self.transitions
                .par_iter()
                .zip(self.constants.par_iter())
                .try_for_each(|(transition, constants)| {
                    self.apply(transition, constants, history, step, &total, &row)
                })?;
        } else {
            for (transition, constants) in self.transitions.iter().zip(&self.constants) {
                self.apply(transition, constants, history, step, &total, &row)?;
            }
        }

        let mut row = row.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !self.allow_negative {
            for count in row.iter_mut() {
                if count.is_negative() {
                    *count = T::zero();
                }
            }
        }
        Ok(row)
    }

    fn apply<H>(
        &self,
        transition: &PreparedTransition,
        constants: &Constants<T>,
        history: &H,
        step: usize,
        total: &T,
        row: &Mutex<Vec<T>>,
    ) -> Result<(), CalculationError>
    where
        H: RowHistory<T> + ?Sized,
    {
        let changes = self.changes(transition, constants, history, step, total)?;
        if changes.is_empty() {
            return Ok(());
        }
        let mut row = row.lock().unwrap_or_else(PoisonError::into_inner);
        for change in changes {
            match change {
                Change::Credit(index, amount) => row[index] = row[index].add(&amount),
                Change::Debit(index, amount) => row[index] = row[index].sub(&amount),
            }
        }
        Ok(())
    }

    fn changes<H>(
        &self,
        transition: &PreparedTransition,
        constants: &Constants<T>,
        history: &H,
        step: usize,
        total: &T,
    ) -> Result<Vec<Change<T>>, CalculationError>
    where
        H: RowHistory<T> + ?Sized,
    {
        if transition.is_noop() {
            return Ok(Vec::new());
        }
        let delayed = |index: usize, delay: usize| {
            history.row((step - 1).saturating_sub(delay))[index].clone()
        };
        let source = transition
            .source
            .map(|index| delayed(index, transition.source_delay));
        let operand = transition
            .operand
            .map(|index| delayed(index, transition.operand_delay));

        let Some(rate) = interaction(transition, constants, source, operand, total)? else {
            return Ok(Vec::new());
        };
        let value = apply_mode(transition.mode, constants, rate);
        if value.is_zero() {
            return Ok(Vec::new());
        }

        let mut changes = Vec::with_capacity(3);
        if transition.mode == TransitionMode::Removing {
            if let Some(index) = transition.source {
                changes.push(Change::Debit(index, value.mul(&constants.source_coefficient)));
            }
        }
        if let Some(index) = transition.operand {
            match transition.mode {
                TransitionMode::Inhibitor | TransitionMode::Residual => {
                    changes.push(Change::Debit(index, value.clone()));
                }
                TransitionMode::Retaining => {}
                TransitionMode::Removing if transition.is_self_interaction() => {}
                TransitionMode::Simple | TransitionMode::Removing => {
                    changes.push(Change::Debit(index, value.mul(&constants.operand_coefficient)));
                }
            }
        }
        if let Some(index) = transition.result {
            changes.push(Change::Credit(index, value.mul(&constants.result_coefficient)));
        }
        Ok(changes)
    }
}

/// Raw interaction value and the operand density, before probability and mode.
struct Rate<T> {
    value: T,
    operand_density: Option<T>,
}

fn interaction<T: Count>(
    transition: &PreparedTransition,
    constants: &Constants<T>,
    source: Option<T>,
    operand: Option<T>,
    total: &T,
) -> Result<Option<Rate<T>>, CalculationError> {
    let both = source.is_some() && operand.is_some() && !transition.is_self_interaction();
    let rate = match transition.transition_type {
        TransitionType::Linear => {
            let source = source
                .map(|count| linear_density(count, &constants.source_coefficient, transition.source_coefficient))
                .transpose()?;
            let operand = operand
                .map(|count| linear_density(count, &constants.operand_coefficient, transition.operand_coefficient))
                .transpose()?;
            let value = match (&source, &operand) {
                (Some(s), Some(o)) if both => s.clone().min_of(o.clone()),
                (Some(s), _) => s.clone(),
                (None, Some(o)) => o.clone(),
                (None, None) => return Ok(None),
            };
            Rate {
                value,
                operand_density: operand,
            }
        }
        TransitionType::Solute => {
            let sides = [
                (source.as_ref(), transition.source_coefficient),
                (operand.as_ref(), transition.operand_coefficient),
            ];
            if !power_law_defined(total, sides) {
                return Ok(None);
            }
            let source = source
                .map(|count| {
                    power_density(count, transition.source_coefficient, &constants.source_factorial, total)
                })
                .transpose()?;
            let operand = operand
                .map(|count| {
                    power_density(count, transition.operand_coefficient, &constants.operand_factorial, total)
                })
                .transpose()?;
            let value = match (&source, &operand) {
                (Some(s), Some(o)) if both => s.mul(o).div(total)?,
                (Some(s), _) => s.clone(),
                (None, Some(o)) => o.clone(),
                (None, None) => return Ok(None),
            };
            Rate {
                value,
                operand_density: operand,
            }
        }
        TransitionType::Blend => {
            let norm = match (&source, &operand) {
                (Some(s), Some(o)) if both => s.add(o),
                (Some(s), _) => s.clone(),
                (None, Some(o)) => o.clone(),
                (None, None) => return Ok(None),
            };
            // non-positive counts never reach the power law
            let sides = [
                (source.as_ref().filter(|count| count.is_positive()), transition.source_coefficient),
                (operand.as_ref().filter(|count| count.is_positive()), transition.operand_coefficient),
            ];
            if !power_law_defined(&norm, sides) {
                return Ok(None);
            }
            let source = source
                .map(|count| {
                    blend_density(count, transition.source_coefficient, &constants.source_factorial, &norm)
                })
                .transpose()?;
            let operand = operand
                .map(|count| {
                    blend_density(count, transition.operand_coefficient, &constants.operand_factorial, &norm)
                })
                .transpose()?;
            let value = match (&source, &operand) {
                (Some(s), Some(o)) if both => s.mul(o).div(&norm)?,
                (Some(s), _) => s.clone(),
                (None, Some(o)) => o.clone(),
                (None, None) => return Ok(None),
            };
            Rate {
                value,
                operand_density: operand,
            }
        }
    };
    Ok(Some(rate))
}

/// Power-law densities divide by `norm^(c - 1)` and take `count^c`. A zero norm, or a fractional
/// power of a negative norm or count, skips the transition for this step.
fn power_law_defined<T: Count>(norm: &T, sides: [(Option<&T>, f64); 2]) -> bool {
    if norm.is_zero() {
        return false;
    }
    sides.iter().all(|(count, coefficient)| match count {
        Some(count) if *coefficient > 1.0 && coefficient.fract() != 0.0 => {
            !norm.is_negative() && !count.is_negative()
        }
        _ => true,
    })
}

fn linear_density<T: Count>(count: T, coefficient: &T, raw: f64) -> Result<T, CalculationError> {
    if raw <= 1.0 {
        return Ok(count);
    }
    Ok(count.div(coefficient)?)
}

/// `count^c / pf(c) / norm^(c - 1)` for `c > 1`.
fn power_density<T: Count>(
    count: T,
    coefficient: f64,
    factorial: &T,
    norm: &T,
) -> Result<T, CalculationError> {
    if coefficient <= 1.0 {
        return Ok(count);
    }
    let numerator = count.powf(coefficient)?.div(factorial)?;
    Ok(numerator.div(&norm.powf(coefficient - 1.0)?)?)
}

fn blend_density<T: Count>(
    count: T,
    coefficient: f64,
    factorial: &T,
    norm: &T,
) -> Result<T, CalculationError> {
    if !count.is_positive() {
        return Ok(T::zero());
    }
    power_density(count, coefficient, factorial, norm)
}

/// Scales by probability. Inhibitor takes the operand remainder before scaling, residual after.
/// A negative remainder reverses the flow.
fn apply_mode<T: Count>(mode: TransitionMode, constants: &Constants<T>, rate: Rate<T>) -> T {
    let Rate {
        mut value,
        operand_density,
    } = rate;
    let remainder = |value: &T, density: &T| {
        density.sub(&value.mul(&constants.operand_coefficient))
    };
    if mode == TransitionMode::Inhibitor {
        if let Some(density) = &operand_density {
            value = remainder(&value, density);
        }
    }
    value = value.mul(&constants.probability);
    if mode == TransitionMode::Residual {
        if let Some(density) = &operand_density {
            value = remainder(&value, density);
        }
    }
    value
}
