//! Ordering of analysed states into dominance tiers, smallest first.

use std::cmp::Ordering;

use super::graph::{DependencyGraph, Trend};
use super::AnalysisSettings;
use crate::model::StateId;

/// Stable outcome: peel the largest states off in tiers of near-equal share. States below the
/// minimum share of the total are left out.
pub(crate) fn stable_tiers(
    graph: &DependencyGraph,
    analysed: &[usize],
    rows: &[Vec<f64>],
    settings: &AnalysisSettings,
) -> Vec<Vec<StateId>> {
    let tail = &rows[rows.len().saturating_sub(2)..];
    let Some(last) = tail.last() else {
        return Vec::new();
    };
    let total: f64 = last.iter().sum();
    if total <= 0.0 {
        return Vec::new();
    }
    let mut candidates: Vec<(StateId, f64)> = analysed
        .iter()
        .filter_map(|&vertex| {
            let state = &graph.states[vertex];
            let column = state.column?;
            let value = tail.iter().map(|row| row[column]).sum::<f64>() / tail.len() as f64;
            (state.is_alive() && value / total > settings.dominance_share).then_some((state.id, value))
        })
        .collect();

    let mut tiers = Vec::new();
    while let Some(largest) = candidates.iter().map(|(_, value)| *value).reduce(f64::max) {
        let tolerance = settings.tie_tolerance * largest.abs();
        let (tier, rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|(_, value)| largest - value <= tolerance);
        tiers.push(tier.into_iter().map(|(id, _)| id).collect());
        candidates = rest;
    }
    tiers.reverse();
    tiers
}

/// Trend outcome: decreasing states, then stable ones, then increasing ones.
pub(crate) fn trend_tiers(graph: &DependencyGraph, analysed: &[usize]) -> Vec<Vec<StateId>> {
    let mut decreasing = Vec::new();
    let mut stable = Vec::new();
    let mut increasing = Vec::new();
    for &vertex in analysed {
        let state = &graph.states[vertex];
        if !state.is_alive() {
            continue;
        }
        match state.trend {
            Trend::Decrease => decreasing.push(state.id),
            Trend::Increase => increasing.push(state.id),
            Trend::Stable | Trend::Any => stable.push(state.id),
        }
    }
    [decreasing, stable, increasing]
        .into_iter()
        .filter(|tier| !tier.is_empty())
        .collect()
}

/// Cyclic outcome: rank by the area under each state's curve over the back half of the run.
/// Areas within the cyclic tolerance of a tier's first member share the tier.
pub(crate) fn cyclic_tiers(
    graph: &DependencyGraph,
    analysed: &[usize],
    rows: &[Vec<f64>],
    settings: &AnalysisSettings,
) -> Vec<Vec<StateId>> {
    let back_half = &rows[rows.len() / 2..];
    let mut areas: Vec<(StateId, f64)> = analysed
        .iter()
        .filter_map(|&vertex| {
            let state = &graph.states[vertex];
            let column = state.column?;
            state
                .is_alive()
                .then(|| (state.id, back_half.iter().map(|row| row[column]).sum::<f64>()))
        })
        .collect();
    areas.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut tiers: Vec<Vec<StateId>> = Vec::new();
    let mut tier_floor = f64::NAN;
    for (id, area) in areas {
        match tiers.last_mut() {
            Some(tier) if area - tier_floor <= settings.cyclic_tolerance * area.abs() => tier.push(id),
            _ => {
                tier_floor = area;
                tiers.push(vec![id]);
            }
        }
    }
    tiers
}
