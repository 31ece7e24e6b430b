use population_core::analysis::graph::Trend;
use population_core::session::{run_analysis, run_calculation};
use population_core::traits::NoProgress;
use population_core::{
    AnalysisSettings, CalculationFinishedReason, CalculationSettings, State, Task, TaskAnalyser,
    Transition, TransitionMode, TransitionType, EXTERNAL_STATE_ID,
};
use proptest::prelude::*;

const X: i64 = EXTERNAL_STATE_ID;

fn never() -> bool {
    false
}

fn assert_rows_close(actual: &[Vec<f64>], expected: &[Vec<f64>], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (step, (a, e)) in actual.iter().zip(expected).enumerate() {
        for (x, y) in a.iter().zip(e) {
            assert!((x - y).abs() <= tolerance, "step {step}: {a:?} vs {e:?}");
        }
    }
}

#[test]
fn round_trip() {
    let task = Task::new(
        "round trip",
        vec![State::new(1, "A", 100.0), State::new(2, "B", 0.0)],
        vec![Transition::new(1, TransitionType::Linear, 1, 1, 2, 0.5)],
        3,
    );
    let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress).expect("run");
    assert_rows_close(
        &result.rows,
        &[vec![100.0, 0.0], vec![50.0, 50.0], vec![25.0, 75.0]],
        1e-16,
    );
    assert_eq!(result.count(2, 2), Some(75.0));
}

#[test]
fn fully_external_transition_changes_nothing() {
    let task = Task::new(
        "external",
        vec![State::new(1, "A", 0.0)],
        vec![Transition::new(1, TransitionType::Linear, X, X, 1, 1.0)],
        25,
    );
    let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress).expect("run");
    assert_eq!(result.steps(), 25);
    assert!(result.rows.iter().all(|row| row == &vec![0.0]));
}

#[test]
fn delayed_source_reads_older_row() {
    // F feeds A by one unit per step, so A reads 1, 2, 3, 4 on rows 0..=3.
    // C collects A as seen two steps back.
    let task = Task::new(
        "delay",
        vec![State::new(1, "F", 100.0), State::new(2, "A", 1.0), State::new(3, "C", 0.0)],
        vec![
            Transition::new(1, TransitionType::Linear, 1, X, 2, 0.01).with_mode(TransitionMode::Retaining),
            Transition::new(2, TransitionType::Linear, 2, X, 3, 1.0)
                .with_mode(TransitionMode::Retaining)
                .with_delays(2, 0),
        ],
        5,
    );
    let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress).expect("run");
    let a: Vec<f64> = (0..4).map(|step| result.count(step, 2).expect("A")).collect();
    assert_eq!(a, vec![1.0, 2.0, 3.0, 4.0]);
    let c: Vec<f64> = (0..5).map(|step| result.count(step, 3).expect("C")).collect();
    // step 3 adds A from row 0, not row 2; step 4 adds A from row 1
    assert_eq!(c, vec![0.0, 1.0, 2.0, 3.0, 5.0]);
}

fn competition(steps: usize) -> Task {
    Task::new(
        "competition",
        vec![State::new(1, "A", 60.0), State::new(2, "B", 50.0)],
        vec![Transition::new(1, TransitionType::Linear, 1, 2, 1, 0.1)],
        steps,
    )
}

#[test]
fn growing_state_dominates_by_trend() {
    let report = run_analysis(
        &competition(5_000),
        &[1, 2],
        &CalculationSettings::default(),
        &AnalysisSettings::default(),
        &NoProgress,
        &never,
    )
    .expect("analysis")
    .expect("report");
    assert_eq!(report.reason, CalculationFinishedReason::AllStatesTrendsIdentified);
    assert_eq!(report.tiers.last(), Some(&vec![1]));
    assert_eq!(report.tiers.first(), Some(&vec![2]));
}

#[test]
fn growing_state_dominates_once_stable() {
    let settings = AnalysisSettings {
        predict_trends: false,
        ..AnalysisSettings::default()
    };
    let report = run_analysis(
        &competition(5_000),
        &[1, 2],
        &CalculationSettings::default(),
        &settings,
        &NoProgress,
        &never,
    )
    .expect("analysis")
    .expect("report");
    assert_eq!(report.reason, CalculationFinishedReason::TaskStable);
    assert_eq!(report.dominant(), &[1]);
}

#[test]
fn analyser_reports_trends_of_analysed_states() {
    let task = competition(300);
    let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress).expect("run");
    let mut analyser = TaskAnalyser::new(&task, &[1, 2], AnalysisSettings::default()).expect("analyser");
    analyser.update(&result.rows[..100], false, false);
    assert_eq!(analyser.trend_of(1).expect("trend"), Trend::Increase);
    assert_eq!(analyser.trend_of(2).expect("trend"), Trend::Decrease);
    assert!(analyser.can_predict_dominant_states());
}

#[test]
fn stable_rows_repeat_to_the_end() {
    let task = Task::new(
        "settling",
        vec![State::new(1, "A", 8.0), State::new(2, "B", 0.0)],
        vec![Transition::new(1, TransitionType::Linear, 1, 1, 2, 1.0).with_delays(1, 1)],
        12,
    );
    let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress).expect("run");
    let stable_from = result.stable_from.expect("task settles");
    let reference = result.rows[stable_from - 1].clone();
    assert!(result.rows[stable_from..].iter().all(|row| *row == reference));
    // the delayed read still sees A = 8 on step 2, so B is credited twice
    assert_eq!(result.final_counts(), &[0.0, 16.0]);
    assert_eq!(stable_from, 5);
}

#[test]
fn continuation_extends_a_run() {
    let task = competition(20);
    let settings = CalculationSettings::default();
    let whole = run_calculation(&competition(39), &settings, &NoProgress).expect("run");
    let first = run_calculation(&task, &settings, &NoProgress).expect("first");
    let second = run_calculation(&task.continued_from(&first), &settings, &NoProgress).expect("second");
    let merged = first.merge(second).expect("merge");
    assert_eq!(merged.steps(), whole.steps());
    assert_rows_close(&merged.rows, &whole.rows, 0.0);
}

fn ring(counts: &[f64], probabilities: &[f64]) -> Task {
    let n = counts.len() as i64;
    let states = counts
        .iter()
        .enumerate()
        .map(|(index, count)| State::new(index as i64 + 1, format!("S{index}"), *count))
        .collect();
    let transitions = probabilities
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let id = index as i64 + 1;
            Transition::new(id, TransitionType::Linear, id, id, id % n + 1, *p)
        })
        .collect();
    Task::new("ring", states, transitions, 30)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn internal_transfers_conserve_the_total(
        counts in prop::collection::vec(0.0f64..1000.0, 4),
        probabilities in prop::collection::vec(0.0f64..1.0, 4),
    ) {
        let task = ring(&counts, &probabilities);
        let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress)
            .expect("run");
        let total: f64 = counts.iter().sum();
        for row in &result.rows {
            let sum: f64 = row.iter().sum();
            prop_assert!((sum - total).abs() <= 1e-9 * total.max(1.0));
        }
    }

    #[test]
    fn clamped_counts_never_go_negative(
        counts in prop::collection::vec(0.0f64..100.0, 3),
        probabilities in prop::collection::vec(0.0f64..2.0, 3),
    ) {
        let states = counts
            .iter()
            .enumerate()
            .map(|(index, count)| State::new(index as i64 + 1, format!("S{index}"), *count))
            .collect();
        // every state drains into the next one and into the outside
        let transitions = probabilities
            .iter()
            .enumerate()
            .flat_map(|(index, p)| {
                let id = index as i64 + 1;
                [
                    Transition::new(2 * id, TransitionType::Solute, id, X, id % 3 + 1, *p)
                        .with_mode(TransitionMode::Removing),
                    Transition::new(2 * id + 1, TransitionType::Linear, id, X, X, *p)
                        .with_mode(TransitionMode::Removing),
                ]
            })
            .collect();
        let task = Task::new("drain", states, transitions, 20);
        let result = run_calculation(&task, &CalculationSettings::default(), &NoProgress)
            .expect("run");
        for row in &result.rows {
            prop_assert!(row.iter().all(|count| *count >= 0.0));
        }
    }

    #[test]
    fn decimal_and_float_paths_agree_on_exact_rates(
        multiples in prop::collection::vec(0u32..20, 3),
        numerators in prop::collection::vec(0u32..=8, 3),
    ) {
        // eighths over three steps keep multiples of 8^3 integral on both paths
        let counts: Vec<f64> = multiples.into_iter().map(|k| f64::from(k * 512)).collect();
        let probabilities: Vec<f64> = numerators.into_iter().map(|n| f64::from(n) / 8.0).collect();
        let settings = CalculationSettings { scale: 6, ..CalculationSettings::default() };
        let mut task = ring(&counts, &probabilities);
        task.steps_count = 4;
        let float = run_calculation(&task, &settings, &NoProgress).expect("float");
        let decimal = run_calculation(&task.clone().with_higher_accuracy(true), &settings, &NoProgress)
            .expect("decimal");
        for (a, b) in float.rows.iter().zip(&decimal.rows) {
            for (x, y) in a.iter().zip(b) {
                prop_assert!((x - y).abs() <= 1e-6);
            }
        }
    }
}
