pub mod analysis;
pub mod calculator;
pub mod error;
pub mod model;
pub mod numeric;
pub mod session;
pub mod stability;
pub mod stepper;
pub mod sweep;
/// The `population_core` crate steps discrete-time population models and predicts which
/// states come to dominate them.
///
/// Key components:
/// - **Traits**: `Count` (numeric abstraction over `f64` and `Decimal`), `RowHistory`, `ProgressListener`.
/// - **Numeric**: arbitrary-precision `Decimal` with exp/ln/root/power at a requested scale.
/// - **Calculator**: batch stepping with stability detection and rounding, in `f64` or decimal precision.
/// - **Analysis**: dependency graph, trend prediction and dominance tiers.
/// - **Session**: synchronous and threaded entry points for hosts.
pub mod traits;

pub use analysis::{AnalysisSettings, CalculationFinishedReason, DominanceReport, TaskAnalyser};
pub use calculator::{CalculationSettings, Calculator};
pub use error::{CalculationError, NumericError};
pub use model::{
    CalculationResult, State, StateId, Task, Transition, TransitionMode, TransitionType,
    EXTERNAL_STATE_ID, MAX_COEFFICIENT,
};
pub use numeric::Decimal;
