//! Box-constrained L-BFGS around any [`LossFunction`].
//!
//! Bounds are enforced by the reparameterization `x = lo + (hi - lo)(1 + sin u) / 2`,
//! so the solver works unconstrained in `u` and every evaluated point lies inside
//! the box. A dimension with `lo == hi` is locked: it maps to exactly `lo` and its
//! gradient is zero.

use super::{is_rejected, LossFunction, OptimizationError, REJECTED_LOSS};
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Error, Executor, Gradient, State, TerminationReason, KV};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Called with a percentage in `0..=99` after every optimizer iteration.
pub type ProgressFn = Box<dyn FnMut(u8) + Send>;

const CANCELLED: &str = "estimation cancelled";
/// Relative distance kept from a bound when starting an unlocked dimension, where
/// the sine map would otherwise have zero slope.
const START_MARGIN: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub max_iterations: u64,
    pub gradient_tolerance: f64,
    pub cost_tolerance: f64,
    pub lbfgs_memory: usize,
    /// Step in the unconstrained coordinates for central differences.
    pub finite_difference_step: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            gradient_tolerance: 1e-6,
            cost_tolerance: 1e-7,
            lbfgs_memory: 7,
            finite_difference_step: 1e-6,
        }
    }
}

/// Outcome of one bounded minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub params: Vec<f64>,
    pub loss: f64,
    pub iterations: u64,
    pub converged: bool,
    pub termination: String,
}

/// Sine map between the box `[lower, upper]` and the real line.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxTransform {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BoxTransform {
    /// # Errors
    ///
    /// [`OptimizationError::InvalidBounds`] for non-finite bounds or `lo > hi`.
    pub fn new(bounds: &[(f64, f64)]) -> Result<Self, OptimizationError> {
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(OptimizationError::InvalidBounds(format!(
                    "dimension {i}: [{lo}, {hi}]"
                )));
            }
        }
        Ok(Self {
            lower: bounds.iter().map(|b| b.0).collect(),
            upper: bounds.iter().map(|b| b.1).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn is_locked(&self, i: usize) -> bool {
        self.lower[i] == self.upper[i]
    }

    pub fn to_bounded(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(i, &ui)| {
                let (lo, hi) = (self.lower[i], self.upper[i]);
                if lo == hi {
                    lo
                } else {
                    lo + (hi - lo) * (1.0 + ui.sin()) / 2.0
                }
            })
            .collect()
    }

    /// Inverse map; `x` is clamped into the box first.
    pub fn to_unbounded(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(i, &xi)| {
                let (lo, hi) = (self.lower[i], self.upper[i]);
                if lo == hi {
                    return 0.0;
                }
                let margin = START_MARGIN * (hi - lo);
                let xi = if xi.is_finite() { xi } else { (lo + hi) / 2.0 };
                let xi = xi.clamp(lo + margin, hi - margin);
                (2.0 * (xi - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin()
            })
            .collect()
    }
}

/// The loss seen through the box transform, with finite-difference gradients.
struct BoundedProblem<'a, L: ?Sized> {
    loss: &'a L,
    transform: BoxTransform,
    step: f64,
}

impl<L: LossFunction + ?Sized> BoundedProblem<'_, L> {
    fn evaluate(&self, u: &[f64]) -> f64 {
        let value = self.loss.loss(&self.transform.to_bounded(u));
        if value.is_finite() {
            value
        } else {
            REJECTED_LOSS
        }
    }

    /// Central differences, falling back to one side when the other is rejected.
    fn finite_difference(&self, u: &[f64]) -> Vec<f64> {
        let center = self.evaluate(u);
        let mut shifted = u.to_vec();
        (0..u.len())
            .map(|i| {
                if self.transform.is_locked(i) {
                    return 0.0;
                }
                let h = self.step;
                shifted[i] = u[i] + h;
                let forward = self.evaluate(&shifted);
                shifted[i] = u[i] - h;
                let backward = self.evaluate(&shifted);
                shifted[i] = u[i];

                match (is_rejected(forward), is_rejected(backward)) {
                    (false, false) => (forward - backward) / (2.0 * h),
                    (false, true) if !is_rejected(center) => (forward - center) / h,
                    (true, false) if !is_rejected(center) => (center - backward) / h,
                    _ => 0.0,
                }
            })
            .collect()
    }
}

impl<L: LossFunction + ?Sized> CostFunction for BoundedProblem<'_, L> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(u))
    }
}

impl<L: LossFunction + ?Sized> Gradient for BoundedProblem<'_, L> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, u: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(self.finite_difference(u))
    }
}

/// Reports `min(floor(i / max * 100), 99)` and stops the run once cancelled.
struct ProgressObserver {
    iterations: u64,
    max_iterations: u64,
    last: u8,
    on_progress: Option<ProgressFn>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<I: State> Observe<I> for ProgressObserver {
    fn observe_iter(&mut self, _state: &I, _kv: &KV) -> Result<(), Error> {
        self.iterations += 1;
        let percent = (self.iterations * 100 / self.max_iterations.max(1)).min(99) as u8;
        self.last = self.last.max(percent);
        debug!("Estimator iteration {} ({}%)", self.iterations, self.last);
        if let Some(callback) = self.on_progress.as_mut() {
            callback(self.last);
        }
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
        {
            return Err(Error::msg(CANCELLED));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParameterEstimator {
    pub config: EstimatorConfig,
}

impl ParameterEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Minimizes `loss` inside `bounds`, starting from `initial`.
    ///
    /// # Arguments
    ///
    /// * `initial` - Starting point; clamped into `bounds`.
    /// * `bounds` - `(lo, hi)` per dimension; `lo == hi` locks the dimension at `lo`.
    /// * `loss` - Objective to minimize.
    /// * `on_progress` - Receives non-decreasing percentages below 100.
    /// * `cancel` - Checked after every iteration.
    ///
    /// # Returns
    ///
    /// The best point found. `converged` is false when the iteration cap was hit.
    ///
    /// # Errors
    ///
    /// * [`OptimizationError::InvalidBounds`] if `initial` and `bounds` disagree in length.
    /// * [`OptimizationError::Cancelled`] if `cancel` was raised.
    /// * [`OptimizationError::DegenerateProjection`] if no evaluated point was acceptable.
    /// * [`OptimizationError::Solver`] for line-search or other solver failures.
    pub fn estimate<L: LossFunction + ?Sized>(
        &self,
        initial: &[f64],
        bounds: &[(f64, f64)],
        loss: &L,
        on_progress: Option<ProgressFn>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<Estimate, OptimizationError> {
        if initial.len() != bounds.len() {
            return Err(OptimizationError::InvalidBounds(format!(
                "{} initial values for {} bounds",
                initial.len(),
                bounds.len()
            )));
        }
        let transform = BoxTransform::new(bounds)?;
        let u0 = transform.to_unbounded(initial);
        let problem = BoundedProblem {
            loss,
            transform: transform.clone(),
            step: self.config.finite_difference_step,
        };

        let linesearch: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> =
            MoreThuenteLineSearch::new();
        let solver: LBFGS<_, Vec<f64>, Vec<f64>, f64> =
            LBFGS::new(linesearch, self.config.lbfgs_memory.max(1))
                .with_tolerance_grad(self.config.gradient_tolerance)?
                .with_tolerance_cost(self.config.cost_tolerance)?;

        let observer = ProgressObserver {
            iterations: 0,
            max_iterations: self.config.max_iterations,
            last: 0,
            on_progress,
            cancel: cancel.clone(),
        };

        let max_iterations = self.config.max_iterations;
        let result = Executor::new(problem, solver)
            .configure(|state| state.param(u0).max_iters(max_iterations))
            .add_observer(observer, ObserverMode::Always)
            .run();

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                    return Err(OptimizationError::Cancelled);
                }
                warn!("Solver stopped with an error: {err}");
                return Err(OptimizationError::Solver(err.to_string()));
            }
        };

        let state = result.state();
        let best_u = state
            .get_best_param()
            .ok_or_else(|| OptimizationError::Solver("no parameters evaluated".to_string()))?;
        let best_loss = state.get_best_cost();
        if is_rejected(best_loss) {
            return Err(OptimizationError::DegenerateProjection);
        }

        let reason = state.get_termination_reason();
        let converged = matches!(
            reason,
            Some(TerminationReason::SolverConverged) | Some(TerminationReason::TargetCostReached)
        );
        let termination = reason.map_or_else(|| "running".to_string(), |r| format!("{r:?}"));
        info!(
            "Estimator finished after {} iterations: {} (loss {:.6})",
            state.get_iter(),
            termination,
            best_loss
        );

        Ok(Estimate {
            params: transform.to_bounded(best_u),
            loss: best_loss,
            iterations: state.get_iter(),
            converged,
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    struct Quadratic {
        target: Vec<f64>,
    }

    impl LossFunction for Quadratic {
        fn loss(&self, x: &[f64]) -> f64 {
            x.iter()
                .zip(&self.target)
                .map(|(a, b)| (a - b).powi(2))
                .sum()
        }
    }

    /// Quadratic that rejects the region beyond `limit` in the first dimension.
    struct Fenced {
        limit: f64,
    }

    impl LossFunction for Fenced {
        fn loss(&self, x: &[f64]) -> f64 {
            if x[0] > self.limit {
                REJECTED_LOSS
            } else {
                (x[0] - 0.3).powi(2)
            }
        }
    }

    struct AlwaysRejected;

    impl LossFunction for AlwaysRejected {
        fn loss(&self, _x: &[f64]) -> f64 {
            REJECTED_LOSS
        }
    }

    #[test]
    fn test_box_transform_round_trip_and_locks() {
        let transform = BoxTransform::new(&[(0.0, 10.0), (2.0, 2.0), (-1.0, 1.0)]).unwrap();
        let u = transform.to_unbounded(&[2.5, 7.0, 5.0]);
        let x = transform.to_bounded(&u);
        assert_relative_eq!(x[0], 2.5, epsilon = 1e-12);
        assert_eq!(x[1], 2.0);
        assert!(x[2] <= 1.0 && x[2] > 0.99);

        for value in [-1e3, -1.0, 0.0, 1.0, 1e3] {
            let x = transform.to_bounded(&[value, value, value]);
            assert!((0.0..=10.0).contains(&x[0]));
            assert_eq!(x[1], 2.0);
        }
        assert!(BoxTransform::new(&[(1.0, 0.0)]).is_err());
        assert!(BoxTransform::new(&[(f64::NAN, 0.0)]).is_err());
    }

    #[test]
    fn test_finds_interior_minimum() {
        let estimator = ParameterEstimator::default();
        let loss = Quadratic {
            target: vec![1.5, -0.25],
        };
        let estimate = estimator
            .estimate(&[0.0, 0.0], &[(-5.0, 5.0), (-1.0, 1.0)], &loss, None, None)
            .unwrap();
        assert!(estimate.converged, "{}", estimate.termination);
        assert_relative_eq!(estimate.params[0], 1.5, epsilon = 1e-3);
        assert_relative_eq!(estimate.params[1], -0.25, epsilon = 1e-3);
    }

    #[test]
    fn test_minimum_outside_box_stays_on_bound() {
        let estimator = ParameterEstimator::default();
        let loss = Quadratic { target: vec![3.0] };
        let estimate = estimator
            .estimate(&[0.5], &[(0.0, 1.0)], &loss, None, None)
            .unwrap();
        assert!(estimate.params[0] <= 1.0);
        assert!(estimate.params[0] > 0.99);
    }

    #[test]
    fn test_locked_dimension_never_moves() {
        let estimator = ParameterEstimator::default();
        let loss = Quadratic {
            target: vec![1.0, 1.0],
        };
        let estimate = estimator
            .estimate(&[0.25, 0.0], &[(0.25, 0.25), (-2.0, 2.0)], &loss, None, None)
            .unwrap();
        assert_eq!(estimate.params[0], 0.25);
        assert_relative_eq!(estimate.params[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_fully_locked_problem_converges_immediately() {
        let estimator = ParameterEstimator::default();
        let loss = Quadratic { target: vec![1.0] };
        let estimate = estimator
            .estimate(&[0.5], &[(0.5, 0.5)], &loss, None, None)
            .unwrap();
        assert!(estimate.converged);
        assert_eq!(estimate.params, vec![0.5]);
        assert_relative_eq!(estimate.loss, 0.25);
    }

    #[test]
    fn test_rejected_region_is_never_returned() {
        let estimator = ParameterEstimator::default();
        let estimate = estimator
            .estimate(&[0.1], &[(0.0, 1.0)], &Fenced { limit: 0.9 }, None, None)
            .unwrap();
        assert!(!is_rejected(estimate.loss));
        assert!(estimate.params[0] <= 0.9);
        assert_relative_eq!(estimate.params[0], 0.3, epsilon = 1e-2);
    }

    #[test]
    fn test_one_sided_difference_next_to_rejected_region() {
        let problem = BoundedProblem {
            loss: &Fenced { limit: 0.5 },
            transform: BoxTransform::new(&[(0.0, 1.0)]).unwrap(),
            step: 1e-3,
        };
        // x = 0.5 exactly: the forward step is rejected, the backward one is not
        let gradient = problem.finite_difference(&[0.0]);
        assert!(gradient[0].is_finite());
        assert!(gradient[0] > 0.0);
        assert!(gradient[0] < 1.0);
    }

    #[test]
    fn test_all_rejected_is_degenerate() {
        let estimator = ParameterEstimator::default();
        let err = estimator
            .estimate(&[0.5], &[(0.0, 1.0)], &AlwaysRejected, None, None)
            .unwrap_err();
        assert!(matches!(err, OptimizationError::DegenerateProjection));
    }

    #[test]
    fn test_sentinel_does_not_overflow_tolerances() {
        // differences of the sentinel stay finite, so gradients never turn NaN
        assert!((REJECTED_LOSS - 0.0).is_finite());
        assert!(((REJECTED_LOSS - REJECTED_LOSS) / 1e-6).abs() < 1e-6);
        assert!(is_rejected(REJECTED_LOSS));
        assert!(is_rejected(f64::NAN));
        assert!(!is_rejected(65025.0));
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let estimator = ParameterEstimator::new(EstimatorConfig {
            max_iterations: 3,
            ..Default::default()
        });
        let loss = Quadratic {
            target: vec![0.7, -0.4, 0.2],
        };
        estimator
            .estimate(
                &[0.0, 0.0, 0.0],
                &[(-1.0, 1.0), (-1.0, 1.0), (-1.0, 1.0)],
                &loss,
                Some(Box::new(move |p| sink.lock().unwrap().push(p))),
                None,
            )
            .unwrap();
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|&p| p <= 99));
    }

    #[test]
    fn test_cancellation_stops_the_run() {
        let cancel = Arc::new(AtomicBool::new(true));
        let estimator = ParameterEstimator::default();
        let loss = Quadratic {
            target: vec![0.7, -0.4],
        };
        let err = estimator
            .estimate(
                &[0.0, 0.0],
                &[(-1.0, 1.0), (-1.0, 1.0)],
                &loss,
                None,
                Some(cancel),
            )
            .unwrap_err();
        assert!(matches!(err, OptimizationError::Cancelled));
    }

    #[test]
    fn test_mismatched_lengths() {
        let estimator = ParameterEstimator::default();
        let err = estimator
            .estimate(&[0.0], &[], &Quadratic { target: vec![] }, None, None)
            .unwrap_err();
        assert!(matches!(err, OptimizationError::InvalidBounds(_)));
    }
}
