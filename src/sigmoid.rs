use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Executor, Jacobian, Operator, State, TerminationReason, KV};
use argmin::solver::gaussnewton::GaussNewton;
use argmin::solver::neldermead::NelderMead;
use nalgebra::{DMatrix, DVector};
use ndarray::{array, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentRecord;
use crate::error::Error;
use crate::math::{invert_2x2, span};
use crate::Result;

/// The allosteric sigmoid `x^h / (k' + x^h)`
///
/// # Examples
///
/// ```
/// use katharoseq::sigmoid::allosteric_sigmoid;
///
/// assert_eq!(allosteric_sigmoid(1.0, 2.0, 3.0), 0.25);
/// ```
pub fn allosteric_sigmoid(x: f64, h: f64, k_prime: f64) -> f64 {
    let xh = x.powf(h);
    xh / (k_prime + xh)
}

/// Minimum read count at which the curve `(h, k')` reaches `threshold` percent
///
/// The inverse of the sigmoid gives the base-10 log of the read count, which is truncated to a
/// whole number of reads after exponentiation. A threshold of zero is reached by a single read.
///
/// # Errors
/// Returns an error if `threshold` lies outside `[0, 100]` or the curve never reaches it.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn get_threshold(h: f64, k_prime: f64, threshold: f64) -> Result<u64> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(Error::ThresholdOutOfRange(threshold));
    }
    let log_reads = log_reads_at(h, k_prime, threshold / 100.0);
    let reads = 10f64.powf(log_reads);
    if !reads.is_finite() || reads >= u64::MAX as f64 {
        return Err(Error::UnreachableThreshold(threshold));
    }
    Ok(reads.trunc() as u64)
}

fn log_reads_at(h: f64, k_prime: f64, fraction: f64) -> f64 {
    (k_prime / (1.0 / fraction - 1.0)).powf(1.0 / h)
}

/// Stopping rules for the curve fit.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FitSettings {
    /// Iterations allowed before the fit is declared non-convergent
    pub max_iters: u64,
    /// The simplex has converged when the standard deviation of its costs falls below this
    pub sd_tolerance: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iters: 5000,
            sd_tolerance: 1e-14,
        }
    }
}

/// Fitted parameters of the allosteric sigmoid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SigmoidFit {
    pub h: f64,
    pub k_prime: f64,
    pub residual_sum_of_squares: f64,
    /// Standard errors of `(h, k')`, when the data over-determine the fit
    pub standard_errors: Option<[f64; 2]>,
    pub iterations: u64,
}

impl SigmoidFit {
    /// The fitted fraction of correctly assigned reads at `log_reads`
    pub fn evaluate(&self, log_reads: f64) -> f64 {
        allosteric_sigmoid(log_reads, self.h, self.k_prime)
    }

    /// The log10 read count at which the fitted curve reaches `fraction`
    pub fn log_reads_at(&self, fraction: f64) -> f64 {
        log_reads_at(self.h, self.k_prime, fraction)
    }

    /// # Errors
    /// See [`get_threshold`].
    pub fn min_reads(&self, threshold: f64) -> Result<u64> {
        get_threshold(self.h, self.k_prime, threshold)
    }

    /// `num_points` evenly spaced samples of the fitted curve over `[start, end]`
    pub fn curve(&self, start: f64, end: f64, num_points: usize) -> Vec<(f64, f64)> {
        Array1::linspace(start, end, num_points)
            .iter()
            .map(|&x| (x, self.evaluate(x)))
            .collect()
    }
}

/// Fit the allosteric sigmoid to the `(log_reads, correct_assign)` pairs of `records`
///
/// # Errors
/// Returns an error if the solver fails or does not converge within `settings.max_iters`.
pub fn fit(records: &[AssignmentRecord], settings: &FitSettings) -> Result<SigmoidFit> {
    Problem::new(records).solve(settings)
}

/// Least-squares problem for the sigmoid.
///
/// The solver works on `(ln h, ln k')` so every point it visits satisfies `h > 0` and `k' > 0`,
/// outside of which the model is undefined.
#[derive(Clone)]
pub(crate) struct Problem {
    log_reads: Array1<f64>,
    correct_assign: Array1<f64>,
}

impl Problem {
    pub(crate) fn new(records: &[AssignmentRecord]) -> Self {
        Self {
            log_reads: records.iter().map(|r| r.log_reads).collect(),
            correct_assign: records.iter().map(|r| r.correct_assign).collect(),
        }
    }

    fn residuals(&self, h: f64, k_prime: f64) -> Array1<f64> {
        self.log_reads
            .mapv(|x| allosteric_sigmoid(x, h, k_prime))
            - &self.correct_assign
    }

    fn residual_sum_of_squares(&self, h: f64, k_prime: f64) -> f64 {
        self.residuals(h, k_prime).mapv(|r| r * r).sum()
    }

    /// Jacobian of the residuals with respect to `(h, k')`, one row per observation
    fn jacobian(&self, h: f64, k_prime: f64) -> Array2<f64> {
        let mut jacobian = Array2::zeros((self.log_reads.len(), 2));
        for (mut row, &x) in jacobian.rows_mut().into_iter().zip(&self.log_reads) {
            let xh = x.powf(h);
            let denominator = (k_prime + xh).powi(2);
            row[0] = if x > 0.0 {
                k_prime * xh * x.ln() / denominator
            } else {
                0.0
            };
            row[1] = -xh / denominator;
        }
        jacobian
    }

    /// `sqrt(diag(s^2 (J^T J)^-1))` with `s^2 = RSS / (n - 2)`
    #[allow(clippy::cast_precision_loss)]
    fn standard_errors(&self, h: f64, k_prime: f64) -> Option<[f64; 2]> {
        let n = self.log_reads.len();
        if n <= 2 {
            return None;
        }
        let jacobian = self.jacobian(h, k_prime);
        let covariance = invert_2x2(&jacobian.t().dot(&jacobian))?;
        let variance = self.residual_sum_of_squares(h, k_prime) / (n - 2) as f64;

        let errors = [
            (variance * covariance[[0, 0]]).sqrt(),
            (variance * covariance[[1, 1]]).sqrt(),
        ];
        errors.iter().all(|e| e.is_finite()).then_some(errors)
    }

    /// Starting simplex around `h = 2` with the midpoint of the curve at the mean log read depth
    fn initial_simplex(&self) -> Vec<Array1<f64>> {
        let h = 2.0_f64;
        let centre = self.log_reads.mean().unwrap_or(1.0);
        let k_prime = if centre > 0.0 { centre.powf(h) } else { 1.0 };

        let start = array![h.ln(), k_prime.ln()];
        vec![
            start.clone(),
            &start + &array![0.5, 0.0],
            &start + &array![0.0, 0.5],
        ]
    }

    fn not_converged(&self, reason: String, source: argmin::core::Error) -> Error {
        Error::FitDidNotConverge {
            reason,
            log_reads: span(self.log_reads.iter().copied()),
            correct_assign: span(self.correct_assign.iter().copied()),
            source,
        }
    }

    /// Run the optimisation
    ///
    /// Nelder–Mead locates the basin of the least-squares optimum, then Gauss–Newton on the
    /// analytic Jacobian polishes it.
    pub(crate) fn solve(self, settings: &FitSettings) -> Result<SigmoidFit> {
        let solver = NelderMead::new(self.initial_simplex())
            .with_sd_tolerance(settings.sd_tolerance)
            .map_err(|e| self.not_converged("invalid solver settings".to_owned(), e))?;

        let res = Executor::new(self.clone(), solver)
            .configure(|state| state.max_iters(settings.max_iters))
            .add_observer(FitLogger, ObserverMode::Always)
            .run()
            .map_err(|e| self.not_converged(format!("solver failed: {e}"), e))?;

        let state = res.state();
        let iterations = state.get_iter();
        match state.get_termination_reason() {
            Some(TerminationReason::SolverConverged) => {}
            Some(reason) => {
                let reason = format!("{} after {iterations} iterations", reason.text());
                return Err(self.not_converged(
                    reason.clone(),
                    argmin::core::Error::msg(reason),
                ));
            }
            None => {
                return Err(self.not_converged(
                    "solver stopped without a termination reason".to_owned(),
                    argmin::core::Error::msg("missing termination reason"),
                ));
            }
        }

        let Some(simplex_best) = state.get_best_param().map(|p| [p[0], p[1]]) else {
            return Err(self.not_converged(
                "no finite parameters were found".to_owned(),
                argmin::core::Error::msg("best parameters missing"),
            ));
        };
        self.check_bounded(simplex_best)?;

        let log_params = self.refine(simplex_best);
        self.check_bounded(log_params)?;
        let (h, k_prime) = (log_params[0].exp(), log_params[1].exp());

        let residual_sum_of_squares = self.residual_sum_of_squares(h, k_prime);
        if !residual_sum_of_squares.is_finite() {
            return Err(self.not_converged(
                "the fitted curve is undefined at the observed read depths".to_owned(),
                argmin::core::Error::msg("non-finite residual sum of squares"),
            ));
        }

        log::info!(
            "fit allosteric sigmoid h = {h:.4}, k' = {k_prime:.4} (rss {residual_sum_of_squares:.3e}) in {iterations} iterations"
        );

        Ok(SigmoidFit {
            h,
            k_prime,
            residual_sum_of_squares,
            standard_errors: self.standard_errors(h, k_prime),
            iterations,
        })
    }

    /// Reject log-parameters that ran off towards a bound or give a curve that is flat over
    /// the observed read depths
    fn check_bounded(&self, log_params: [f64; 2]) -> Result<()> {
        if let Some(runaway) = log_params
            .iter()
            .zip(["h", "k'"])
            .find(|(value, _)| !value.is_finite() || value.abs() > MAX_LOG_PARAMETER)
        {
            let reason = format!(
                "ln {} = {:.3} left [-{MAX_LOG_PARAMETER}, {MAX_LOG_PARAMETER}]",
                runaway.1, runaway.0
            );
            return Err(self.not_converged(reason.clone(), argmin::core::Error::msg(reason)));
        }

        let (h, k_prime) = (log_params[0].exp(), log_params[1].exp());
        let (lo, hi) = span(self.log_reads.iter().copied());
        let rise = allosteric_sigmoid(hi, h, k_prime) - allosteric_sigmoid(lo, h, k_prime);
        if !(rise.abs() > MIN_CURVE_RISE) {
            let reason = format!("the fitted curve is flat (h = {h:.3e}, k' = {k_prime:.3e})");
            return Err(self.not_converged(reason.clone(), argmin::core::Error::msg(reason)));
        }
        Ok(())
    }

    /// Gauss–Newton steps from `log_params`, kept only if they lower the residual sum of squares
    fn refine(&self, log_params: [f64; 2]) -> [f64; 2] {
        let rss = |p: [f64; 2]| self.residual_sum_of_squares(p[0].exp(), p[1].exp());
        let solver: GaussNewton<f64> = GaussNewton::new();
        let res = Executor::new(Refinement(self.clone()), solver)
            .configure(|state| {
                state
                    .param(DVector::from_column_slice(&log_params))
                    .max_iters(REFINEMENT_MAX_ITERS)
            })
            .run();

        let refined = match res {
            Ok(res) => res.state().get_best_param().map(|p| [p[0], p[1]]),
            Err(e) => {
                log::debug!("Gauss-Newton refinement failed: {e}");
                None
            }
        };
        match refined {
            Some(refined) if rss(refined) <= rss(log_params) => refined,
            _ => log_params,
        }
    }
}

/// Largest magnitude of `ln h` or `ln k'` accepted from the solver
const MAX_LOG_PARAMETER: f64 = 20.0;
/// Smallest change of the fitted ratio across the observed read depths
const MIN_CURVE_RISE: f64 = 1e-6;
const REFINEMENT_MAX_ITERS: u64 = 50;

/// Residuals of the sigmoid as a function of `(ln h, ln k')`, for Gauss–Newton.
struct Refinement(Problem);

impl Operator for Refinement {
    type Param = DVector<f64>;
    type Output = DVector<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        let residuals = self.0.residuals(p[0].exp(), p[1].exp());
        Ok(DVector::from_iterator(residuals.len(), residuals.iter().copied()))
    }
}

impl Jacobian for Refinement {
    type Param = DVector<f64>;
    type Jacobian = DMatrix<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        let scale = [p[0].exp(), p[1].exp()];
        let jacobian = self.0.jacobian(scale[0], scale[1]);
        // Chain rule for the log parametrisation
        Ok(DMatrix::from_fn(jacobian.nrows(), 2, |row, col| {
            jacobian[[row, col]] * scale[col]
        }))
    }
}

impl CostFunction for Problem {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        let rss = self.residual_sum_of_squares(p[0].exp(), p[1].exp());
        // Non-finite costs would stall the simplex ordering
        Ok(if rss.is_finite() { rss } else { f64::INFINITY })
    }
}

/// Reports solver progress through `log` at trace level.
struct FitLogger;

impl<I: State<Float = f64>> Observe<I> for FitLogger {
    fn observe_iter(
        &mut self,
        state: &I,
        _kv: &KV,
    ) -> ::std::result::Result<(), argmin::core::Error> {
        log::trace!(
            "sigmoid fit iteration {}: best cost {:.6e}",
            state.get_iter(),
            state.get_best_cost()
        );
        Ok(())
    }
}
