//! # Portfolio Optimizers
//!
//! $$
//! \min_{\mathbf y}\ \mathbf y^\top\Sigma\mathbf y
//! \quad\text{s.t.}\quad (\mu-r_f)^\top\mathbf y = 1,\ \ l\,\mathbf 1^\top\mathbf y \le \mathbf y \le u\,\mathbf 1^\top\mathbf y,
//! \qquad \mathbf w^\* = \mathbf y^\*/\mathbf 1^\top\mathbf y^\*
//! $$
//!
//! Long-only (or lower-bounded) mean-variance optimizers on top of the dual
//! active-set QP solver: maximum Sharpe ratio, minimum volatility and
//! minimum volatility for a target return.

use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::SymmetricEigen;
use tracing::debug;
use tracing::warn;

use super::data::PricePanel;
use super::frontier::EfficientFrontier;
use super::qp::QpError;
use super::qp::QpSolution;
use super::qp::QuadraticProgram;
use super::risk_model::CovarianceMatrix;
use super::risk_model::ExpectedReturnVector;
use super::risk_model::RiskModel;
use super::types::AssetUniverse;
use super::types::OptimizedPortfolio;
use super::types::PortfolioPerformance;
use super::types::WeightBounds;
use super::types::Weights;
use crate::PortfolioError;
use crate::Result;

/// Default rounding precision of [`clean_weights`].
pub const DEFAULT_PRECISION: u32 = 4;
/// Default cutoff of [`clean_weights`].
pub const DEFAULT_CUTOFF: f64 = 1e-4;

/// Ridge, relative to the mean variance, added to a (near) singular
/// covariance; selects the minimum-norm point among equally good optima.
const RIDGE: f64 = 1e-8;
/// Eigenvalues below this fraction of the largest count as zero.
const RANK_TOL: f64 = 1e-10;
/// Largest budget, bound or target residual accepted from the solver.
const SOLUTION_TOL: f64 = 1e-8;

/// Runtime configuration for [`PortfolioOptimizer`].
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
  /// Annual risk-free rate used in Sharpe ratios.
  pub risk_free_rate: f64,
  /// Box constraints on every weight.
  pub bounds: WeightBounds,
  /// Cap on active-set iterations per solve.
  pub max_iterations: usize,
  /// Report a covariance that is singular on the feasible subspace as
  /// [`PortfolioError::SingularCovariance`] instead of flagging the result.
  pub strict: bool,
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self {
      risk_free_rate: 0.0,
      bounds: WeightBounds::long_only(),
      max_iterations: 1000,
      strict: false,
    }
  }
}

/// Mean-variance optimizer over a fixed risk model.
#[derive(Clone, Debug)]
pub struct PortfolioOptimizer {
  expected_returns: ExpectedReturnVector,
  covariance: CovarianceMatrix,
  config: OptimizerConfig,
  bounds: Vec<(f64, f64)>,
  hessian: DMatrix<f64>,
  ridge: f64,
}

impl PortfolioOptimizer {
  pub fn new(
    expected_returns: ExpectedReturnVector,
    covariance: CovarianceMatrix,
    config: OptimizerConfig,
  ) -> Result<Self> {
    if expected_returns.assets() != covariance.assets() {
      return Err(PortfolioError::Data(
        "expected returns and covariance are indexed by different universes".to_string(),
      ));
    }
    if expected_returns.is_empty() {
      return Err(PortfolioError::Data("no assets to optimize".to_string()));
    }
    if !config.risk_free_rate.is_finite() {
      return Err(PortfolioError::Data("risk-free rate must be finite".to_string()));
    }

    let bounds = config.bounds.resolve(expected_returns.len())?;
    let (hessian, ridge) = risk_hessian(covariance.matrix());

    Ok(Self {
      expected_returns,
      covariance,
      config,
      bounds,
      hessian,
      ridge,
    })
  }

  /// Estimate the risk model from `prices` and build the optimizer.
  pub fn from_prices(
    prices: &PricePanel,
    risk_model: &RiskModel,
    config: OptimizerConfig,
  ) -> Result<Self> {
    let mu = risk_model.expected_returns(prices)?;
    let cov = risk_model.covariance(prices)?;
    Self::new(mu, cov, config)
  }

  pub fn expected_returns(&self) -> &ExpectedReturnVector {
    &self.expected_returns
  }

  pub fn covariance(&self) -> &CovarianceMatrix {
    &self.covariance
  }

  pub fn config(&self) -> &OptimizerConfig {
    &self.config
  }

  pub fn assets(&self) -> &AssetUniverse {
    self.expected_returns.assets()
  }

  /// Resolved `(lower, upper)` bound per asset.
  pub fn bounds(&self) -> &[(f64, f64)] {
    &self.bounds
  }

  /// Diagonal shift `ε` added to the risk Hessian `2Σ`; zero when Σ is well
  /// conditioned.
  pub fn ridge(&self) -> f64 {
    self.ridge
  }

  /// Upper bound on how far the ridge can move an optimal variance:
  /// `½wᵀ(2Σ + εI)w = wᵀΣw + ½ε‖w‖²` with `‖w‖²` bounded by the box.
  pub(crate) fn variance_slack(&self) -> f64 {
    let max_norm: f64 = self
      .bounds
      .iter()
      .map(|&(lo, hi)| (lo * lo).max(hi * hi))
      .sum();
    0.5 * self.ridge * max_norm
  }

  /// Portfolio maximizing `(w·μ - r_f) / sqrt(wᵀΣw)`.
  ///
  /// Solved as the homogeneous QP in `y = k·w`; see the module formula.
  pub fn maximize_sharpe(&self) -> Result<OptimizedPortfolio> {
    let n = self.expected_returns.len();
    let rf = self.config.risk_free_rate;

    let best = self.extreme_return(true);
    if best - rf <= 0.0 {
      return Err(PortfolioError::OptimizationInfeasible(format!(
        "highest attainable return {best} does not exceed the risk-free rate {rf}"
      )));
    }

    let excess = self.expected_returns.values().map(|m| m - rf);
    let ones = DVector::from_element(n, 1.0);
    let mut qp =
      QuadraticProgram::new(self.hessian.clone(), DVector::zeros(n)).with_equality(excess, 1.0);
    for (i, &(lo, hi)) in self.bounds.iter().enumerate() {
      let mut lower = ones.map(|v| -lo * v);
      lower[i] += 1.0;
      let mut upper = ones.map(|v| hi * v);
      upper[i] -= 1.0;
      qp = qp.with_inequality(lower, 0.0).with_inequality(upper, 0.0);
    }
    qp = qp.with_inequality(ones, 0.0);

    let sol = self.run(&qp, "max sharpe")?;
    let k = sol.x.sum();
    if k <= 1e-12 {
      return Err(PortfolioError::OptimizationInfeasible(
        "no fully invested portfolio improves on the risk-free rate".to_string(),
      ));
    }

    let w = sol.x / k;
    self.verify(&w, None, "max sharpe", sol.iterations)?;
    let w = self.clamp(w);
    let degenerate = self.check_degeneracy(&[DVector::from_element(n, 1.0)])?;
    Ok(self.finish(w, degenerate, sol.iterations))
  }

  /// Global minimum-volatility portfolio.
  pub fn minimize_volatility(&self) -> Result<OptimizedPortfolio> {
    let n = self.expected_returns.len();
    let qp = self.bounded_program().with_equality(DVector::from_element(n, 1.0), 1.0);
    let sol = self.run(&qp, "min volatility")?;
    self.verify(&sol.x, None, "min volatility", sol.iterations)?;

    let degenerate = self.check_degeneracy(&[DVector::from_element(n, 1.0)])?;
    Ok(self.finish(self.clamp(sol.x), degenerate, sol.iterations))
  }

  /// Minimum-volatility portfolio with expected return `target`.
  pub fn efficient_return(&self, target: f64) -> Result<OptimizedPortfolio> {
    let n = self.expected_returns.len();
    let lo = self.extreme_return(false);
    let hi = self.extreme_return(true);
    let tol = 1e-9 * (1.0 + lo.abs().max(hi.abs()));
    if !target.is_finite() || target < lo - tol || target > hi + tol {
      return Err(PortfolioError::OptimizationInfeasible(format!(
        "target return {target} outside attainable range [{lo}, {hi}]"
      )));
    }

    let mu = self.expected_returns.values().clone();
    let ones = DVector::from_element(n, 1.0);
    let qp = self
      .bounded_program()
      .with_equality(ones.clone(), 1.0)
      .with_equality(mu.clone(), target);
    let sol = self.run(&qp, "efficient return")?;
    self.verify(&sol.x, Some(target), "efficient return", sol.iterations)?;

    let degenerate = self.check_degeneracy(&[ones, mu])?;
    Ok(self.finish(self.clamp(sol.x), degenerate, sol.iterations))
  }

  /// Efficient frontier with `n_points` targets; see [`EfficientFrontier`].
  pub fn efficient_frontier(&self, n_points: usize) -> Result<EfficientFrontier<'_>> {
    EfficientFrontier::trace(self, n_points)
  }

  /// Annualized `(return, volatility, Sharpe)` of `weights`.
  ///
  /// Weights are aligned to the optimizer's universe with 0 for missing
  /// assets. Fails for a zero-volatility portfolio, whose Sharpe ratio is
  /// undefined.
  pub fn performance(&self, weights: &Weights) -> Result<PortfolioPerformance> {
    let w = weights.aligned(self.assets());
    let (ret, vol) = self.return_and_volatility(&w);
    if vol == 0.0 {
      return Err(PortfolioError::DivisionByZero(
        "portfolio volatility is zero, Sharpe ratio is undefined".to_string(),
      ));
    }

    Ok(PortfolioPerformance::new(
      ret,
      vol,
      (ret - self.config.risk_free_rate) / vol,
    ))
  }

  /// Highest (or lowest) expected return reachable inside the bounds.
  pub fn extreme_return(&self, highest: bool) -> f64 {
    let mu = self.expected_returns.values();
    let mut order: Vec<usize> = (0..mu.len()).collect();
    order.sort_by(|&a, &b| mu[b].total_cmp(&mu[a]));
    if !highest {
      order.reverse();
    }

    let mut w: Vec<f64> = self.bounds.iter().map(|b| b.0).collect();
    let mut budget = 1.0 - w.iter().sum::<f64>();
    for i in order {
      if budget <= 0.0 {
        break;
      }
      let add = (self.bounds[i].1 - self.bounds[i].0).min(budget);
      w[i] += add;
      budget -= add;
    }

    w.iter().zip(mu.iter()).map(|(w, m)| w * m).sum()
  }

  fn bounded_program(&self) -> QuadraticProgram {
    let n = self.expected_returns.len();
    let mut qp = QuadraticProgram::new(self.hessian.clone(), DVector::zeros(n));
    for (i, &(lo, hi)) in self.bounds.iter().enumerate() {
      let e = DVector::from_fn(n, |j, _| if j == i { 1.0 } else { 0.0 });
      qp = qp.with_inequality(e.clone(), lo).with_inequality(-e, -hi);
    }
    qp
  }

  fn run(&self, qp: &QuadraticProgram, problem: &str) -> Result<QpSolution> {
    let sol = qp
      .solve(self.config.max_iterations)
      .map_err(|err| match err {
        QpError::Infeasible => PortfolioError::OptimizationInfeasible(format!(
          "{problem}: constraints admit no solution"
        )),
        QpError::IterationLimit { iterations } | QpError::Inaccurate { iterations, .. } => {
          PortfolioError::Convergence { iterations }
        }
        QpError::NotPositiveDefinite => PortfolioError::SingularCovariance {
          min_eigenvalue: self.covariance.min_eigenvalue(),
        },
      })?;
    debug!(problem, iterations = sol.iterations, active = sol.active, "solved");
    Ok(sol)
  }

  /// Reject solver output that misses the budget, the bounds or `target`
  /// by more than [`SOLUTION_TOL`].
  fn verify(
    &self,
    w: &DVector<f64>,
    target: Option<f64>,
    problem: &str,
    iterations: usize,
  ) -> Result<()> {
    let budget = (w.sum() - 1.0).abs();
    let outside = w
      .iter()
      .zip(&self.bounds)
      .map(|(v, &(lo, hi))| (lo - v).max(v - hi))
      .fold(0.0_f64, f64::max);
    let missed = target.map_or(0.0, |t| {
      (w.dot(self.expected_returns.values()) - t).abs() / (1.0 + t.abs())
    });
    let residual = budget.max(outside).max(missed);

    if w.iter().any(|v| !v.is_finite()) || residual > SOLUTION_TOL {
      warn!(problem, residual, iterations, "solver returned an inaccurate portfolio");
      return Err(PortfolioError::Convergence { iterations });
    }
    Ok(())
  }

  /// Snap solver round-off onto the bounds.
  fn clamp(&self, w: DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
      w.len(),
      w.iter()
        .zip(&self.bounds)
        .map(|(v, &(lo, hi))| v.clamp(lo, hi)),
    )
  }

  fn return_and_volatility(&self, w: &DVector<f64>) -> (f64, f64) {
    let ret = w.dot(self.expected_returns.values());
    let var = self.covariance.variance(w).max(0.0);
    (ret, var.sqrt())
  }

  fn finish(&self, w: DVector<f64>, degenerate: bool, iterations: usize) -> OptimizedPortfolio {
    let (ret, vol) = self.return_and_volatility(&w);
    let sharpe = if vol > 0.0 {
      (ret - self.config.risk_free_rate) / vol
    } else {
      warn!("optimal portfolio has zero volatility, Sharpe ratio is undefined");
      f64::NAN
    };

    OptimizedPortfolio {
      weights: Weights::from_vector(self.assets(), w.as_slice()),
      performance: PortfolioPerformance::new(ret, vol, sharpe),
      degenerate,
      iterations,
    }
  }

  /// Whether Σ is singular on the null space of the equality normals; in
  /// strict mode this is an error.
  fn check_degeneracy(&self, equalities: &[DVector<f64>]) -> Result<bool> {
    let sigma = self.covariance.matrix();
    let n = sigma.nrows();
    let a = DMatrix::from_fn(equalities.len(), n, |i, j| equalities[i][j]);
    let aat = &a * a.transpose();
    let aat_inv = aat
      .pseudo_inverse(1e-12)
      .map_err(|e| PortfolioError::Data(e.to_string()))?;
    let range = a.transpose() * aat_inv * &a;
    let null = DMatrix::identity(n, n) - &range;

    let largest = SymmetricEigen::new(sigma.clone())
      .eigenvalues
      .iter()
      .fold(0.0_f64, |acc, v| acc.max(*v));
    let shift = sigma.trace().max(1.0);
    let reduced = &null * sigma * &null + range * shift;
    let min_eigenvalue = SymmetricEigen::new((&reduced + reduced.transpose()) * 0.5)
      .eigenvalues
      .iter()
      .copied()
      .fold(f64::INFINITY, f64::min);

    let degenerate = min_eigenvalue <= RANK_TOL * largest;
    if degenerate {
      if self.config.strict {
        return Err(PortfolioError::SingularCovariance { min_eigenvalue });
      }
      warn!(
        min_eigenvalue,
        "covariance is singular on the feasible subspace, using the minimum-norm optimum"
      );
    }
    Ok(degenerate)
  }
}

/// `2Σ` and the ridge added to its diagonal when the smallest eigenvalue of
/// Σ falls below `RIDGE × mean variance`, so the QP stays strictly convex.
fn risk_hessian(sigma: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
  let n = sigma.nrows();
  let mut g = sigma * 2.0;
  let smallest = SymmetricEigen::new(sigma.clone())
    .eigenvalues
    .iter()
    .copied()
    .fold(f64::INFINITY, f64::min);
  let mean_variance = sigma.trace() / n as f64;
  let scale = if mean_variance > 0.0 { mean_variance } else { 1.0 };

  if smallest >= RIDGE * scale {
    return (g, 0.0);
  }
  let ridge = RIDGE * scale;
  debug!(ridge, smallest, "covariance is near singular, adding ridge");
  for i in 0..n {
    g[(i, i)] += ridge;
  }
  (g, ridge)
}

/// Round every weight to `precision` decimals, then zero those with
/// magnitude below `cutoff`.
///
/// The result is not renormalized: its sum can drift from 1 by up to
/// `len × 10^-precision`. Applying it twice gives the same weights.
pub fn clean_weights(weights: &Weights, precision: u32, cutoff: f64) -> Weights {
  let factor = 10f64.powi(precision as i32);
  weights
    .iter()
    .map(|(asset, w)| {
      let rounded = (w * factor).round() / factor;
      let cleaned = if rounded.abs() < cutoff { 0.0 } else { rounded };
      (asset, cleaned)
    })
    .collect()
}

impl OptimizedPortfolio {
  /// Same portfolio with [`clean_weights`] applied; performance is kept from
  /// the raw weights.
  pub fn cleaned(mut self, precision: u32, cutoff: f64) -> Self {
    self.weights = clean_weights(&self.weights, precision, cutoff);
    self
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;
  use tracing_test::traced_test;

  use super::*;

  fn optimizer(mu: &[f64], cov: &[f64], config: OptimizerConfig) -> PortfolioOptimizer {
    let n = mu.len();
    let names: Vec<String> = (0..n).map(|i| format!("A{i}")).collect();
    let assets = AssetUniverse::new(names).unwrap();
    PortfolioOptimizer::new(
      ExpectedReturnVector::new(assets.clone(), DVector::from_row_slice(mu)).unwrap(),
      CovarianceMatrix::new(assets, DMatrix::from_row_slice(n, n, cov)).unwrap(),
      config,
    )
    .unwrap()
  }

  fn three_assets() -> PortfolioOptimizer {
    optimizer(
      &[0.08, 0.1, 0.12],
      &[0.04, 0.01, 0.0, 0.01, 0.09, 0.02, 0.0, 0.02, 0.16],
      OptimizerConfig::default(),
    )
  }

  fn assert_feasible(opt: &PortfolioOptimizer, result: &OptimizedPortfolio) {
    assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-6);
    for ((_, w), &(lo, hi)) in result.weights.iter().zip(opt.bounds()) {
      assert!(w >= lo - 1e-9 && w <= hi + 1e-9, "weight {w} outside [{lo}, {hi}]");
    }
  }

  #[test]
  fn min_volatility_matches_closed_form_for_uncorrelated_assets() {
    // Inverse-variance weights when the long-only bounds are slack.
    let opt = optimizer(&[0.1, 0.1], &[0.04, 0.0, 0.0, 0.09], OptimizerConfig::default());
    let result = opt.minimize_volatility().unwrap();

    assert_feasible(&opt, &result);
    assert_abs_diff_eq!(result.weights.get("A0").unwrap(), 0.09 / 0.13, epsilon = 1e-9);
    assert_abs_diff_eq!(
      result.performance.volatility,
      (0.04 * 0.09 / 0.13_f64).sqrt(),
      epsilon = 1e-9
    );
    assert!(!result.degenerate);
  }

  #[test]
  fn min_volatility_respects_long_only_bounds() {
    // The unconstrained minimum shorts the second asset.
    let opt = optimizer(&[0.1, 0.2], &[0.01, 0.018, 0.018, 0.09], OptimizerConfig::default());
    let result = opt.minimize_volatility().unwrap();

    assert_feasible(&opt, &result);
    assert_abs_diff_eq!(result.weights.get("A0").unwrap(), 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(result.weights.get("A1").unwrap(), 0.0, epsilon = 1e-9);
  }

  #[test]
  fn min_volatility_with_short_lower_bound() {
    let config = OptimizerConfig {
      bounds: WeightBounds::uniform(-1.0, 2.0),
      ..Default::default()
    };
    let opt = optimizer(&[0.1, 0.2], &[0.01, 0.018, 0.018, 0.09], config);
    let result = opt.minimize_volatility().unwrap();

    // w0 = (σ1² - σ12) / (σ0² + σ1² - 2σ12)
    let w0 = (0.09 - 0.018) / (0.01 + 0.09 - 0.036);
    assert_feasible(&opt, &result);
    assert_abs_diff_eq!(result.weights.get("A0").unwrap(), w0, epsilon = 1e-9);
    assert!(result.weights.get("A1").unwrap() < 0.0);
  }

  #[test]
  fn max_sharpe_matches_tangency_portfolio() {
    // Uncorrelated assets: w ∝ Σ⁻¹(μ - r_f).
    let opt = optimizer(&[0.1, 0.15], &[0.04, 0.0, 0.0, 0.09], OptimizerConfig::default());
    let result = opt.maximize_sharpe().unwrap();

    let raw = [0.1 / 0.04, 0.15 / 0.09];
    let total = raw[0] + raw[1];
    assert_feasible(&opt, &result);
    assert_abs_diff_eq!(result.weights.get("A0").unwrap(), raw[0] / total, epsilon = 1e-8);
    assert_abs_diff_eq!(result.weights.get("A1").unwrap(), raw[1] / total, epsilon = 1e-8);
  }

  #[test]
  fn max_sharpe_beats_min_volatility_and_feasible_mixes() {
    let opt = three_assets();
    let best = opt.maximize_sharpe().unwrap();
    let min_vol = opt.minimize_volatility().unwrap();
    assert_feasible(&opt, &best);

    assert!(best.performance.sharpe >= min_vol.performance.sharpe - 1e-9);
    for w in [[1.0, 0.0, 0.0], [0.2, 0.3, 0.5], [1.0 / 3.0; 3], [0.0, 0.5, 0.5]] {
      let weights = Weights::from_vector(opt.assets(), &w);
      let perf = opt.performance(&weights).unwrap();
      assert!(best.performance.sharpe >= perf.sharpe - 1e-9);
    }
  }

  #[test]
  fn max_sharpe_uses_risk_free_rate() {
    let config = OptimizerConfig {
      risk_free_rate: 0.02,
      ..Default::default()
    };
    let opt = optimizer(&[0.1, 0.15], &[0.04, 0.0, 0.0, 0.09], config);
    let result = opt.maximize_sharpe().unwrap();

    let raw = [0.08 / 0.04, 0.13 / 0.09];
    assert_abs_diff_eq!(
      result.weights.get("A0").unwrap(),
      raw[0] / (raw[0] + raw[1]),
      epsilon = 1e-8
    );
    let perf = result.performance;
    assert_relative_eq!(perf.sharpe, (perf.expected_return - 0.02) / perf.volatility);
  }

  #[test]
  fn max_sharpe_infeasible_when_nothing_beats_risk_free() {
    let opt = optimizer(&[-0.01, -0.02], &[0.04, 0.0, 0.0, 0.09], OptimizerConfig::default());
    let err = opt.maximize_sharpe().unwrap_err();
    assert!(matches!(err, PortfolioError::OptimizationInfeasible(_)));
  }

  #[test]
  fn single_asset_without_risk_gets_full_weight() {
    let opt = optimizer(&[0.05], &[0.0], OptimizerConfig::default());

    let sharpe = opt.maximize_sharpe().unwrap();
    let min_vol = opt.minimize_volatility().unwrap();
    assert_abs_diff_eq!(sharpe.weights.get("A0").unwrap(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(min_vol.weights.get("A0").unwrap(), 1.0, epsilon = 1e-12);
    assert!(sharpe.performance.sharpe.is_nan());
    assert_eq!(min_vol.performance.volatility, 0.0);
  }

  #[test]
  #[traced_test]
  fn identical_assets_choose_minimum_norm() {
    let opt = optimizer(&[0.1, 0.1], &[0.04, 0.04, 0.04, 0.04], OptimizerConfig::default());
    let result = opt.minimize_volatility().unwrap();

    assert!(result.degenerate);
    assert_abs_diff_eq!(result.weights.get("A0").unwrap(), 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(result.weights.get("A1").unwrap(), 0.5, epsilon = 1e-6);
    assert!(logs_contain("singular on the feasible subspace"));
  }

  #[test]
  fn strict_mode_reports_singular_covariance() {
    let config = OptimizerConfig {
      strict: true,
      ..Default::default()
    };
    let opt = optimizer(&[0.1, 0.1], &[0.04, 0.04, 0.04, 0.04], config);
    let err = opt.minimize_volatility().unwrap_err();
    assert!(matches!(err, PortfolioError::SingularCovariance { .. }));
  }

  #[test]
  fn iteration_cap_surfaces_as_convergence_error() {
    let config = OptimizerConfig {
      max_iterations: 0,
      ..Default::default()
    };
    let opt = optimizer(&[0.1, 0.2], &[0.04, 0.0, 0.0, 0.09], config);
    let err = opt.minimize_volatility().unwrap_err();
    assert!(matches!(err, PortfolioError::Convergence { iterations: 0 }));
  }

  /// Long-only simplex grid with step `1/steps` over three assets.
  fn simplex_grid(steps: usize) -> Vec<[f64; 3]> {
    let mut grid = Vec::new();
    for i in 0..=steps {
      for j in 0..=steps - i {
        let (a, b) = (i as f64 / steps as f64, j as f64 / steps as f64);
        grid.push([a, b, 1.0 - a - b]);
      }
    }
    grid
  }

  #[test]
  fn rank_two_covariance_keeps_budget_and_optimality() {
    // Σ = FᵀF with F of shape 2 × 3.
    let opt = optimizer(
      &[0.053, 0.020, 0.219],
      &[0.1, -0.02, 0.12, -0.02, 0.2, -0.22, 0.12, -0.22, 0.34],
      OptimizerConfig::default(),
    );
    assert!(opt.ridge() > 0.0);

    let min_vol = opt.minimize_volatility().unwrap();
    let best = opt.maximize_sharpe().unwrap();
    for result in [&min_vol, &best] {
      assert_abs_diff_eq!(result.weights.sum(), 1.0, epsilon = 1e-8);
      assert_feasible(&opt, result);
    }

    let best_var = min_vol.performance.volatility.powi(2);
    for w in simplex_grid(20) {
      let weights = Weights::from_vector(opt.assets(), &w);
      let perf = opt.performance(&weights).unwrap();
      assert!(best_var <= perf.volatility.powi(2) + opt.variance_slack() + 1e-12);
      assert!(best.performance.sharpe >= perf.sharpe * (1.0 - 1e-6) - 1e-9);
    }
  }

  #[test]
  fn collinear_asset_frontier_is_fully_invested() {
    // C = ½A + ½B.
    let opt = optimizer(
      &[0.08, 0.12, 0.10],
      &[0.04, 0.006, 0.023, 0.006, 0.09, 0.048, 0.023, 0.048, 0.0355],
      OptimizerConfig::default(),
    );
    let points = opt.efficient_frontier(10).unwrap().points().unwrap();

    assert_eq!(points.len(), 10);
    for p in &points {
      assert_abs_diff_eq!(p.weights.sum(), 1.0, epsilon = 1e-8);
      assert_abs_diff_eq!(p.expected_return, p.target_return, epsilon = 1e-8);
    }
  }

  #[test]
  #[traced_test]
  fn verify_rejects_off_budget_weights() {
    let opt = three_assets();
    let drifted = DVector::from_vec(vec![0.6, 0.5, 0.45]);
    let err = opt.verify(&drifted, None, "test", 7).unwrap_err();

    assert!(matches!(err, PortfolioError::Convergence { iterations: 7 }));
    assert!(logs_contain("inaccurate portfolio"));

    let outside = DVector::from_vec(vec![1.2, -0.2, 0.0]);
    assert!(opt.verify(&outside, None, "test", 1).is_err());
    let on_target = DVector::from_vec(vec![0.5, 0.0, 0.5]);
    assert!(opt.verify(&on_target, Some(0.1), "test", 1).is_ok());
    assert!(opt.verify(&on_target, Some(0.11), "test", 1).is_err());
  }

  #[test]
  fn efficient_return_hits_target() {
    let opt = three_assets();
    let result = opt.efficient_return(0.11).unwrap();

    assert_feasible(&opt, &result);
    assert_abs_diff_eq!(result.performance.expected_return, 0.11, epsilon = 1e-9);
    assert!(matches!(
      opt.efficient_return(0.2),
      Err(PortfolioError::OptimizationInfeasible(_))
    ));
  }

  #[test]
  fn extreme_returns_respect_bounds() {
    let config = OptimizerConfig {
      bounds: WeightBounds::uniform(0.0, 0.5),
      ..Default::default()
    };
    let opt = optimizer(
      &[0.08, 0.1, 0.12],
      &[0.04, 0.01, 0.0, 0.01, 0.09, 0.02, 0.0, 0.02, 0.16],
      config,
    );

    assert_abs_diff_eq!(opt.extreme_return(true), 0.5 * 0.12 + 0.5 * 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(opt.extreme_return(false), 0.5 * 0.08 + 0.5 * 0.1, epsilon = 1e-12);
  }

  #[test]
  fn performance_of_zero_volatility_portfolio_fails() {
    let opt = optimizer(&[0.05, 0.1], &[0.0, 0.0, 0.0, 0.04], OptimizerConfig::default());
    let cash: Weights = [("A0", 1.0)].into_iter().collect();

    assert!(matches!(
      opt.performance(&cash),
      Err(PortfolioError::DivisionByZero(_))
    ));
  }

  #[test]
  fn performance_triple() {
    let opt = three_assets();
    let w: Weights = [("A0", 0.5), ("A2", 0.5)].into_iter().collect();
    let perf = opt.performance(&w).unwrap();

    assert_abs_diff_eq!(perf.expected_return, 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(perf.volatility, (0.25 * 0.04 + 0.25 * 0.16_f64).sqrt(), epsilon = 1e-12);
    assert_abs_diff_eq!(perf.sharpe, perf.expected_return / perf.volatility, epsilon = 1e-12);
  }

  #[test]
  fn clean_weights_rounds_then_cuts_without_renormalizing() {
    let w: Weights = [("A", 0.333333), ("B", 0.66661), ("C", 0.00004)]
      .into_iter()
      .collect();
    let cleaned = clean_weights(&w, DEFAULT_PRECISION, DEFAULT_CUTOFF);

    assert_eq!(cleaned.get("A"), Some(0.3333));
    assert_eq!(cleaned.get("B"), Some(0.6666));
    assert_eq!(cleaned.get("C"), Some(0.0));
    assert!((cleaned.sum() - 1.0).abs() > 0.0);
  }

  #[test]
  fn clean_weights_is_idempotent() {
    let w: Weights = [("A", 0.123456789), ("B", 0.00012), ("C", 0.876431)]
      .into_iter()
      .collect();
    let once = clean_weights(&w, 4, 1e-4);
    let twice = clean_weights(&once, 4, 1e-4);
    assert_eq!(once, twice);
  }
}
