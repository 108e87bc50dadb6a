//! # Portfolio Engine
//!
//! $$
//! P \to (\mu, \Sigma) \to \mathbf w^\* \to V_t \to (R, R_{ann}, \mathrm{SR}, \mathrm{MDD})
//! $$
//!
//! High-level orchestration of risk estimation, optimization, frontier tracing
//! and backtesting.

use tracing::info;

use super::backtest::BacktestEngine;
use super::backtest::BacktestMode;
use super::backtest::BacktestResult;
use super::data::PricePanel;
use super::metrics::PerformanceAnalyzer;
use super::metrics::PerformanceReport;
use super::optimizers::OptimizerConfig;
use super::optimizers::PortfolioOptimizer;
use super::optimizers::DEFAULT_CUTOFF;
use super::optimizers::DEFAULT_PRECISION;
use super::risk_model::RiskModel;
use super::risk_model::RiskModelConfig;
use super::types::FrontierPoint;
use super::types::OptimizedPortfolio;
use super::types::Weights;
use crate::Result;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug)]
pub struct PortfolioEngineConfig {
  /// Estimators used to build `μ` and `Σ` from prices.
  pub risk_model: RiskModelConfig,
  /// Risk-free rate, bounds and solver limits.
  pub optimizer: OptimizerConfig,
  /// Decimals kept by weight cleaning.
  pub clean_precision: u32,
  /// Weights below this magnitude are zeroed after rounding.
  pub clean_cutoff: f64,
  /// Number of points traced by [`PortfolioEngine::frontier`].
  pub frontier_points: usize,
  pub backtest_mode: BacktestMode,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      risk_model: RiskModelConfig::default(),
      optimizer: OptimizerConfig::default(),
      clean_precision: DEFAULT_PRECISION,
      clean_cutoff: DEFAULT_CUTOFF,
      frontier_points: 50,
      backtest_mode: BacktestMode::default(),
    }
  }
}

/// Max-Sharpe and min-volatility portfolios with cleaned weights.
///
/// Performance is measured on the raw optimizer weights.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationReport {
  pub max_sharpe: OptimizedPortfolio,
  pub min_volatility: OptimizedPortfolio,
}

/// Backtest paths together with their metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestReport {
  pub result: BacktestResult,
  pub metrics: PerformanceReport,
}

/// Single entry-point for the price-to-metrics pipeline.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Estimate the risk model on `prices` and build an optimizer over it.
  pub fn optimizer(&self, prices: &PricePanel) -> Result<PortfolioOptimizer> {
    let risk_model = RiskModel::new(self.config.risk_model.clone());
    PortfolioOptimizer::from_prices(prices, &risk_model, self.config.optimizer.clone())
  }

  /// Max-Sharpe and min-volatility portfolios for `prices`.
  pub fn optimize(&self, prices: &PricePanel) -> Result<OptimizationReport> {
    let optimizer = self.optimizer(prices)?;
    let precision = self.config.clean_precision;
    let cutoff = self.config.clean_cutoff;

    let max_sharpe = optimizer.maximize_sharpe()?.cleaned(precision, cutoff);
    let min_volatility = optimizer.minimize_volatility()?.cleaned(precision, cutoff);
    info!(
      sharpe = max_sharpe.performance.sharpe,
      min_volatility = min_volatility.performance.volatility,
      "optimized portfolios"
    );

    Ok(OptimizationReport {
      max_sharpe,
      min_volatility,
    })
  }

  /// Efficient frontier of `prices`, ordered by target return.
  pub fn frontier(&self, prices: &PricePanel) -> Result<Vec<FrontierPoint>> {
    let optimizer = self.optimizer(prices)?;
    let points = optimizer
      .efficient_frontier(self.config.frontier_points)?
      .points()?;
    info!(points = points.len(), "traced efficient frontier");
    Ok(points)
  }

  /// Backtest `weights` (and `benchmark`) over `prices` and evaluate both paths.
  pub fn backtest(
    &self,
    prices: &PricePanel,
    weights: &Weights,
    benchmark: Option<&Weights>,
  ) -> Result<BacktestReport> {
    let result = BacktestEngine::new(self.config.backtest_mode).run(prices, weights, benchmark)?;
    let metrics = PerformanceAnalyzer::new(self.config.risk_model.frequency).evaluate(&result)?;
    info!(
      total_return = metrics.strategy.total_return,
      max_drawdown = metrics.strategy.max_drawdown,
      "backtest evaluated"
    );

    Ok(BacktestReport { result, metrics })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::NaiveDate;

  use super::*;
  use crate::portfolio::data::business_days;

  fn prices() -> PricePanel {
    let n = 60;
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let mut a = vec![100.0];
    let mut b = vec![50.0];
    let mut c = vec![20.0];
    for t in 1..n {
      let s = (t as f64 * 0.7).sin();
      a.push(a[t - 1] * (1.0 + 0.001 + 0.01 * s));
      b.push(b[t - 1] * (1.0 + 0.0005 - 0.004 * s + 0.002 * (t as f64 * 1.3).cos()));
      c.push(c[t - 1] * (1.0 + 0.0015 + 0.02 * (t as f64 * 0.4).cos()));
    }
    PricePanel::from_columns(business_days(start, n), vec![("A", a), ("B", b), ("C", c)])
      .unwrap()
  }

  #[test]
  fn optimize_returns_clean_fully_invested_weights() {
    let engine = PortfolioEngine::default();
    let report = engine.optimize(&prices()).unwrap();

    for portfolio in [&report.max_sharpe, &report.min_volatility] {
      assert_abs_diff_eq!(portfolio.weights.sum(), 1.0, epsilon = 1e-3);
      for (_, w) in portfolio.weights.iter() {
        assert_eq!(w, (w * 1e4).round() / 1e4);
        assert!(w >= 0.0);
      }
    }
    assert!(
      report.max_sharpe.performance.sharpe >= report.min_volatility.performance.sharpe - 1e-9
    );
    assert!(
      report.min_volatility.performance.volatility
        <= report.max_sharpe.performance.volatility + 1e-12
    );
  }

  #[test]
  fn frontier_has_configured_length() {
    let engine = PortfolioEngine::new(PortfolioEngineConfig {
      frontier_points: 7,
      ..Default::default()
    });
    let points = engine.frontier(&prices()).unwrap();
    assert_eq!(points.len(), 7);
  }

  #[test]
  fn backtest_report_includes_benchmark() {
    let engine = PortfolioEngine::default();
    let prices = prices();
    let weights: Weights = [("A", 0.5), ("C", 0.5)].into_iter().collect();
    let bench: Weights = [("B", 1.0)].into_iter().collect();
    let report = engine.backtest(&prices, &weights, Some(&bench)).unwrap();

    assert_eq!(report.result.len(), prices.n_dates());
    assert!(report.metrics.benchmark.is_some());
    assert!(report.metrics.strategy.max_drawdown <= 0.0);
  }
}
