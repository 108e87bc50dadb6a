//! # Performance Metrics
//!
//! $$
//! \mathrm{MDD}=\min_t\left(\frac{V_t}{\max_{s\le t}V_s}-1\right),\qquad
//! \mathrm{SR}=\frac{\bar r}{s_r}\sqrt{252}
//! $$
//!
//! Return and risk statistics of cumulative return paths.

use impl_new_derive::ImplNew;
use ndarray::Array1;
use statrs::statistics::Statistics;
use tracing::warn;

use super::backtest::pct_change;
use super::backtest::BacktestResult;
use crate::PortfolioError;
use crate::Result;
use crate::TRADING_DAYS;

#[derive(Clone, Copy, Debug, PartialEq, ImplNew)]
pub struct PerformanceMetrics {
  /// `V_last - 1`.
  pub total_return: f64,
  /// `(1 + total)^(frequency / n) - 1` over `n` retained dates.
  pub annualized_return: f64,
  /// Annualized Sharpe of the daily returns, without a risk-free baseline.
  /// NaN when fewer than two returns exist or they have zero dispersion.
  pub sharpe_ratio: f64,
  /// Always `<= 0`.
  pub max_drawdown: f64,
}

/// Metrics for both series of a [`BacktestResult`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceReport {
  pub strategy: PerformanceMetrics,
  pub benchmark: Option<PerformanceMetrics>,
}

#[derive(Clone, Copy, Debug, ImplNew)]
pub struct PerformanceAnalyzer {
  /// Periods per year.
  pub frequency: f64,
}

impl Default for PerformanceAnalyzer {
  fn default() -> Self {
    Self {
      frequency: TRADING_DAYS,
    }
  }
}

impl PerformanceAnalyzer {
  pub fn evaluate(&self, result: &BacktestResult) -> Result<PerformanceReport> {
    let strategy = self.evaluate_series(&result.strategy)?;
    let benchmark = match &result.benchmark {
      Some(b) => Some(self.evaluate_series(b)?),
      None => None,
    };

    Ok(PerformanceReport {
      strategy,
      benchmark,
    })
  }

  /// Metrics of one cumulative return path starting at 1.
  pub fn evaluate_series(&self, cumulative: &Array1<f64>) -> Result<PerformanceMetrics> {
    let n = cumulative.len();
    if n == 0 {
      return Err(PortfolioError::Data(
        "cannot evaluate an empty return series".to_string(),
      ));
    }

    let total_return = cumulative[n - 1] - 1.0;
    let annualized_return = (1.0 + total_return).powf(self.frequency / n as f64) - 1.0;

    let daily = pct_change(cumulative);
    let sharpe_ratio = if daily.len() < 2 {
      warn!(returns = daily.len(), "too few returns for a Sharpe ratio");
      f64::NAN
    } else {
      let std = daily.iter().std_dev();
      if std == 0.0 {
        warn!("daily returns have zero dispersion, Sharpe ratio is undefined");
        f64::NAN
      } else {
        daily.iter().mean() / std * self.frequency.sqrt()
      }
    };

    Ok(PerformanceMetrics::new(
      total_return,
      annualized_return,
      sharpe_ratio,
      max_drawdown(cumulative),
    ))
  }
}

/// Largest peak-to-trough decline, as a non-positive fraction.
pub fn max_drawdown(values: &Array1<f64>) -> f64 {
  let mut peak = f64::NEG_INFINITY;
  let mut worst = 0.0_f64;
  for &v in values {
    peak = peak.max(v);
    worst = worst.min(v / peak - 1.0);
  }
  worst
}
