//! # Backtest
//!
//! $$
//! V_0 = 1,\qquad V_t = V_{t-1}\,(1 + \mathbf r_t\cdot\mathbf w)
//! $$
//!
//! Cumulative return paths of static weightings over a price panel.

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Axis;
use tracing::debug;

use super::data::PricePanel;
use super::types::Weights;
use crate::PortfolioError;
use crate::Result;

/// How the weights evolve over the backtest window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BacktestMode {
  /// Daily return is always `r_t · w`.
  #[default]
  FixedWeights,
  /// Buy once at the first price and hold: `V_t = Σ w_i P_{t,i} / P_{0,i} / Σ w`.
  Drift,
}

/// Cumulative returns of a strategy and an optional benchmark on one date
/// index.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestResult {
  pub dates: Vec<NaiveDate>,
  pub strategy: Array1<f64>,
  pub benchmark: Option<Array1<f64>>,
  /// Daily strategy returns, one fewer than `dates`.
  pub strategy_returns: Array1<f64>,
  pub benchmark_returns: Option<Array1<f64>>,
}

impl BacktestResult {
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  /// `(date, strategy, benchmark)` rows.
  pub fn series(&self) -> impl Iterator<Item = (NaiveDate, f64, Option<f64>)> + '_ {
    self
      .dates
      .iter()
      .enumerate()
      .map(|(t, d)| (*d, self.strategy[t], self.benchmark.as_ref().map(|b| b[t])))
  }
}

#[derive(Clone, Copy, Debug, Default, ImplNew)]
pub struct BacktestEngine {
  pub mode: BacktestMode,
}

impl BacktestEngine {
  /// Simulate `weights` (and `benchmark`) over `prices`.
  ///
  /// Weights are aligned to the panel's assets: missing assets get 0, unknown
  /// assets are ignored.
  pub fn run(
    &self,
    prices: &PricePanel,
    weights: &Weights,
    benchmark: Option<&Weights>,
  ) -> Result<BacktestResult> {
    if prices.n_dates() == 0 {
      return Err(PortfolioError::Data("cannot backtest an empty price panel".to_string()));
    }

    let (strategy, strategy_returns) = self.simulate(prices, weights)?;
    let (benchmark, benchmark_returns) = match benchmark {
      Some(b) => {
        let (cum, ret) = self.simulate(prices, b)?;
        (Some(cum), Some(ret))
      }
      None => (None, None),
    };
    debug!(
      dates = prices.n_dates(),
      mode = ?self.mode,
      final_value = strategy[strategy.len() - 1],
      "backtest complete"
    );

    Ok(BacktestResult {
      dates: prices.dates().to_vec(),
      strategy,
      benchmark,
      strategy_returns,
      benchmark_returns,
    })
  }

  fn simulate(&self, prices: &PricePanel, weights: &Weights) -> Result<(Array1<f64>, Array1<f64>)> {
    let w = Array1::from_iter(weights.aligned(prices.assets()).iter().copied());

    match self.mode {
      BacktestMode::FixedWeights => {
        let daily = prices.returns().values().dot(&w);
        let mut cum = Array1::ones(daily.len() + 1);
        for (t, r) in daily.iter().enumerate() {
          cum[t + 1] = cum[t] * (1.0 + r);
        }
        Ok((cum, daily))
      }
      BacktestMode::Drift => {
        let total = w.sum();
        if total.abs() < f64::EPSILON {
          return Err(PortfolioError::Data(
            "buy-and-hold weights must not sum to zero".to_string(),
          ));
        }
        let p = prices.prices();
        let base = p.index_axis(Axis(0), 0);
        let cum = (&p / &base).dot(&w) / total;
        Ok((cum.clone(), pct_change(&cum)))
      }
    }
  }
}

/// `x_t / x_{t-1} - 1` for `t >= 1`.
pub fn pct_change(values: &Array1<f64>) -> Array1<f64> {
  values
    .windows(2)
    .into_iter()
    .map(|w| w[1] / w[0] - 1.0)
    .collect()
}
