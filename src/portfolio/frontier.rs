//! # Efficient Frontier
//!
//! $$
//! \sigma^\*(r)=\min_{\mathbf w}\sqrt{\mathbf w^\top\Sigma\mathbf w}
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ \mu^\top\mathbf w=r,\ l\le\mathbf w\le u
//! $$
//!
//! Targets are spaced linearly from the minimum-volatility return up to the
//! highest single-asset expected return that the bounds can still reach.

use rayon::prelude::*;
use tracing::debug;

use super::optimizers::PortfolioOptimizer;
use super::types::FrontierPoint;
use crate::PortfolioError;
use crate::Result;

const MONOTONE_TOL: f64 = 1e-8;

/// Finite set of frontier targets over one optimizer.
///
/// Points are computed on demand; [`EfficientFrontier::iter`] can be called
/// any number of times and always starts from the lowest target.
#[derive(Clone, Debug)]
pub struct EfficientFrontier<'a> {
  optimizer: &'a PortfolioOptimizer,
  targets: Vec<f64>,
}

impl<'a> EfficientFrontier<'a> {
  /// Lay out `n_points` targets for `optimizer`.
  ///
  /// When no return above the minimum-volatility return is attainable only
  /// that single point is kept.
  pub fn trace(optimizer: &'a PortfolioOptimizer, n_points: usize) -> Result<Self> {
    if n_points == 0 {
      return Ok(Self {
        optimizer,
        targets: Vec::new(),
      });
    }

    let lower = optimizer.minimize_volatility()?.performance.expected_return;
    let max_mu = optimizer
      .expected_returns()
      .values()
      .iter()
      .copied()
      .fold(f64::NEG_INFINITY, f64::max);
    let reachable = optimizer.extreme_return(true);
    let mut upper = max_mu.min(reachable);
    upper -= 1e-9 * (upper - lower).abs();

    let targets = if n_points == 1 || upper - lower <= 1e-12 * (1.0 + lower.abs()) {
      vec![lower]
    } else {
      let step = (upper - lower) / (n_points - 1) as f64;
      (0..n_points).map(|i| lower + step * i as f64).collect()
    };
    debug!(lower, upper, points = targets.len(), "frontier targets");

    Ok(Self::with_targets(optimizer, targets))
  }

  /// Frontier over explicit targets, solved in the given order.
  pub(crate) fn with_targets(optimizer: &'a PortfolioOptimizer, targets: Vec<f64>) -> Self {
    Self { optimizer, targets }
  }

  pub fn targets(&self) -> &[f64] {
    &self.targets
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  /// Lazily solve each target in increasing order.
  pub fn iter(&self) -> FrontierIter<'_, 'a> {
    FrontierIter {
      frontier: self,
      next: 0,
      previous: None,
      done: false,
    }
  }

  /// Every point, in target order.
  pub fn points(&self) -> Result<Vec<FrontierPoint>> {
    self.iter().collect()
  }

  /// Every point, solved in parallel and ordered by volatility.
  pub fn points_par(&self) -> Result<Vec<FrontierPoint>> {
    let mut points = self
      .targets
      .par_iter()
      .map(|&target| self.solve(target))
      .collect::<Result<Vec<_>>>()?;
    points.sort_by(|a, b| {
      a.volatility
        .total_cmp(&b.volatility)
        .then(a.target_return.total_cmp(&b.target_return))
    });

    for (i, pair) in points.windows(2).enumerate() {
      let (prev, cur) = (pair[0].expected_return, pair[1].expected_return);
      let falls = cur < prev - MONOTONE_TOL * (1.0 + prev.abs());
      if falls && self.variance_falls(pair[1].volatility, pair[0].volatility) {
        return Err(PortfolioError::FrontierNotMonotone {
          index: i + 1,
          previous: prev,
          current: cur,
        });
      }
    }
    Ok(points)
  }

  /// Whether moving from volatility `from` to `to` lowers the variance by
  /// more than the ridge can account for.
  fn variance_falls(&self, from: f64, to: f64) -> bool {
    let slack = self.optimizer.variance_slack() + MONOTONE_TOL * (1.0 + from * from);
    to * to < from * from - slack
  }

  fn solve(&self, target: f64) -> Result<FrontierPoint> {
    let (weights, perf) = self.optimizer.efficient_return(target)?.into_parts();
    Ok(FrontierPoint::new(
      target,
      perf.expected_return,
      perf.volatility,
      weights,
    ))
  }
}

impl<'f, 'a> IntoIterator for &'f EfficientFrontier<'a> {
  type Item = Result<FrontierPoint>;
  type IntoIter = FrontierIter<'f, 'a>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

/// Iterator over frontier points; stops after the first error.
pub struct FrontierIter<'f, 'a> {
  frontier: &'f EfficientFrontier<'a>,
  next: usize,
  previous: Option<f64>,
  done: bool,
}

impl Iterator for FrontierIter<'_, '_> {
  type Item = Result<FrontierPoint>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    let target = *self.frontier.targets.get(self.next)?;
    let index = self.next;
    self.next += 1;

    let point = match self.frontier.solve(target) {
      Ok(point) => point,
      Err(err) => {
        self.done = true;
        return Some(Err(err));
      }
    };

    if let Some(prev) = self.previous {
      if self.frontier.variance_falls(prev, point.volatility) {
        self.done = true;
        return Some(Err(PortfolioError::FrontierNotMonotone {
          index,
          previous: prev,
          current: point.volatility,
        }));
      }
    }
    self.previous = Some(point.volatility);
    Some(Ok(point))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let left = if self.done {
      0
    } else {
      self.frontier.targets.len() - self.next
    };
    (0, Some(left))
  }
}
