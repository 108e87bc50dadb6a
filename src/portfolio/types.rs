//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared value types for portfolio optimization: the asset universe, weights,
//! bound constraints and performance triples.

use std::collections::HashSet;

use impl_new_derive::ImplNew;
use nalgebra::DVector;
use tracing::debug;

use crate::PortfolioError;
use crate::Result;

/// Ordered set of distinct asset identifiers.
///
/// The order is the canonical index of every vector and matrix derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetUniverse {
  assets: Vec<String>,
}

impl AssetUniverse {
  /// Build a universe, rejecting duplicate identifiers.
  pub fn new<I, S>(assets: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let assets: Vec<String> = assets.into_iter().map(Into::into).collect();
    let mut seen = HashSet::with_capacity(assets.len());
    for asset in &assets {
      if !seen.insert(asset.as_str()) {
        return Err(PortfolioError::Data(format!(
          "duplicate asset identifier '{asset}'"
        )));
      }
    }

    Ok(Self { assets })
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.assets.iter().map(String::as_str)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.assets
  }

  /// Position of `asset` in the canonical order.
  pub fn index_of(&self, asset: &str) -> Option<usize> {
    self.assets.iter().position(|a| a == asset)
  }
}

/// Asset weights keyed by identifier, in insertion order.
///
/// Each asset appears at most once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Weights {
  entries: Vec<(String, f64)>,
}

impl Weights {
  /// Build weights from `(asset, weight)` pairs, rejecting duplicate assets.
  pub fn new(entries: Vec<(String, f64)>) -> Result<Self> {
    let mut seen = HashSet::with_capacity(entries.len());
    for (asset, _) in &entries {
      if !seen.insert(asset.as_str()) {
        return Err(PortfolioError::Data(format!(
          "duplicate weight for asset '{asset}'"
        )));
      }
    }

    Ok(Self { entries })
  }

  /// Pair a weight vector with the universe that indexes it.
  pub fn from_vector(universe: &AssetUniverse, values: &[f64]) -> Self {
    Self {
      entries: universe
        .iter()
        .zip(values.iter())
        .map(|(asset, &w)| (asset.to_string(), w))
        .collect(),
    }
  }

  /// Weight of `asset`, if present.
  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .entries
      .iter()
      .find(|(a, _)| a == asset)
      .map(|(_, w)| *w)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.entries.iter().map(|(a, w)| (a.as_str(), *w))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn sum(&self) -> f64 {
    self.entries.iter().map(|(_, w)| w).sum()
  }

  /// Weight vector in `universe` order.
  ///
  /// Assets missing from the mapping get weight 0 and entries for assets
  /// outside the universe are ignored.
  pub fn aligned(&self, universe: &AssetUniverse) -> DVector<f64> {
    for (asset, _) in &self.entries {
      if universe.index_of(asset).is_none() {
        debug!(asset = asset.as_str(), "ignoring weight for asset outside the universe");
      }
    }

    DVector::from_iterator(
      universe.len(),
      universe.iter().map(|asset| self.get(asset).unwrap_or(0.0)),
    )
  }

  /// Rescale so the weights sum to one.
  pub fn renormalized(&self) -> Result<Self> {
    let total = self.sum();
    if total.abs() < f64::EPSILON {
      return Err(PortfolioError::DivisionByZero(
        "cannot renormalize weights summing to zero".to_string(),
      ));
    }

    Ok(Self {
      entries: self
        .entries
        .iter()
        .map(|(a, w)| (a.clone(), w / total))
        .collect(),
    })
  }
}

/// Collects like a map: a repeated asset keeps its first position and takes
/// the last weight.
impl<S: Into<String>> FromIterator<(S, f64)> for Weights {
  fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
    let mut entries: Vec<(String, f64)> = Vec::new();
    for (asset, w) in iter {
      let asset = asset.into();
      match entries.iter_mut().find(|(a, _)| *a == asset) {
        Some(entry) => entry.1 = w,
        None => entries.push((asset, w)),
      }
    }
    Self { entries }
  }
}

/// Per-asset box constraints on the weights.
#[derive(Clone, Debug, PartialEq)]
pub enum WeightBounds {
  /// The same `[lower, upper]` interval for every asset.
  Uniform { lower: f64, upper: f64 },
  /// One `(lower, upper)` pair per asset in universe order.
  PerAsset(Vec<(f64, f64)>),
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self::long_only()
  }
}

impl WeightBounds {
  /// Long-only box `[0, 1]`.
  pub fn long_only() -> Self {
    Self::Uniform {
      lower: 0.0,
      upper: 1.0,
    }
  }

  /// Uniform box `[lower, upper]`; a negative lower bound permits shorting.
  pub fn uniform(lower: f64, upper: f64) -> Self {
    Self::Uniform { lower, upper }
  }

  /// Expand to one interval per asset and check that a fully invested
  /// portfolio exists inside the box.
  pub fn resolve(&self, n: usize) -> Result<Vec<(f64, f64)>> {
    let bounds = match self {
      Self::Uniform { lower, upper } => vec![(*lower, *upper); n],
      Self::PerAsset(bounds) => {
        if bounds.len() != n {
          return Err(PortfolioError::Data(format!(
            "expected {n} weight bounds, got {}",
            bounds.len()
          )));
        }
        bounds.clone()
      }
    };

    for (i, &(lo, hi)) in bounds.iter().enumerate() {
      if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return Err(PortfolioError::Data(format!(
          "invalid bounds [{lo}, {hi}] for asset {i}"
        )));
      }
    }

    let lo_sum: f64 = bounds.iter().map(|b| b.0).sum();
    let hi_sum: f64 = bounds.iter().map(|b| b.1).sum();
    if lo_sum > 1.0 + 1e-12 || hi_sum < 1.0 - 1e-12 {
      return Err(PortfolioError::OptimizationInfeasible(format!(
        "bounds admit weight sums in [{lo_sum}, {hi_sum}], which excludes 1"
      )));
    }

    Ok(bounds)
  }
}

/// Annualized `(return, volatility, Sharpe)` triple of a weighting.
#[derive(Clone, Copy, Debug, PartialEq, ImplNew)]
pub struct PortfolioPerformance {
  /// Expected annual return `w·μ`.
  pub expected_return: f64,
  /// Annual volatility `sqrt(wᵀΣw)`.
  pub volatility: f64,
  /// `(expected_return - r_f) / volatility`; NaN when volatility is zero.
  pub sharpe: f64,
}

impl PortfolioPerformance {
  pub fn as_tuple(&self) -> (f64, f64, f64) {
    (self.expected_return, self.volatility, self.sharpe)
  }
}

/// Output of an optimization run.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizedPortfolio {
  pub weights: Weights,
  pub performance: PortfolioPerformance,
  /// The covariance was singular on the feasible subspace and the
  /// minimum-norm optimum was selected.
  pub degenerate: bool,
  /// Active-set iterations spent by the solver.
  pub iterations: usize,
}

impl OptimizedPortfolio {
  pub fn into_parts(self) -> (Weights, PortfolioPerformance) {
    (self.weights, self.performance)
  }
}

/// One point of the efficient frontier.
#[derive(Clone, Debug, PartialEq, ImplNew)]
pub struct FrontierPoint {
  pub target_return: f64,
  pub expected_return: f64,
  pub volatility: f64,
  pub weights: Weights,
}
