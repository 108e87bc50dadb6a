//! # Risk Model
//!
//! $$
//! \hat\Sigma_{ij} = \frac{252}{T-1}\sum_{t=1}^{T}(r_{t,i}-\bar r_i)(r_{t,j}-\bar r_j),\qquad
//! \hat\mu_i = 252\,\bar r_i
//! $$
//!
//! Annualized covariance and expected-return estimators over a price panel.

use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::SymmetricEigen;
use statrs::statistics::Statistics;
use tracing::debug;
use tracing::warn;

use super::data::PricePanel;
use super::data::ReturnsSeries;
use super::types::AssetUniverse;
use crate::PortfolioError;
use crate::Result;
use crate::TRADING_DAYS;

/// Variance relative to the squared mean below which a series is constant.
const ZERO_VARIANCE_TOL: f64 = 1e-20;

/// Expected-return estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ReturnsEstimator {
  /// Arithmetic mean of daily returns, annualized linearly.
  #[default]
  MeanHistorical,
  /// Geometric (CAGR) return over the whole window.
  Compounded,
  /// Exponentially weighted mean of daily returns with the given span.
  ExponentiallyWeighted { span: usize },
}

/// Covariance estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum CovarianceEstimator {
  /// Unbiased sample covariance.
  #[default]
  Sample,
  /// Covariance of returns below a daily benchmark return.
  Semicovariance { benchmark: f64 },
  /// Exponentially weighted covariance with the given span.
  ExponentiallyWeighted { span: usize },
}

/// Runtime configuration for [`RiskModel`].
#[derive(Clone, Debug)]
pub struct RiskModelConfig {
  pub returns: ReturnsEstimator,
  pub covariance: CovarianceEstimator,
  /// Periods per year used for annualization.
  pub frequency: f64,
}

impl Default for RiskModelConfig {
  fn default() -> Self {
    Self {
      returns: ReturnsEstimator::MeanHistorical,
      covariance: CovarianceEstimator::Sample,
      frequency: TRADING_DAYS,
    }
  }
}

/// Annualized covariance matrix indexed by an [`AssetUniverse`].
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  assets: AssetUniverse,
  matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
  /// Wrap a square matrix; it is symmetrized and must match the universe.
  pub fn new(assets: AssetUniverse, matrix: DMatrix<f64>) -> Result<Self> {
    let n = assets.len();
    if matrix.nrows() != n || matrix.ncols() != n {
      return Err(PortfolioError::Data(format!(
        "covariance is {}x{} for {n} assets",
        matrix.nrows(),
        matrix.ncols()
      )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::Data(
        "covariance contains non-finite entries".to_string(),
      ));
    }

    let matrix = (&matrix + matrix.transpose()) * 0.5;
    Ok(Self { assets, matrix })
  }

  pub fn assets(&self) -> &AssetUniverse {
    &self.assets
  }

  pub fn matrix(&self) -> &DMatrix<f64> {
    &self.matrix
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  /// `wᵀΣw` for a weight vector in universe order.
  pub fn variance(&self, w: &DVector<f64>) -> f64 {
    w.dot(&(&self.matrix * w))
  }

  /// Smallest eigenvalue of the matrix.
  pub fn min_eigenvalue(&self) -> f64 {
    if self.matrix.is_empty() {
      return 0.0;
    }
    SymmetricEigen::new(self.matrix.clone())
      .eigenvalues
      .iter()
      .copied()
      .fold(f64::INFINITY, f64::min)
  }

  /// Pearson correlation matrix; assets with zero variance get zero
  /// off-diagonal correlation.
  pub fn correlation(&self) -> DMatrix<f64> {
    let n = self.matrix.nrows();
    let sd: Vec<f64> = (0..n).map(|i| self.matrix[(i, i)].max(0.0).sqrt()).collect();

    DMatrix::from_fn(n, n, |i, j| {
      if i == j {
        1.0
      } else {
        let denom = sd[i] * sd[j];
        if denom > 1e-15 {
          (self.matrix[(i, j)] / denom).clamp(-1.0, 1.0)
        } else {
          0.0
        }
      }
    })
  }

  /// Clip negative eigenvalues produced by floating-point noise.
  fn repair_psd(self) -> Self {
    let scale = self.matrix.diagonal().amax().max(f64::MIN_POSITIVE);
    let eig = SymmetricEigen::new(self.matrix.clone());
    let min = eig.eigenvalues.min();
    if min >= -1e-12 * scale {
      return self;
    }

    warn!(min_eigenvalue = min, "covariance is not positive semi-definite, clipping eigenvalues");
    let clipped = eig.eigenvalues.map(|v| v.max(0.0));
    let matrix = &eig.eigenvectors * DMatrix::from_diagonal(&clipped) * eig.eigenvectors.transpose();
    Self {
      assets: self.assets,
      matrix: (&matrix + matrix.transpose()) * 0.5,
    }
  }
}

/// Annualized expected return per asset.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedReturnVector {
  assets: AssetUniverse,
  values: DVector<f64>,
}

impl ExpectedReturnVector {
  pub fn new(assets: AssetUniverse, values: DVector<f64>) -> Result<Self> {
    if values.len() != assets.len() {
      return Err(PortfolioError::Data(format!(
        "{} expected returns for {} assets",
        values.len(),
        assets.len()
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::Data(
        "expected returns contain non-finite entries".to_string(),
      ));
    }

    Ok(Self { assets, values })
  }

  pub fn assets(&self) -> &AssetUniverse {
    &self.assets
  }

  pub fn values(&self) -> &DVector<f64> {
    &self.values
  }

  pub fn get(&self, asset: &str) -> Option<f64> {
    self.assets.index_of(asset).map(|i| self.values[i])
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Estimates annualized risk and return statistics from prices.
#[derive(Clone, Debug, Default)]
pub struct RiskModel {
  config: RiskModelConfig,
}

impl RiskModel {
  pub fn new(config: RiskModelConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RiskModelConfig {
    &self.config
  }

  /// Annualized covariance of daily returns.
  pub fn covariance(&self, prices: &PricePanel) -> Result<CovarianceMatrix> {
    let returns = sufficient_returns(prices)?;
    let columns = returns.columns();
    check_variances(returns.assets(), &columns)?;

    let n = columns.len();
    let freq = self.config.frequency;
    let mut cov = DMatrix::zeros(n, n);
    for i in 0..n {
      for j in i..n {
        let c = match self.config.covariance {
          CovarianceEstimator::Sample => columns[i].iter().covariance(columns[j].iter()),
          CovarianceEstimator::Semicovariance { benchmark } => {
            semicovariance(&columns[i], &columns[j], benchmark)
          }
          CovarianceEstimator::ExponentiallyWeighted { span } => {
            ewm_covariance(&columns[i], &columns[j], span)
          }
        };
        cov[(i, j)] = c * freq;
        cov[(j, i)] = c * freq;
      }
    }

    debug!(assets = n, rows = returns.len(), "estimated covariance");
    Ok(CovarianceMatrix::new(returns.assets().clone(), cov)?.repair_psd())
  }

  /// Annualized expected returns.
  pub fn expected_returns(&self, prices: &PricePanel) -> Result<ExpectedReturnVector> {
    let returns = sufficient_returns(prices)?;
    let freq = self.config.frequency;
    let columns = returns.columns();

    let values = columns.iter().map(|col| match self.config.returns {
      ReturnsEstimator::MeanHistorical => col.iter().mean() * freq,
      ReturnsEstimator::Compounded => {
        let growth: f64 = col.iter().map(|r| 1.0 + r).product();
        growth.powf(freq / col.len() as f64) - 1.0
      }
      ReturnsEstimator::ExponentiallyWeighted { span } => ewm_mean(col, span) * freq,
    });

    ExpectedReturnVector::new(
      returns.assets().clone(),
      DVector::from_iterator(columns.len(), values),
    )
  }
}

fn sufficient_returns(prices: &PricePanel) -> Result<ReturnsSeries> {
  if prices.n_assets() == 0 {
    return Err(PortfolioError::Data("price panel has no assets".to_string()));
  }
  let returns = prices.returns();
  if returns.len() < 2 {
    return Err(PortfolioError::Data(format!(
      "need at least 2 return rows, got {}",
      returns.len()
    )));
  }
  Ok(returns)
}

/// A return series counts as constant when its variance is within rounding
/// noise of its squared mean.
fn check_variances(assets: &AssetUniverse, columns: &[Vec<f64>]) -> Result<()> {
  let mut constant = 0;
  for (asset, col) in assets.iter().zip(columns) {
    let mean = col.iter().mean();
    let variance = col.iter().variance();
    if variance <= ZERO_VARIANCE_TOL * mean * mean {
      warn!(asset, "asset has zero return variance");
      constant += 1;
    }
  }

  if constant == columns.len() {
    return Err(PortfolioError::Data(
      "every asset has a constant return series".to_string(),
    ));
  }
  Ok(())
}

fn ewm_weights(len: usize, span: usize) -> Vec<f64> {
  let alpha = 2.0 / (span.max(1) as f64 + 1.0);
  (0..len)
    .map(|t| (1.0 - alpha).powi((len - 1 - t) as i32))
    .collect()
}

fn ewm_mean(xs: &[f64], span: usize) -> f64 {
  let w = ewm_weights(xs.len(), span);
  let total: f64 = w.iter().sum();
  xs.iter().zip(&w).map(|(x, w)| x * w).sum::<f64>() / total
}

fn ewm_covariance(x: &[f64], y: &[f64], span: usize) -> f64 {
  let mx = x.iter().mean();
  let my = y.iter().mean();
  let products: Vec<f64> = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).collect();
  ewm_mean(&products, span)
}

fn semicovariance(x: &[f64], y: &[f64], benchmark: f64) -> f64 {
  let n = x.len().min(y.len());
  x.iter()
    .zip(y)
    .map(|(a, b)| (a - benchmark).min(0.0) * (b - benchmark).min(0.0))
    .sum::<f64>()
    / n as f64
}
