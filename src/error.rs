//! # Errors
//!
//! $$
//! \text{failure} \in \{\text{data},\ \Sigma \not\succ 0,\ \emptyset,\ k>k_{\max},\ \sigma_p=0\}
//! $$
//!
//! Typed failures surfaced by the risk model, optimizer, frontier and analytics.

use thiserror::Error;

/// Errors produced by portfolio construction and evaluation.
#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Malformed or insufficient input data.
  #[error("data error: {0}")]
  Data(String),

  /// The covariance matrix is not positive definite on the feasible subspace.
  #[error("singular covariance: smallest reduced eigenvalue {min_eigenvalue:e}")]
  SingularCovariance { min_eigenvalue: f64 },

  /// No weight vector satisfies the constraints (or improves on the risk-free rate).
  #[error("optimization infeasible: {0}")]
  OptimizationInfeasible(String),

  /// The solver hit its iteration cap before reaching optimality.
  #[error("solver did not converge within {iterations} iterations")]
  Convergence { iterations: usize },

  /// Sharpe ratio requested for a zero-volatility portfolio.
  #[error("division by zero: {0}")]
  DivisionByZero(String),

  /// Frontier volatility decreased while the target return increased.
  #[error(
    "efficient frontier is not monotone at point {index}: volatility {current} < {previous}"
  )]
  FrontierNotMonotone {
    index: usize,
    previous: f64,
    current: f64,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),
}

/// Result alias for portfolio operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
