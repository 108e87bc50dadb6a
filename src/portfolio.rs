//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Risk models, mean-variance optimizers, efficient frontier tracing,
//! backtesting and performance metrics.

pub mod backtest;
pub mod data;
pub mod engine;
pub mod frontier;
pub mod metrics;
pub mod optimizers;
pub mod qp;
pub mod risk_model;
pub mod types;

pub use backtest::BacktestEngine;
pub use backtest::BacktestMode;
pub use backtest::BacktestResult;
pub use data::CsvPriceSource;
pub use data::PricePanel;
pub use data::ReturnsSeries;
pub use engine::BacktestReport;
pub use engine::OptimizationReport;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use frontier::EfficientFrontier;
pub use frontier::FrontierIter;
pub use metrics::PerformanceAnalyzer;
pub use metrics::PerformanceMetrics;
pub use metrics::PerformanceReport;
pub use metrics::max_drawdown;
pub use optimizers::OptimizerConfig;
pub use optimizers::PortfolioOptimizer;
pub use optimizers::clean_weights;
pub use risk_model::CovarianceEstimator;
pub use risk_model::CovarianceMatrix;
pub use risk_model::ExpectedReturnVector;
pub use risk_model::ReturnsEstimator;
pub use risk_model::RiskModel;
pub use risk_model::RiskModelConfig;
pub use types::AssetUniverse;
pub use types::FrontierPoint;
pub use types::OptimizedPortfolio;
pub use types::PortfolioPerformance;
pub use types::WeightBounds;
pub use types::Weights;
