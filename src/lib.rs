//! # Portfolio
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\mathcal W} \frac{\mathbf w^\top\mu-r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! $$
//!
//! Mean-variance portfolio construction from historical price panels: risk model
//! estimation, constrained optimization, efficient frontier tracing, buy-and-hold
//! backtesting and performance analytics.
//!
//! ```no_run
//! use portfolio_rs::portfolio::PortfolioEngine;
//! use portfolio_rs::portfolio::PortfolioEngineConfig;
//! use portfolio_rs::portfolio::data::CsvPriceSource;
//! use portfolio_rs::traits::MarketDataSource;
//!
//! let prices = CsvPriceSource::new("data/prices.csv").price_panel().unwrap();
//! let engine = PortfolioEngine::new(PortfolioEngineConfig::default());
//! let report = engine.optimize(&prices).unwrap();
//! println!("{:?}", report.max_sharpe.weights);
//! ```

pub mod error;
pub mod portfolio;
pub mod traits;

pub use error::PortfolioError;
pub use error::Result;

/// Trading days per year used to annualize daily statistics.
pub const TRADING_DAYS: f64 = 252.0;
