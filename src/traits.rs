//! # Traits
//!
//! $$
//! \mathcal S : \varnothing \to P \in \mathbb R_{>0}^{T\times N}
//! $$
//!
use crate::portfolio::data::PricePanel;
use crate::Result;

/// Supplier of validated price panels.
///
/// Implementors own acquisition and cleaning: the returned panel must have a
/// strictly increasing date index, strictly positive prices and no gaps.
pub trait MarketDataSource {
  /// Produce the price panel.
  fn price_panel(&self) -> Result<PricePanel>;
}

impl MarketDataSource for PricePanel {
  fn price_panel(&self) -> Result<PricePanel> {
    Ok(self.clone())
  }
}
