//! # Portfolio Data Utilities
//!
//! $$
//! r_{t,i} = \frac{P_{t,i}}{P_{t-1,i}} - 1
//! $$
//!
//! Price panels, simple return series and a CSV price source.

use std::path::Path;
use std::path::PathBuf;

use chrono::Datelike;
use chrono::Days;
use chrono::NaiveDate;
use chrono::Weekday;
use csv::ReaderBuilder;
use csv::Trim;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use tracing::info;

use super::types::AssetUniverse;
use crate::traits::MarketDataSource;
use crate::PortfolioError;
use crate::Result;

/// Dates × assets table of prices.
///
/// Prices are expected to be strictly positive with no gaps; only the shape
/// and the date ordering are checked here.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePanel {
  dates: Vec<NaiveDate>,
  assets: AssetUniverse,
  prices: Array2<f64>,
}

impl PricePanel {
  pub fn new(dates: Vec<NaiveDate>, assets: AssetUniverse, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() != dates.len() || prices.ncols() != assets.len() {
      return Err(PortfolioError::Data(format!(
        "price table is {}x{} but index has {} dates and {} assets",
        prices.nrows(),
        prices.ncols(),
        dates.len(),
        assets.len()
      )));
    }

    if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
      return Err(PortfolioError::Data(format!(
        "date index is not strictly increasing at {}",
        w[1]
      )));
    }

    Ok(Self {
      dates,
      assets,
      prices,
    })
  }

  /// Build a panel from named price columns of equal length.
  pub fn from_columns<S: Into<String>>(
    dates: Vec<NaiveDate>,
    columns: Vec<(S, Vec<f64>)>,
  ) -> Result<Self> {
    let (names, series): (Vec<String>, Vec<Vec<f64>>) =
      columns.into_iter().map(|(n, s)| (n.into(), s)).unzip();
    let assets = AssetUniverse::new(names)?;

    let n_dates = dates.len();
    if let Some(bad) = series.iter().position(|s| s.len() != n_dates) {
      return Err(PortfolioError::Data(format!(
        "column '{}' has {} prices for {} dates",
        assets.as_slice()[bad],
        series[bad].len(),
        n_dates
      )));
    }

    let prices = Array2::from_shape_fn((n_dates, series.len()), |(t, j)| series[j][t]);
    Self::new(dates, assets, prices)
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &AssetUniverse {
    &self.assets
  }

  pub fn prices(&self) -> ArrayView2<'_, f64> {
    self.prices.view()
  }

  pub fn n_dates(&self) -> usize {
    self.dates.len()
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Price column of `asset`.
  pub fn column(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .assets
      .index_of(asset)
      .map(|j| self.prices.column(j))
  }

  /// Simple daily returns; the first date has no prior price and is dropped.
  pub fn returns(&self) -> ReturnsSeries {
    let n = self.dates.len();
    let values = if n < 2 {
      Array2::zeros((0, self.assets.len()))
    } else {
      let prev = self.prices.slice(ndarray::s![..n - 1, ..]);
      let next = self.prices.slice(ndarray::s![1.., ..]);
      &next / &prev - 1.0
    };

    ReturnsSeries {
      dates: self.dates.iter().skip(1).copied().collect(),
      assets: self.assets.clone(),
      values,
    }
  }

  /// Split into `(dates <= date, dates > date)`, e.g. a training window and a
  /// backtest window.
  pub fn split_at_date(&self, date: NaiveDate) -> Result<(Self, Self)> {
    let cut = self.dates.partition_point(|d| *d <= date);
    let head = Self {
      dates: self.dates[..cut].to_vec(),
      assets: self.assets.clone(),
      prices: self.prices.slice_axis(Axis(0), (..cut).into()).to_owned(),
    };
    let tail = Self {
      dates: self.dates[cut..].to_vec(),
      assets: self.assets.clone(),
      prices: self.prices.slice_axis(Axis(0), (cut..).into()).to_owned(),
    };

    Ok((head, tail))
  }
}

/// Dates × assets table of simple returns derived from a [`PricePanel`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsSeries {
  dates: Vec<NaiveDate>,
  assets: AssetUniverse,
  values: Array2<f64>,
}

impl ReturnsSeries {
  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn assets(&self) -> &AssetUniverse {
    &self.assets
  }

  pub fn values(&self) -> ArrayView2<'_, f64> {
    self.values.view()
  }

  /// Number of return rows.
  pub fn len(&self) -> usize {
    self.values.nrows()
  }

  pub fn is_empty(&self) -> bool {
    self.values.nrows() == 0
  }

  /// Per-asset return columns as owned vectors.
  pub fn columns(&self) -> Vec<Vec<f64>> {
    self
      .values
      .columns()
      .into_iter()
      .map(|c| c.to_vec())
      .collect()
  }
}

/// `n` consecutive weekdays starting at `start` (rolled forward off weekends).
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
  let mut out = Vec::with_capacity(n);
  let mut day = start;
  while out.len() < n {
    if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
      out.push(day);
    }
    day = match day.checked_add_days(Days::new(1)) {
      Some(next) => next,
      None => break,
    };
  }
  out
}

/// Reads a `date,asset1,asset2,...` CSV of closing prices.
///
/// Dates use `%Y-%m-%d`. Fields may be quoted and are trimmed. Empty,
/// unparsable or non-positive cells are rejected rather than filled, and a row
/// with the wrong number of fields is a [`PortfolioError::Csv`].
#[derive(Clone, Debug)]
pub struct CsvPriceSource {
  path: PathBuf,
}

impl CsvPriceSource {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }
}

impl MarketDataSource for CsvPriceSource {
  fn price_panel(&self) -> Result<PricePanel> {
    let mut reader = ReaderBuilder::new()
      .has_headers(true)
      .trim(Trim::All)
      .from_path(&self.path)?;

    let assets: Vec<String> = reader
      .headers()?
      .iter()
      .skip(1)
      .map(str::to_string)
      .collect();
    if assets.is_empty() {
      return Err(PortfolioError::Data(
        "header must contain a date column and at least one asset".to_string(),
      ));
    }

    let mut dates = Vec::new();
    let mut flat = Vec::with_capacity(assets.len());
    for record in reader.records() {
      let record = record?;
      let line = record.position().map_or(0, |p| p.line());

      let date_cell = record.get(0).unwrap_or_default();
      let date = NaiveDate::parse_from_str(date_cell, "%Y-%m-%d").map_err(|e| {
        PortfolioError::Data(format!("line {line}: bad date '{date_cell}': {e}"))
      })?;

      for cell in record.iter().skip(1) {
        match cell.parse::<f64>() {
          Ok(p) if p > 0.0 && p.is_finite() => flat.push(p),
          _ => {
            return Err(PortfolioError::Data(format!(
              "line {line}: invalid price '{cell}'"
            )))
          }
        }
      }
      dates.push(date);
    }

    let n_assets = assets.len();
    let prices = Array2::from_shape_vec((dates.len(), n_assets), flat)
      .map_err(|e| PortfolioError::Data(e.to_string()))?;
    let panel = PricePanel::new(dates, AssetUniverse::new(assets)?, prices)?;
    info!(
      path = %self.path.display(),
      dates = panel.n_dates(),
      assets = panel.n_assets(),
      "loaded price panel"
    );

    Ok(panel)
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use approx::assert_abs_diff_eq;

  use super::*;

  fn dates(n: usize) -> Vec<NaiveDate> {
    business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), n)
  }

  #[test]
  fn returns_are_simple_pct_changes() {
    let panel = PricePanel::from_columns(
      dates(3),
      vec![("AAA", vec![100.0, 110.0, 99.0]), ("BBB", vec![50.0, 50.0, 55.0])],
    )
    .unwrap();
    let returns = panel.returns();

    assert_eq!(returns.len(), 2);
    assert_eq!(returns.dates(), &panel.dates()[1..]);
    assert_abs_diff_eq!(returns.values()[[0, 0]], 0.10, epsilon = 1e-12);
    assert_abs_diff_eq!(returns.values()[[1, 0]], -0.10, epsilon = 1e-12);
    assert_abs_diff_eq!(returns.values()[[0, 1]], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(returns.values()[[1, 1]], 0.10, epsilon = 1e-12);
  }

  #[test]
  fn single_row_panel_has_no_returns() {
    let panel = PricePanel::from_columns(dates(1), vec![("AAA", vec![100.0])]).unwrap();
    assert!(panel.returns().is_empty());
  }

  #[test]
  fn panel_rejects_unordered_dates_and_ragged_columns() {
    let mut d = dates(2);
    d.reverse();
    assert!(PricePanel::from_columns(d, vec![("AAA", vec![1.0, 2.0])]).is_err());
    assert!(PricePanel::from_columns(dates(2), vec![("AAA", vec![1.0])]).is_err());
  }

  #[test]
  fn business_days_skip_weekends() {
    // 2024-01-05 is a Friday.
    let d = business_days(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 2);
    assert_eq!(d[1], NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
  }

  #[test]
  fn split_at_date_partitions_rows() {
    let d = dates(4);
    let panel =
      PricePanel::from_columns(d.clone(), vec![("AAA", vec![1.0, 2.0, 3.0, 4.0])]).unwrap();
    let (head, tail) = panel.split_at_date(d[1]).unwrap();

    assert_eq!(head.n_dates(), 2);
    assert_eq!(tail.n_dates(), 2);
    assert_eq!(tail.prices()[[0, 0]], 3.0);
  }

  #[test]
  fn csv_source_reads_panel() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "Date,TSLA,BND")?;
    writeln!(file, "2024-01-02,248.4,72.1")?;
    writeln!(file, "2024-01-03,238.4,72.3")?;

    let panel = CsvPriceSource::new(file.path()).price_panel()?;
    assert_eq!(panel.n_dates(), 2);
    assert_eq!(panel.assets().as_slice(), &["TSLA".to_string(), "BND".to_string()]);
    assert_eq!(panel.column("BND").unwrap()[1], 72.3);
    Ok(())
  }

  #[test]
  fn csv_source_handles_quotes_bom_and_padding() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "\u{feff}Date,\"Tesla, Inc.\", BND ")?;
    writeln!(file, "2024-01-02,\"248.4\",72.1 ")?;
    writeln!(file)?;
    writeln!(file, "2024-01-03,238.4, 72.3")?;

    let panel = CsvPriceSource::new(file.path()).price_panel()?;
    assert_eq!(
      panel.assets().as_slice(),
      &["Tesla, Inc.".to_string(), "BND".to_string()]
    );
    assert_eq!(panel.n_dates(), 2);
    assert_eq!(panel.column("Tesla, Inc.").unwrap()[0], 248.4);
    assert_eq!(panel.column("BND").unwrap()[1], 72.3);
    Ok(())
  }

  #[test]
  fn csv_source_rejects_ragged_rows() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "Date,TSLA,BND")?;
    writeln!(file, "2024-01-02,248.4,72.1")?;
    writeln!(file, "2024-01-03,238.4")?;

    let err = CsvPriceSource::new(file.path()).price_panel().unwrap_err();
    assert!(matches!(err, PortfolioError::Csv(_)));
    Ok(())
  }

  #[test]
  fn csv_source_rejects_missing_prices() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "Date,TSLA,BND")?;
    writeln!(file, "2024-01-02,248.4,")?;

    let err = CsvPriceSource::new(file.path()).price_panel().unwrap_err();
    assert!(matches!(err, PortfolioError::Data(_)));
    Ok(())
  }
}
