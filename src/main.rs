use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use portfolio_rs::portfolio::CsvPriceSource;
use portfolio_rs::portfolio::OptimizedPortfolio;
use portfolio_rs::portfolio::OptimizerConfig;
use portfolio_rs::portfolio::PerformanceMetrics;
use portfolio_rs::portfolio::PortfolioEngine;
use portfolio_rs::portfolio::PortfolioEngineConfig;
use portfolio_rs::portfolio::WeightBounds;
use portfolio_rs::portfolio::Weights;
use portfolio_rs::traits::MarketDataSource;
use prettytable::row;
use prettytable::Table;
use tracing::info;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Optimize, trace and backtest a portfolio from a CSV of daily closes.
#[derive(Parser)]
#[command(name = "portfolio-rs")]
#[command(version)]
#[command(about = "Mean-variance portfolio construction and backtesting")]
struct Cli {
  /// CSV with a `date` column followed by one price column per asset
  #[arg(short, long)]
  prices: PathBuf,

  /// Annual risk-free rate
  #[arg(short, long, default_value = "0.0")]
  risk_free: f64,

  /// Lower weight bound per asset; negative values allow shorting
  #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
  lower_bound: f64,

  /// Upper weight bound per asset
  #[arg(long, default_value = "1.0")]
  upper_bound: f64,

  /// Estimate on dates up to and including this day, backtest on the rest
  #[arg(long)]
  train_until: Option<NaiveDate>,

  /// Benchmark weights, e.g. `SPY=0.6,BND=0.4`
  #[arg(short, long, value_parser = parse_weights)]
  benchmark: Option<Weights>,

  /// Number of efficient frontier points to print
  #[arg(short, long, default_value = "10")]
  frontier_points: usize,

  /// Verbosity level
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn parse_weights(s: &str) -> Result<Weights, String> {
  s.split(',')
    .map(|pair| {
      let (asset, weight) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected ASSET=WEIGHT, got '{pair}'"))?;
      let weight = weight
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad weight for '{asset}': {e}"))?;
      Ok((asset.trim().to_string(), weight))
    })
    .collect()
}

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  let level = match cli.verbose {
    0 => Level::WARN,
    1 => Level::INFO,
    2 => Level::DEBUG,
    _ => Level::TRACE,
  };
  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .finish();
  tracing::subscriber::set_global_default(subscriber)?;

  let panel = CsvPriceSource::new(&cli.prices)
    .price_panel()
    .with_context(|| format!("loading {}", cli.prices.display()))?;
  let (train, test) = match cli.train_until {
    Some(date) => panel.split_at_date(date)?,
    None => (panel.clone(), panel),
  };
  info!(train = train.n_dates(), test = test.n_dates(), "split price panel");

  let engine = PortfolioEngine::new(PortfolioEngineConfig {
    optimizer: OptimizerConfig {
      risk_free_rate: cli.risk_free,
      bounds: WeightBounds::uniform(cli.lower_bound, cli.upper_bound),
      ..Default::default()
    },
    frontier_points: cli.frontier_points,
    ..Default::default()
  });

  let report = engine.optimize(&train)?;
  print_portfolio("Maximum Sharpe", &report.max_sharpe);
  print_portfolio("Minimum volatility", &report.min_volatility);

  let frontier = engine.frontier(&train)?;
  let mut table = Table::new();
  table.set_titles(row!["Target", "Return", "Volatility"]);
  for point in &frontier {
    table.add_row(row![
      format!("{:.4}", point.target_return),
      format!("{:.4}", point.expected_return),
      format!("{:.4}", point.volatility)
    ]);
  }
  println!("\nEfficient frontier");
  table.printstd();

  let backtest = engine.backtest(&test, &report.max_sharpe.weights, cli.benchmark.as_ref())?;
  let mut table = Table::new();
  table.set_titles(row!["Series", "Total", "Annualized", "Sharpe", "Max drawdown"]);
  add_metrics_row(&mut table, "Strategy", &backtest.metrics.strategy);
  if let Some(bench) = &backtest.metrics.benchmark {
    add_metrics_row(&mut table, "Benchmark", bench);
  }
  println!("\nBacktest {} .. {}", test.dates()[0], test.dates()[test.n_dates() - 1]);
  table.printstd();

  Ok(())
}

fn print_portfolio(title: &str, portfolio: &OptimizedPortfolio) {
  let mut table = Table::new();
  table.set_titles(row!["Asset", "Weight"]);
  for (asset, w) in portfolio.weights.iter() {
    table.add_row(row![asset, format!("{w:.4}")]);
  }
  let (ret, vol, sharpe) = portfolio.performance.as_tuple();
  println!("\n{title}: return {ret:.4}, volatility {vol:.4}, Sharpe {sharpe:.4}");
  if portfolio.degenerate {
    println!("(covariance singular on the feasible set, minimum-norm weights shown)");
  }
  table.printstd();
}

fn add_metrics_row(table: &mut Table, name: &str, m: &PerformanceMetrics) {
  table.add_row(row![
    name,
    format!("{:.4}", m.total_return),
    format!("{:.4}", m.annualized_return),
    format!("{:.4}", m.sharpe_ratio),
    format!("{:.4}", m.max_drawdown)
  ]);
}
