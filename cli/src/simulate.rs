//! Price-path simulation
//!
//! Borrowers lever up against a collateral asset whose price follows a
//! mean-reverting process. After every price move a liquidator scans the
//! borrowers and liquidates anyone with a shortfall, seizing the largest
//! collateral holding.

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use tenor::config::{to_wad, validate_adjust_factor};
use tenor::{
    interval_start, AccountId, Amount, AssetId, CurveRateModel, InMemoryCustody, Market,
    MarketConfig, Oracle, StaticOracle, Timestamp, INTERVAL, WAD,
};

use crate::report::{fmt_wad, print_market};

/// Collateral asset whose price follows the path
pub const COLLATERAL: &str = "WETH";

/// Collateral factors of the market asset and of `COLLATERAL`
const MARKET_FACTOR: Amount = 9 * WAD / 10;
const COLLATERAL_FACTOR: Amount = 8 * WAD / 10;

/// Simulation clock at start, a Monday in 2024
const START: Timestamp = 1_704_067_200;
const DAY: u64 = 86_400;

/// Ornstein-Uhlenbeck price path, discretised with Euler-Maruyama
#[derive(Debug, Clone, Copy)]
pub struct PriceProcess {
    pub initial_price: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub theta: f64,
    /// Length of the path in process time
    pub horizon: f64,
    pub steps: usize,
}

impl PriceProcess {
    /// `steps + 1` prices starting at `initial_price`, floored just above zero
    pub fn path(&self, rng: &mut impl Rng) -> Vec<f64> {
        let dt = self.horizon / self.steps.max(1) as f64;
        let mut prices = Vec::with_capacity(self.steps + 1);
        let mut price = self.initial_price;
        prices.push(price);
        for _ in 0..self.steps {
            price += self.theta * (self.mean - price) * dt + self.std_dev * dt.sqrt() * standard_normal(rng);
            price = price.max(1e-9);
            prices.push(price);
        }
        prices
    }
}

/// Box-Muller
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[derive(Debug, Default, Clone)]
pub struct Summary {
    pub liquidations: usize,
    pub failed_liquidations: usize,
    pub rejected_borrows: usize,
    pub repaid: Amount,
    pub seized: Amount,
    pub bad_debt: Amount,
    pub min_price: f64,
    pub max_price: f64,
}

pub type SimMarket = Market<CurveRateModel, StaticOracle, InMemoryCustody>;

pub struct Simulation {
    pub market: SimMarket,
    pub borrowers: Vec<AccountId>,
    pub liquidator: AccountId,
    pub summary: Summary,
    collateral: AssetId,
}

impl Simulation {
    /// Fund the backup pool, then have each borrower post collateral and
    /// borrow a random fraction of its limit, split between the nearest
    /// maturity and the floating side.
    pub fn setup(
        config: &MarketConfig,
        initial_price: f64,
        borrowers: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let params = config.params()?;
        let asset = params.asset.clone();
        let collateral = AssetId::new(COLLATERAL);
        validate_adjust_factor(MARKET_FACTOR)?;
        validate_adjust_factor(COLLATERAL_FACTOR)?;
        let oracle = StaticOracle::new()
            .with_asset(asset.clone(), WAD, MARKET_FACTOR)
            .with_asset(collateral.clone(), to_wad("initial_price", initial_price)?, COLLATERAL_FACTOR);

        let lp = AccountId::new("lp");
        let liquidator = AccountId::new("liquidator");
        let borrowers: Vec<AccountId> = (0..borrowers)
            .map(|index| AccountId::new(format!("borrower-{index}")))
            .collect();

        let mut custody = InMemoryCustody::new();
        custody.mint(&lp, &asset, 10_000_000 * WAD);
        custody.mint(&liquidator, &asset, 10_000_000 * WAD);
        for borrower in &borrowers {
            custody.mint(borrower, &collateral, 10_000 * WAD);
        }

        let mut market = Market::new(params, config.rate_model()?, oracle, custody, START)?;
        market.deposit(1_000_000 * WAD, &lp, &lp)?;
        market.advance_time(DAY);

        let mut summary = Summary {
            min_price: initial_price,
            max_price: initial_price,
            ..Summary::default()
        };
        let maturity = interval_start(market.now()) + INTERVAL;
        for borrower in &borrowers {
            market.deposit_collateral(&collateral, 10_000 * WAD, borrower)?;
            // adjusted debt limit is value * 0.8 * 0.9
            let limit = 10_000.0 * initial_price * 0.72;
            let leverage = rng.gen_range(0.5..0.95);
            let fixed = to_wad("borrow", limit * leverage / 2.0)?;
            let floating = to_wad("borrow", limit * leverage / 2.0)?;

            if let Err(err) = market.borrow_at_maturity(maturity, fixed, Amount::MAX, borrower, borrower) {
                warn!("{borrower} fixed borrow rejected: {err}");
                summary.rejected_borrows += 1;
            }
            if let Err(err) = market.borrow(floating, borrower, borrower) {
                warn!("{borrower} floating borrow rejected: {err}");
                summary.rejected_borrows += 1;
            }
        }

        Ok(Self {
            market,
            borrowers,
            liquidator,
            summary,
            collateral,
        })
    }

    /// Move the price, advance the clock and liquidate every shortfall
    pub fn step(&mut self, price: f64, seconds: u64) -> Result<()> {
        self.summary.min_price = self.summary.min_price.min(price);
        self.summary.max_price = self.summary.max_price.max(price);
        self.market
            .oracle_mut()
            .set_price(&self.collateral, to_wad("price", price)?);
        self.market.advance_time(seconds);
        self.check_liquidations()
    }

    fn check_liquidations(&mut self) -> Result<()> {
        for borrower in &self.borrowers {
            let liquidity = self.market.account_liquidity(borrower)?;
            if !liquidity.has_shortfall() {
                continue;
            }
            let health = liquidity
                .health_factor()?
                .map(|health| health as f64 / WAD as f64)
                .unwrap_or(f64::INFINITY);
            info!("account: {borrower}, health factor: {health:.4}");

            let seize = self.largest_collateral(borrower)?;
            match self.market.liquidate(&self.liquidator, borrower, Amount::MAX, &seize) {
                Ok(report) => {
                    self.summary.liquidations += 1;
                    self.summary.repaid += report.repaid;
                    self.summary.seized += report.seized;
                    if let Some(clearing) = report.bad_debt {
                        self.summary.bad_debt += clearing.spread;
                    }
                }
                Err(err) => {
                    warn!("liquidation of {borrower} failed: {err}");
                    self.summary.failed_liquidations += 1;
                }
            }
        }
        Ok(())
    }

    /// Seize asset holding the most value: the collateral asset or the
    /// borrower's floating deposit
    fn largest_collateral(&self, borrower: &AccountId) -> Result<AssetId> {
        let state = self.market.state();
        let oracle = self.market.oracle();
        let balance = state.collateral.balance_of(borrower, &self.collateral);
        let collateral_value = wad_value(balance, oracle.price_of(&self.collateral)?);
        let deposit_value = wad_value(
            self.market.floating_assets_of(borrower)?,
            oracle.price_of(&state.params.asset)?,
        );
        Ok(if deposit_value > collateral_value {
            state.params.asset.clone()
        } else {
            self.collateral.clone()
        })
    }
}

fn wad_value(amount: Amount, price: Amount) -> f64 {
    amount as f64 / WAD as f64 * (price as f64 / WAD as f64)
}

pub fn run_simulation(
    config: &MarketConfig,
    process: PriceProcess,
    step_seconds: u64,
    seed: u64,
    borrowers: usize,
    verbose: bool,
) -> Result<()> {
    println!("{}", "=== Price Simulation ===".bright_green().bold());
    println!("{} {}", "Steps:".bright_cyan(), process.steps);
    println!("{} {}s", "Step length:".bright_cyan(), step_seconds);
    println!("{} {}", "Borrowers:".bright_cyan(), borrowers);
    println!(
        "{} start {}, mean {}, sigma {}, theta {}",
        "Price process:".bright_cyan(),
        process.initial_price,
        process.mean,
        process.std_dev,
        process.theta
    );

    let mut rng = XorShiftRng::seed_from_u64(seed);
    let prices = process.path(&mut rng);
    let mut simulation = Simulation::setup(config, process.initial_price, borrowers, &mut rng)?;

    let bar = ProgressBar::new(process.steps as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );
    for price in prices.iter().skip(1) {
        simulation.step(*price, step_seconds)?;
        bar.set_message(format!("price {:.4}", price));
        bar.inc(1);
    }
    bar.finish_and_clear();

    let summary = &simulation.summary;
    println!("\n{}", "Summary:".bright_yellow());
    println!("  {} {:.4} .. {:.4}", "Price range:".bright_cyan(), summary.min_price, summary.max_price);
    println!(
        "  {} {} ({} failed)",
        "Liquidations:".bright_cyan(),
        summary.liquidations,
        summary.failed_liquidations
    );
    println!("  {} {}", "Rejected borrows:".bright_cyan(), summary.rejected_borrows);
    println!("  {} {}", "Repaid:".bright_cyan(), fmt_wad(summary.repaid));
    println!("  {} {} {}", "Seized:".bright_cyan(), fmt_wad(summary.seized), COLLATERAL);
    println!("  {} {}", "Bad debt absorbed:".bright_cyan(), fmt_wad(summary.bad_debt));

    if verbose {
        for borrower in &simulation.borrowers {
            let liquidity = simulation.market.account_liquidity(borrower)?;
            println!(
                "  {} collateral {} debt {}",
                borrower,
                fmt_wad(liquidity.adjusted_collateral),
                fmt_wad(liquidity.adjusted_debt)
            );
        }
    }

    print_market(simulation.market.state(), simulation.market.now());
    Ok(())
}
