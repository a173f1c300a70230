//! Scripted scenario replay
//!
//! A scenario is a JSON document naming prices, starting balances and a list
//! of steps. Each step is one engine operation; a step may declare the error
//! it expects, in which case success is a failure of the script.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tenor::config::{to_wad, validate_adjust_factor};
use tenor::{
    interval_start, AccountId, AssetId, CurveRateModel, FlatRateModel, Fraction, InMemoryCustody,
    Market, MarketConfig, MarketError, Maturity, RateError, RateModel, StaticOracle,
    TermRateModel, Timestamp, UtilizationState, INTERVAL,
};

use crate::report::{fmt_date, fmt_wad, print_market};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub description: Option<String>,
    pub start: Timestamp,
    #[serde(default)]
    pub rates: RatesChoice,
    pub assets: Vec<AssetEntry>,
    #[serde(default)]
    pub balances: Vec<BalanceEntry>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum RatesChoice {
    /// Curves from the market configuration
    #[default]
    Config,
    Term {
        fixed_term: f64,
        #[serde(default)]
        floating_yearly: f64,
    },
    Flat {
        fixed_yearly: f64,
        floating_yearly: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetEntry {
    pub asset: String,
    pub price: f64,
    pub collateral_factor: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalanceEntry {
    pub account: String,
    pub asset: String,
    pub amount: f64,
}

/// Absolute maturity timestamp, or intervals ahead of the current one
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum MaturityRef {
    Ahead { ahead: u64 },
    At(Maturity),
}

impl MaturityRef {
    fn resolve(self, now: Timestamp) -> Maturity {
        match self {
            MaturityRef::Ahead { ahead } => interval_start(now) + ahead * INTERVAL,
            MaturityRef::At(maturity) => maturity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub op: Op,
    /// Name of the `MarketError` variant this step must fail with
    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Advance { seconds: u64 },
    SetTime { at: Timestamp },
    SetPrice { asset: String, price: f64 },
    DepositAtMaturity {
        account: String,
        maturity: MaturityRef,
        amount: f64,
        #[serde(default)]
        min: f64,
    },
    BorrowAtMaturity {
        account: String,
        maturity: MaturityRef,
        amount: f64,
        #[serde(default)]
        max: Option<f64>,
    },
    RepayAtMaturity {
        account: String,
        maturity: MaturityRef,
        amount: f64,
        #[serde(default)]
        max: Option<f64>,
    },
    WithdrawAtMaturity {
        account: String,
        maturity: MaturityRef,
        amount: f64,
        #[serde(default)]
        min: f64,
    },
    Deposit { account: String, amount: f64 },
    Withdraw { account: String, amount: f64 },
    Borrow { account: String, amount: f64 },
    Repay { account: String, amount: f64 },
    DepositCollateral { account: String, asset: String, amount: f64 },
    WithdrawCollateral { account: String, asset: String, amount: f64 },
    Liquidate {
        liquidator: String,
        borrower: String,
        seize: String,
        #[serde(default)]
        max: Option<f64>,
    },
    ClearBadDebt { account: String },
    SetTreasury {
        #[serde(default)]
        treasury: Option<String>,
        fee_rate: f64,
    },
    SetBackupFeeRate { rate: f64 },
    SetReserveFactor { factor: f64 },
}

/// Rate model chosen by the scenario
pub enum ScenarioRates {
    Curve(CurveRateModel),
    Term(TermRateModel),
    Flat(FlatRateModel),
}

impl ScenarioRates {
    fn model(&self) -> &dyn RateModel {
        match self {
            ScenarioRates::Curve(model) => model,
            ScenarioRates::Term(model) => model,
            ScenarioRates::Flat(model) => model,
        }
    }
}

impl RateModel for ScenarioRates {
    fn fixed_rate(
        &self,
        maturity: Maturity,
        time_to_maturity: u64,
        state: &UtilizationState,
    ) -> Result<Fraction, RateError> {
        self.model().fixed_rate(maturity, time_to_maturity, state)
    }

    fn floating_rate(&self, utilization: Fraction) -> Result<Fraction, RateError> {
        self.model().floating_rate(utilization)
    }
}

pub type ScenarioMarket = Market<ScenarioRates, StaticOracle, InMemoryCustody>;

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
    serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse scenario: {}", path.display()))
}

pub fn build_market(config: &MarketConfig, scenario: &Scenario) -> Result<ScenarioMarket> {
    let rates = match scenario.rates {
        RatesChoice::Config => ScenarioRates::Curve(config.rate_model()?),
        RatesChoice::Term { fixed_term, floating_yearly } => ScenarioRates::Term(TermRateModel {
            fixed_term: to_wad("fixed_term", fixed_term)?,
            floating_yearly: to_wad("floating_yearly", floating_yearly)?,
        }),
        RatesChoice::Flat { fixed_yearly, floating_yearly } => ScenarioRates::Flat(FlatRateModel {
            fixed_yearly: to_wad("fixed_yearly", fixed_yearly)?,
            floating_yearly: to_wad("floating_yearly", floating_yearly)?,
        }),
    };

    let mut oracle = StaticOracle::new();
    for entry in &scenario.assets {
        let factor = to_wad("collateral_factor", entry.collateral_factor)?;
        validate_adjust_factor(factor)
            .with_context(|| format!("Invalid collateral factor for {}", entry.asset))?;
        oracle = oracle.with_asset(entry.asset.as_str(), to_wad("price", entry.price)?, factor);
    }

    let mut custody = InMemoryCustody::new();
    for balance in &scenario.balances {
        custody.mint(
            &AccountId::new(balance.account.clone()),
            &AssetId::new(balance.asset.clone()),
            to_wad("amount", balance.amount)?,
        );
    }

    Ok(Market::new(config.params()?, rates, oracle, custody, scenario.start)?)
}

fn amount(value: f64) -> tenor::Result<u128> {
    to_wad("amount", value)
}

fn limit(value: Option<f64>) -> tenor::Result<u128> {
    value.map(amount).unwrap_or(Ok(u128::MAX))
}

/// Apply one step; returns a one-line summary and the receipt as JSON
fn apply(market: &mut ScenarioMarket, op: &Op) -> tenor::Result<(String, String)> {
    let now = market.now();
    Ok(match op {
        Op::Advance { seconds } => {
            market.advance_time(*seconds);
            (format!("advanced to {}", fmt_date(market.now())), String::new())
        }
        Op::SetTime { at } => {
            market.set_time(*at)?;
            (format!("clock at {}", fmt_date(*at)), String::new())
        }
        Op::SetPrice { asset, price } => {
            market
                .oracle_mut()
                .set_price(&AssetId::new(asset.clone()), to_wad("price", *price)?);
            (format!("{} priced at {}", asset, price), String::new())
        }
        Op::DepositAtMaturity { account, maturity, amount: value, min } => {
            let account = AccountId::new(account.clone());
            let maturity = maturity.resolve(now);
            let receipt =
                market.deposit_at_maturity(maturity, amount(*value)?, amount(*min)?, &account, &account)?;
            (
                format!(
                    "{} deposited {} at {} (fee {}, backup fee {})",
                    account,
                    fmt_wad(receipt.assets),
                    fmt_date(maturity),
                    fmt_wad(receipt.fee),
                    fmt_wad(receipt.backup_fee)
                ),
                json(&receipt),
            )
        }
        Op::BorrowAtMaturity { account, maturity, amount: value, max } => {
            let account = AccountId::new(account.clone());
            let maturity = maturity.resolve(now);
            let receipt =
                market.borrow_at_maturity(maturity, amount(*value)?, limit(*max)?, &account, &account)?;
            (
                format!(
                    "{} borrowed {} at {} (fee {}: unassigned {}, accumulator {})",
                    account,
                    fmt_wad(receipt.assets),
                    fmt_date(maturity),
                    fmt_wad(receipt.fee),
                    fmt_wad(receipt.to_unassigned),
                    fmt_wad(receipt.to_accumulator)
                ),
                json(&receipt),
            )
        }
        Op::RepayAtMaturity { account, maturity, amount: value, max } => {
            let account = AccountId::new(account.clone());
            let maturity = maturity.resolve(now);
            let receipt =
                market.repay_at_maturity(maturity, amount(*value)?, limit(*max)?, &account, &account)?;
            (
                format!(
                    "{} repaid {} at {} (discount {}, penalty {})",
                    account,
                    fmt_wad(receipt.actual_repay),
                    fmt_date(maturity),
                    fmt_wad(receipt.discount),
                    fmt_wad(receipt.penalty)
                ),
                json(&receipt),
            )
        }
        Op::WithdrawAtMaturity { account, maturity, amount: value, min } => {
            let account = AccountId::new(account.clone());
            let maturity = maturity.resolve(now);
            let receipt =
                market.withdraw_at_maturity(maturity, amount(*value)?, amount(*min)?, &account, &account)?;
            (
                format!(
                    "{} withdrew {} at {} (discount {})",
                    account,
                    fmt_wad(receipt.assets_discounted),
                    fmt_date(maturity),
                    fmt_wad(receipt.discount)
                ),
                json(&receipt),
            )
        }
        Op::Deposit { account, amount: value } => {
            let account = AccountId::new(account.clone());
            let receipt = market.deposit(amount(*value)?, &account, &account)?;
            (
                format!("{} deposited {} floating", account, fmt_wad(receipt.assets)),
                json(&receipt),
            )
        }
        Op::Withdraw { account, amount: value } => {
            let account = AccountId::new(account.clone());
            let receipt = market.withdraw(amount(*value)?, &account, &account)?;
            (
                format!("{} withdrew {} floating", account, fmt_wad(receipt.assets)),
                json(&receipt),
            )
        }
        Op::Borrow { account, amount: value } => {
            let account = AccountId::new(account.clone());
            let receipt = market.borrow(amount(*value)?, &account, &account)?;
            (
                format!("{} borrowed {} floating", account, fmt_wad(receipt.assets)),
                json(&receipt),
            )
        }
        Op::Repay { account, amount: value } => {
            let account = AccountId::new(account.clone());
            let receipt = market.repay(amount(*value)?, &account, &account)?;
            (
                format!(
                    "{} repaid {} floating ({} left)",
                    account,
                    fmt_wad(receipt.assets),
                    fmt_wad(receipt.remaining_debt)
                ),
                json(&receipt),
            )
        }
        Op::DepositCollateral { account, asset, amount: value } => {
            let account = AccountId::new(account.clone());
            market.deposit_collateral(&AssetId::new(asset.clone()), amount(*value)?, &account)?;
            (format!("{} posted {} {}", account, value, asset), String::new())
        }
        Op::WithdrawCollateral { account, asset, amount: value } => {
            let account = AccountId::new(account.clone());
            market.withdraw_collateral(&AssetId::new(asset.clone()), amount(*value)?, &account, &account)?;
            (format!("{} took back {} {}", account, value, asset), String::new())
        }
        Op::Liquidate { liquidator, borrower, seize, max } => {
            let report = market.liquidate(
                &AccountId::new(liquidator.clone()),
                &AccountId::new(borrower.clone()),
                limit(*max)?,
                &AssetId::new(seize.clone()),
            )?;
            let bad_debt = report.bad_debt.as_ref().map(|clearing| clearing.spread).unwrap_or(0);
            (
                format!(
                    "{} liquidated {}: repaid {}, seized {} {}, bad debt {}",
                    liquidator,
                    borrower,
                    fmt_wad(report.repaid),
                    fmt_wad(report.seized),
                    seize,
                    fmt_wad(bad_debt)
                ),
                json(&report),
            )
        }
        Op::ClearBadDebt { account } => {
            let clearing = market.clear_bad_debt(&AccountId::new(account.clone()))?;
            (
                format!("cleared {} of bad debt for {}", fmt_wad(clearing.spread), account),
                json(&clearing),
            )
        }
        Op::SetTreasury { treasury, fee_rate } => {
            market.set_treasury(
                treasury.clone().map(AccountId::from),
                to_wad("treasury_fee_rate", *fee_rate)?,
            )?;
            (format!("treasury fee rate set to {}", fee_rate), String::new())
        }
        Op::SetBackupFeeRate { rate } => {
            market.set_backup_fee_rate(to_wad("backup_fee_rate", *rate)?)?;
            (format!("backup fee rate set to {}", rate), String::new())
        }
        Op::SetReserveFactor { factor } => {
            market.set_reserve_factor(to_wad("reserve_factor", *factor)?)?;
            (format!("reserve factor set to {}", factor), String::new())
        }
    })
}

fn json<T: Serialize>(receipt: &T) -> String {
    serde_json::to_string(receipt).unwrap_or_default()
}

/// Variant name of an engine error, e.g. `Disagreement`
fn error_name(err: &MarketError) -> String {
    let debug = format!("{:?}", err);
    debug
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Run every step; fails on the first step whose outcome differs from the
/// script
pub fn replay(market: &mut ScenarioMarket, scenario: &Scenario, verbose: bool) -> Result<usize> {
    let mut expected_failures = 0;
    for (index, step) in scenario.steps.iter().enumerate() {
        let result = apply(market, &step.op);
        match (&step.expect_error, result) {
            (None, Ok((summary, receipt))) => {
                println!("  {} {:>3} {}", "✓".green(), index, summary);
                if verbose && !receipt.is_empty() {
                    println!("        {}", receipt.dimmed());
                }
            }
            (Some(expected), Err(err)) if error_name(&err) == *expected => {
                expected_failures += 1;
                println!("  {} {:>3} {} ({})", "✓".green(), index, "failed as expected".yellow(), err);
            }
            (Some(expected), Err(err)) => {
                bail!("step {} ({:?}) failed with {} instead of {}", index, step.op, err, expected);
            }
            (Some(expected), Ok(_)) => {
                bail!("step {} ({:?}) succeeded but {} was expected", index, step.op, expected);
            }
            (None, Err(err)) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("step {} ({:?}) failed", index, step.op)));
            }
        }
    }
    Ok(expected_failures)
}

pub fn run_scenario(config: &MarketConfig, path: &Path, dump: bool, verbose: bool) -> Result<()> {
    let scenario = load_scenario(path)?;
    println!("{}", "=== Scenario Replay ===".bright_green().bold());
    println!("{} {}", "File:".bright_cyan(), path.display());
    if let Some(description) = &scenario.description {
        println!("{} {}", "Description:".bright_cyan(), description);
    }
    println!("{} {}", "Steps:".bright_cyan(), scenario.steps.len());
    println!();

    let mut market = build_market(config, &scenario)?;
    let expected_failures = replay(&mut market, &scenario, verbose)?;

    print_market(market.state(), market.now());
    println!(
        "\n  {} {} steps replayed ({} expected failures)",
        "✓".green(),
        scenario.steps.len(),
        expected_failures
    );

    if dump {
        let state = serde_json::to_string_pretty(market.state()).context("Failed to encode state")?;
        println!("{}", state);
    }
    Ok(())
}
