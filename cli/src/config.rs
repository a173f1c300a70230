//! Market configuration loading

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use tenor::{MarketConfig, MarketParams};

use crate::report::{fmt_fraction, fmt_wad};

/// Load `path`, or the defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<MarketConfig> {
    match path {
        Some(path) => MarketConfig::load(path)
            .with_context(|| format!("Failed to load market config: {}", path.display())),
        None => Ok(MarketConfig::default()),
    }
}

pub fn check_config(path: &Path) -> Result<()> {
    println!("{}", "=== Check Market Config ===".bright_green().bold());
    println!("{} {}", "File:".bright_cyan(), path.display());

    let config = load_config(Some(path))?;
    let params = config.params()?;
    config.rate_model()?;

    print_params(&params);
    println!("\n  {} Configuration is valid", "✓".green());
    Ok(())
}

pub fn show_default() -> Result<()> {
    let rendered = toml::to_string_pretty(&MarketConfig::default())
        .context("Failed to render default config")?;
    print!("{}", rendered);
    Ok(())
}

pub fn print_params(params: &MarketParams) {
    println!("\n{}", "Parameters:".bright_yellow());
    println!("  {} {}", "Asset:".bright_cyan(), params.asset);
    println!("  {} {}", "Future pools:".bright_cyan(), params.max_future_pools);
    println!("  {} {}", "Smooth factor:".bright_cyan(), fmt_wad(params.smooth_factor));
    println!(
        "  {} {}",
        "Penalty per day:".bright_cyan(),
        fmt_fraction(params.penalty_rate * 86_400)
    );
    println!("  {} {}", "Backup fee:".bright_cyan(), fmt_fraction(params.backup_fee_rate));
    println!("  {} {}", "Reserve factor:".bright_cyan(), fmt_fraction(params.reserve_factor));
    println!(
        "  {} {} ({})",
        "Treasury fee:".bright_cyan(),
        fmt_fraction(params.treasury_fee_rate),
        params
            .treasury
            .as_ref()
            .map(|treasury| treasury.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "  {} {} (min {})",
        "Fixed borrow threshold:".bright_cyan(),
        fmt_fraction(params.fixed_borrow_threshold),
        fmt_fraction(params.min_threshold_factor)
    );
    println!(
        "  {} liquidator {}, lenders {}",
        "Liquidation incentive:".bright_cyan(),
        fmt_fraction(params.incentive.liquidator),
        fmt_fraction(params.incentive.lenders)
    );
}
