//! Human-readable market summaries

use anyhow::Result;
use colored::Colorize;
use tenor::{open_maturities, pool_state, MarketParams, MarketState, PoolState, Timestamp, WAD};

/// WAD amount with four decimals
pub fn fmt_wad(amount: u128) -> String {
    let whole = amount / WAD;
    let frac = (amount % WAD) / (WAD / 10_000);
    format!("{}.{:04}", whole, frac)
}

/// WAD fraction as a percentage
pub fn fmt_fraction(fraction: u128) -> String {
    format!("{:.4}%", fraction as f64 / WAD as f64 * 100.0)
}

pub fn fmt_date(timestamp: Timestamp) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn fmt_state(state: PoolState) -> colored::ColoredString {
    match state {
        PoolState::Valid => "valid".green(),
        PoolState::Matured => "matured".yellow(),
        PoolState::NotReady => "not ready".dimmed(),
        PoolState::Invalid => "invalid".red(),
    }
}

pub fn print_open_pools(params: &MarketParams, at: Option<Timestamp>) -> Result<()> {
    let now = match at {
        Some(at) => at,
        None => u64::try_from(chrono::Utc::now().timestamp())?,
    };
    println!("{}", "=== Open Maturities ===".bright_green().bold());
    println!("{} {} ({})", "As of:".bright_cyan(), fmt_date(now), now);

    for (index, maturity) in open_maturities(now, params.max_future_pools).enumerate() {
        let days = (maturity - now) as f64 / 86_400.0;
        println!(
            "  {} {} {:>12}  {:>6.1} days  {}",
            (if index + 1 == params.max_future_pools as usize { "└─" } else { "├─" }).dimmed(),
            fmt_date(maturity),
            maturity,
            days,
            fmt_state(pool_state(maturity, now, params.max_future_pools))
        );
    }
    Ok(())
}

pub fn print_market(state: &MarketState, now: Timestamp) {
    let backup = &state.backup;
    println!("\n{}", "Backup pool:".bright_yellow());
    println!("  {} {}", "Assets:".bright_cyan(), fmt_wad(backup.assets));
    println!("  {} {}", "Floating debt:".bright_cyan(), fmt_wad(backup.debt));
    println!("  {} {}", "Lent to maturities:".bright_cyan(), fmt_wad(backup.backup_borrowed));
    println!("  {} {}", "Assets average:".bright_cyan(), fmt_wad(backup.assets_average));
    println!("  {} {}", "Shares:".bright_cyan(), fmt_wad(backup.total_shares));
    if let Ok(utilization) = backup.global_utilization() {
        println!("  {} {}", "Utilization:".bright_cyan(), fmt_fraction(utilization));
    }
    println!(
        "  {} {}",
        "Accumulator:".bright_cyan(),
        fmt_wad(state.accumulator.amount)
    );

    if state.pools.is_empty() {
        println!("\n{}", "No maturity pools".dimmed());
        return;
    }
    println!("\n{}", "Maturity pools:".bright_yellow());
    println!(
        "  {:<12} {:>16} {:>16} {:>14}  {}",
        "maturity".dimmed(),
        "borrowed".dimmed(),
        "supplied".dimmed(),
        "unassigned".dimmed(),
        "state".dimmed()
    );
    for (maturity, pool) in &state.pools {
        println!(
            "  {:<12} {:>16} {:>16} {:>14}  {}",
            fmt_date(*maturity),
            fmt_wad(pool.borrowed),
            fmt_wad(pool.supplied),
            fmt_wad(pool.unassigned_earnings),
            fmt_state(pool_state(*maturity, now, state.params.max_future_pools))
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_wad() {
        assert_eq!(fmt_wad(0), "0.0000");
        assert_eq!(fmt_wad(WAD * 3 / 2), "1.5000");
        assert_eq!(fmt_wad(1_234 * WAD + WAD / 10_000), "1234.0001");
    }

    #[test]
    fn test_fmt_fraction() {
        assert_eq!(fmt_fraction(WAD / 20), "5.0000%");
    }

    #[test]
    fn test_fmt_date() {
        assert_eq!(fmt_date(0), "1970-01-01");
        assert_eq!(fmt_date(2_419_200), "1970-01-29");
    }
}
