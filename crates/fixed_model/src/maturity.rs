//! Maturity alignment and pool-state classification

/// Spacing between maturities: 4 weeks in seconds
pub const INTERVAL: u64 = 4 * 7 * 86_400;

/// Rate curves are yearly
pub const YEAR: u64 = 365 * 86_400;

/// Lifecycle state of a maturity relative to the current time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolState {
    /// Not aligned to `INTERVAL`
    Invalid,
    /// Maturity has passed
    Matured,
    /// Open for deposits and borrows
    Valid,
    /// Further out than the configured number of future pools
    NotReady,
}

/// Classify `maturity` at time `now` with `max_future_pools` open pools.
///
/// A maturity equal to `now` counts as matured: no fixed position can be
/// opened with a zero term.
pub fn pool_state(maturity: u64, now: u64, max_future_pools: u8) -> PoolState {
    if maturity % INTERVAL != 0 {
        return PoolState::Invalid;
    }
    if maturity <= now {
        return PoolState::Matured;
    }
    let horizon = interval_start(now).saturating_add(INTERVAL * max_future_pools as u64);
    if maturity > horizon {
        return PoolState::NotReady;
    }
    PoolState::Valid
}

/// Start of the interval containing `now`
#[inline]
pub fn interval_start(now: u64) -> u64 {
    now - now % INTERVAL
}

/// Number of intervals between the current interval start and `maturity`
/// (1 for the nearest open maturity). Zero for matured pools.
pub fn intervals_ahead(maturity: u64, now: u64) -> u64 {
    maturity.saturating_sub(interval_start(now)) / INTERVAL
}

/// Open maturities at `now`, nearest first
pub fn open_maturities(now: u64, max_future_pools: u8) -> impl Iterator<Item = u64> {
    let start = interval_start(now);
    (1..=max_future_pools as u64).map(move |k| start + k * INTERVAL)
}
