//! Price feed and collateral factors

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{Amount, AssetId, Fraction};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("no price for {0}")]
    MissingPrice(AssetId),

    #[error("price for {0} is zero")]
    ZeroPrice(AssetId),

    #[error("no collateral factor for {0}")]
    MissingFactor(AssetId),
}

/// Prices are WAD-scaled values of one unit of the asset in a common
/// numeraire. Collateral (adjust) factors are WAD fractions in `(0, 1]`.
pub trait Oracle {
    fn price_of(&self, asset: &AssetId) -> Result<Amount, OracleError>;

    fn collateral_factor(&self, asset: &AssetId) -> Result<Fraction, OracleError>;
}

/// Fixed prices set by hand; used by tests and the simulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticOracle {
    prices: BTreeMap<AssetId, Amount>,
    factors: BTreeMap<AssetId, Fraction>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register `asset` with a price and collateral factor
    pub fn with_asset(mut self, asset: impl Into<AssetId>, price: Amount, factor: Fraction) -> Self {
        let asset = asset.into();
        self.prices.insert(asset.clone(), price);
        self.factors.insert(asset, factor);
        self
    }

    pub fn set_price(&mut self, asset: &AssetId, price: Amount) {
        self.prices.insert(asset.clone(), price);
    }

    pub fn set_collateral_factor(&mut self, asset: &AssetId, factor: Fraction) {
        self.factors.insert(asset.clone(), factor);
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.prices.keys()
    }
}

impl Oracle for StaticOracle {
    fn price_of(&self, asset: &AssetId) -> Result<Amount, OracleError> {
        match self.prices.get(asset) {
            None => Err(OracleError::MissingPrice(asset.clone())),
            Some(0) => Err(OracleError::ZeroPrice(asset.clone())),
            Some(price) => Ok(*price),
        }
    }

    fn collateral_factor(&self, asset: &AssetId) -> Result<Fraction, OracleError> {
        self.factors
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::MissingFactor(asset.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixed_model::WAD;

    #[test]
    fn test_static_oracle_lookup() {
        let mut oracle = StaticOracle::new().with_asset("ETH", 2_000 * WAD, WAD * 8 / 10);
        let eth = AssetId::from("ETH");
        assert_eq!(oracle.price_of(&eth), Ok(2_000 * WAD));
        assert_eq!(oracle.collateral_factor(&eth), Ok(WAD * 8 / 10));

        oracle.set_price(&eth, 0);
        assert_eq!(oracle.price_of(&eth), Err(OracleError::ZeroPrice(eth.clone())));

        let btc = AssetId::from("BTC");
        assert_eq!(oracle.price_of(&btc), Err(OracleError::MissingPrice(btc.clone())));
        assert_eq!(oracle.collateral_factor(&btc), Err(OracleError::MissingFactor(btc)));
    }
}
