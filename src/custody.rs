//! Token custody
//!
//! The engine never moves funds itself. After a transition is committed it
//! hands the resulting transfers to a `Custody` implementation.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{AccountId, Amount, AssetId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("{account} holds {available} {asset}, needs {required}")]
    InsufficientFunds {
        account: AccountId,
        asset: AssetId,
        available: Amount,
        required: Amount,
    },

    #[error("vault holds {available} {asset}, needs {required}")]
    InsufficientReserves {
        asset: AssetId,
        available: Amount,
        required: Amount,
    },

    #[error("balance overflow")]
    Overflow,
}

/// Moves assets between accounts and the market vault
pub trait Custody {
    /// Move `amount` of `asset` from `from` into the vault
    fn pull(&mut self, asset: &AssetId, from: &AccountId, amount: Amount) -> Result<(), CustodyError>;

    /// Move `amount` of `asset` from the vault to `to`
    fn push(&mut self, asset: &AssetId, to: &AccountId, amount: Amount) -> Result<(), CustodyError>;
}

/// A single vault movement produced by a committed transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    In {
        asset: AssetId,
        from: AccountId,
        amount: Amount,
    },
    Out {
        asset: AssetId,
        to: AccountId,
        amount: Amount,
    },
}

impl Transfer {
    pub fn execute<C: Custody + ?Sized>(&self, custody: &mut C) -> Result<(), CustodyError> {
        match self {
            Transfer::In { amount: 0, .. } | Transfer::Out { amount: 0, .. } => Ok(()),
            Transfer::In { asset, from, amount } => custody.pull(asset, from, *amount),
            Transfer::Out { asset, to, amount } => custody.push(asset, to, *amount),
        }
    }

    /// The movement that undoes this one
    pub fn reversed(&self) -> Transfer {
        match self {
            Transfer::In { asset, from, amount } => Transfer::Out {
                asset: asset.clone(),
                to: from.clone(),
                amount: *amount,
            },
            Transfer::Out { asset, to, amount } => Transfer::In {
                asset: asset.clone(),
                from: to.clone(),
                amount: *amount,
            },
        }
    }
}

/// Ledger-backed custody for tests and simulation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryCustody {
    wallets: BTreeMap<AccountId, BTreeMap<AssetId, Amount>>,
    vault: BTreeMap<AssetId, Amount>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to a wallet out of thin air
    pub fn mint(&mut self, account: &AccountId, asset: &AssetId, amount: Amount) {
        let balance = self
            .wallets
            .entry(account.clone())
            .or_default()
            .entry(asset.clone())
            .or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, account: &AccountId, asset: &AssetId) -> Amount {
        self.wallets
            .get(account)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn vault_balance(&self, asset: &AssetId) -> Amount {
        self.vault.get(asset).copied().unwrap_or(0)
    }
}

impl Custody for InMemoryCustody {
    fn pull(&mut self, asset: &AssetId, from: &AccountId, amount: Amount) -> Result<(), CustodyError> {
        let available = self.balance_of(from, asset);
        if available < amount {
            return Err(CustodyError::InsufficientFunds {
                account: from.clone(),
                asset: asset.clone(),
                available,
                required: amount,
            });
        }
        let vault = self.vault_balance(asset).checked_add(amount).ok_or(CustodyError::Overflow)?;
        self.wallets
            .entry(from.clone())
            .or_default()
            .insert(asset.clone(), available - amount);
        self.vault.insert(asset.clone(), vault);
        Ok(())
    }

    fn push(&mut self, asset: &AssetId, to: &AccountId, amount: Amount) -> Result<(), CustodyError> {
        let available = self.vault_balance(asset);
        if available < amount {
            return Err(CustodyError::InsufficientReserves {
                asset: asset.clone(),
                available,
                required: amount,
            });
        }
        let wallet = self.balance_of(to, asset).checked_add(amount).ok_or(CustodyError::Overflow)?;
        self.vault.insert(asset.clone(), available - amount);
        self.wallets
            .entry(to.clone())
            .or_default()
            .insert(asset.clone(), wallet);
        Ok(())
    }
}
