//! Per-account fixed positions
//!
//! Pure bookkeeping: the ledger never computes fees, it only stores what the
//! operations hand it. Empty positions are removed so that iterating an
//! account's maturities only yields live positions.

use std::collections::BTreeMap;

use fixed_model::Position;
use serde::Serialize;

use crate::types::{AccountId, Amount, Maturity, Side};

type Book = BTreeMap<AccountId, BTreeMap<Maturity, Position>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PositionLedger {
    deposits: Book,
    borrows: Book,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, side: Side) -> &Book {
        match side {
            Side::Deposit => &self.deposits,
            Side::Borrow => &self.borrows,
        }
    }

    fn book_mut(&mut self, side: Side) -> &mut Book {
        match side {
            Side::Deposit => &mut self.deposits,
            Side::Borrow => &mut self.borrows,
        }
    }

    /// Position of `account` at `maturity`, zero if none
    pub fn get(&self, side: Side, account: &AccountId, maturity: Maturity) -> Position {
        self.book(side)
            .get(account)
            .and_then(|positions| positions.get(&maturity))
            .copied()
            .unwrap_or_default()
    }

    /// Store a position, dropping it when empty
    pub fn set(&mut self, side: Side, account: &AccountId, maturity: Maturity, position: Position) {
        let book = self.book_mut(side);
        if position.is_empty() {
            if let Some(positions) = book.get_mut(account) {
                positions.remove(&maturity);
                if positions.is_empty() {
                    book.remove(account);
                }
            }
            return;
        }
        book.entry(account.clone()).or_default().insert(maturity, position);
    }

    /// Maturities where `account` holds a position, ascending
    pub fn maturities(&self, side: Side, account: &AccountId) -> Vec<Maturity> {
        self.book(side)
            .get(account)
            .map(|positions| positions.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn positions(&self, side: Side, account: &AccountId) -> impl Iterator<Item = (Maturity, Position)> + '_ {
        self.book(side)
            .get(account)
            .into_iter()
            .flat_map(|positions| positions.iter().map(|(m, p)| (*m, *p)))
    }

    pub fn accounts(&self, side: Side) -> impl Iterator<Item = &AccountId> {
        self.book(side).keys()
    }

    pub fn has_positions(&self, side: Side, account: &AccountId) -> bool {
        self.book(side).contains_key(account)
    }

    /// Sum of principal held by all accounts at `maturity`
    pub fn total_principal(&self, side: Side, maturity: Maturity) -> Amount {
        self.book(side)
            .values()
            .filter_map(|positions| positions.get(&maturity))
            .map(|position| position.principal)
            .sum()
    }
}
