//! Unit tests for the lending engine
//! Run with: cargo test

use fixed_model::{div_wad_down, mul_wad_down};
use tenor::*;

const DAY: u64 = 86_400;
const START: u64 = 100 * INTERVAL;
const M1: u64 = START + INTERVAL;
const M2: u64 = START + 2 * INTERVAL;
const M3: u64 = START + 3 * INTERVAL;

type TestMarket = Market<TermRateModel, StaticOracle, InMemoryCustody>;

fn units(n: u128) -> Amount {
    n * WAD
}

fn acct(name: &str) -> AccountId {
    AccountId::from(name)
}

fn usdc() -> AssetId {
    AssetId::from("USDC")
}

fn eth() -> AssetId {
    AssetId::from("ETH")
}

fn default_params() -> MarketParams {
    let mut params = MarketConfig::default().params().unwrap();
    params.max_future_pools = 3;
    params
}

/// Market at `START` with a 5% term rate and well funded wallets
fn setup(floating_yearly: Fraction) -> TestMarket {
    let oracle = StaticOracle::new()
        .with_asset("USDC", WAD, 9 * WAD / 10)
        .with_asset("ETH", units(2_000), 8 * WAD / 10);
    let mut custody = InMemoryCustody::new();
    for name in ["alice", "bob", "carol", "dave", "liquidator", "lp"] {
        custody.mint(&acct(name), &usdc(), units(1_000_000));
        custody.mint(&acct(name), &eth(), units(1_000));
    }
    let rates = TermRateModel {
        fixed_term: 5 * PERCENT,
        floating_yearly,
    };
    Market::new(default_params(), rates, oracle, custody, START).unwrap()
}

/// `setup` plus 100k of backup liquidity whose average has caught up
fn funded() -> TestMarket {
    let mut market = setup(0);
    market.deposit(units(100_000), &acct("lp"), &acct("lp")).unwrap();
    market.advance_time(DAY);
    market
}

fn post_eth(market: &mut TestMarket, name: &str, amount: Amount) {
    market.deposit_collateral(&eth(), amount, &acct(name)).unwrap();
}

fn snapshot(market: &TestMarket) -> (MarketState, InMemoryCustody) {
    (market.state().clone(), market.custody().clone())
}

// ========================================
// Fee routing
// ========================================

#[test]
fn test_boundary_split_between_accumulator_and_unassigned() {
    let mut market = funded();
    market.set_time(M1 - 6 * DAY).unwrap();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    market.advance_time(2 * DAY);
    post_eth(&mut market, "bob", units(100));

    let first = market
        .borrow_at_maturity(M1, units(5_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(first.fee, units(250));
    assert_eq!(first.to_accumulator, units(250));
    assert_eq!(market.state().pool(M1).borrowed, units(5_000));
    assert_eq!(market.state().accumulator.amount, units(250));
    assert_eq!(market.state().pool(M1).unassigned_earnings, 0);

    let second = market
        .borrow_at_maturity(M1, units(5_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(second.backup_addition, 0);
    assert_eq!(market.state().accumulator.amount, units(500));
    assert_eq!(market.state().pool(M1).unassigned_earnings, 0);

    let third = market
        .borrow_at_maturity(M1, units(5_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(third.backup_addition, units(5_000));
    assert_eq!(third.to_accumulator, 0);
    assert_eq!(market.state().accumulator.amount, units(500));
    assert_eq!(market.state().pool(M1).unassigned_earnings, units(250));
    assert_eq!(market.state().backup.backup_borrowed, units(5_000));
    assert!(market.state().check_backup_borrowed());
}

#[test]
fn test_fees_are_conserved() {
    let mut market = funded();
    market.set_treasury(Some(acct("treasury")), WAD / 10).unwrap();
    market
        .deposit_at_maturity(M1, units(5_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));

    let accumulator_before = market.state().accumulator.amount;
    let borrow = market
        .borrow_at_maturity(M1, units(8_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(borrow.fee, units(400));
    assert_eq!(borrow.treasury_fee, units(40));
    assert_eq!(
        borrow.fee,
        borrow.to_unassigned + borrow.to_accumulator + borrow.treasury_fee
    );
    assert_eq!(borrow.to_accumulator, units(225));
    assert_eq!(borrow.to_unassigned, units(135));
    assert_eq!(
        market.state().accumulator.amount - accumulator_before,
        borrow.to_accumulator
    );
    assert_eq!(market.state().pool(M1).unassigned_earnings, borrow.to_unassigned);
    assert_eq!(
        market.state().backup.assets_of(&acct("treasury")).unwrap(),
        units(40)
    );

    // A later deposit takes its share out of unassigned earnings, no more
    market.advance_time(5 * DAY);
    let unassigned_before = market.state().pool(M1).unassigned_earnings;
    let accumulator_before = market.state().accumulator.amount;
    let deposit = market
        .deposit_at_maturity(M1, units(3_000), 0, &acct("carol"), &acct("carol"))
        .unwrap();
    assert!(deposit.fee > 0);
    assert_eq!(
        market.state().pool(M1).unassigned_earnings,
        unassigned_before
            - deposit.accrual.earnings
            - deposit.accrual.stale
            - deposit.fee
            - deposit.backup_fee
    );
    assert_eq!(
        market.state().accumulator.amount - accumulator_before,
        deposit.backup_fee
    );
    assert_eq!(
        market
            .state()
            .positions
            .get(Side::Deposit, &acct("carol"), M1)
            .total()
            .unwrap(),
        units(3_000) + deposit.fee
    );
    assert!(market.state().check_backup_borrowed());
}

#[test]
fn test_penalty_goes_to_accumulator() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(1_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(10));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    market.set_time(M1 + 10 * DAY).unwrap();
    let unassigned_before = market.state().pool(M1).unassigned_earnings;
    let accumulator_before = market.state().accumulator.amount;
    let repay = market
        .repay_at_maturity(M1, units(1_050), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    let rate = market.params().penalty_rate * (10 * DAY) as u128;
    let expected = mul_wad_down(units(1_050), rate).unwrap();
    assert_eq!(repay.penalty, expected);
    assert_eq!(repay.discount, 0);
    assert_eq!(repay.actual_repay, units(1_050) + expected);
    assert_eq!(
        market.state().accumulator.amount - accumulator_before,
        repay.penalty
    );
    assert_eq!(market.state().pool(M1).unassigned_earnings, unassigned_before);
    assert!(!market
        .state()
        .positions
        .has_positions(Side::Borrow, &acct("bob")));
}

#[test]
fn test_stale_earnings_swept_to_accumulator() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(10));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(market.state().pool(M1).unassigned_earnings, units(50));

    market.set_time(M1 + INTERVAL).unwrap();
    let accumulator_before = market.state().accumulator.amount;
    let repay = market
        .repay_at_maturity(M1, units(1_050), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(
        repay.accrual,
        Accrual {
            earnings: 0,
            stale: units(50)
        }
    );
    assert_eq!(market.state().pool(M1).unassigned_earnings, 0);
    assert_eq!(
        market.state().accumulator.amount - accumulator_before,
        units(50) + repay.penalty
    );
}

// ========================================
// Fixed-rate round trips and discounts
// ========================================

#[test]
fn test_deposit_withdraw_round_trip() {
    let mut market = funded();
    let balance = market.custody().balance_of(&acct("alice"), &usdc());

    let deposit = market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    assert_eq!(deposit.position_assets, units(10_000));

    let withdraw = market
        .withdraw_at_maturity(M1, units(10_000), units(10_000), &acct("alice"), &acct("alice"))
        .unwrap();
    assert_eq!(withdraw.assets_discounted, units(10_000));
    assert_eq!(withdraw.discount, 0);
    assert_eq!(market.custody().balance_of(&acct("alice"), &usdc()), balance);
    assert_eq!(market.state().pool(M1).supplied, 0);
}

#[test]
fn test_early_repay_discount() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(10_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(market.state().pool(M1).unassigned_earnings, units(500));

    // Halfway to maturity half of the fee has accrued to the backup pool
    market.advance_time(1_166_400);
    assert_eq!(
        market
            .preview_repay_at_maturity(M1, units(10_500), &acct("bob"))
            .unwrap(),
        units(10_500) - units(225) / 2
    );

    let accumulator_before = market.state().accumulator.amount;
    let repay = market
        .repay_at_maturity(M1, units(10_500), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(repay.accrual.earnings, units(250));
    assert_eq!(repay.principal_covered, units(10_000));
    assert_eq!(repay.backup_fee, units(25) / 2);
    assert_eq!(repay.discount, units(225) / 2);
    assert_eq!(repay.actual_repay, units(10_500) - units(225) / 2);
    assert_eq!(
        market.state().accumulator.amount - accumulator_before,
        repay.backup_fee
    );
    assert_eq!(market.state().backup.backup_borrowed, 0);
}

#[test]
fn test_early_withdraw_charges_backup_rate() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(8_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    let withdraw = market
        .withdraw_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    let expected = div_wad_down(units(10_000), WAD + 4 * PERCENT).unwrap();
    assert_eq!(withdraw.backup_addition, units(8_000));
    assert_eq!(withdraw.assets_discounted, expected);
    assert_eq!(withdraw.discount, units(10_000) - expected);
    assert_eq!(
        withdraw.discount,
        withdraw.to_unassigned + withdraw.to_accumulator + withdraw.treasury_fee
    );
    assert_eq!(market.state().backup.backup_borrowed, units(8_000));
    assert!(market.state().check_backup_borrowed());
}

#[test]
fn test_withdraw_at_maturity_pays_full_value() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(8_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    market.set_time(M1).unwrap();
    let withdraw = market
        .withdraw_at_maturity(M1, units(10_000), units(10_000), &acct("alice"), &acct("alice"))
        .unwrap();
    assert_eq!(withdraw.assets_discounted, units(10_000));
    assert_eq!(withdraw.backup_addition, units(8_000));
}

#[test]
fn test_unassigned_accrues_monotonically() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(10_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    let mut unassigned = market.state().pool(M1).unassigned_earnings;
    let mut assets = market.state().backup.assets;
    while market.now() < M1 + 2 * DAY {
        market.advance_time(3 * DAY);
        market.deposit(units(1), &acct("lp"), &acct("lp")).unwrap();
        let pool = market.state().pool(M1);
        assert!(pool.unassigned_earnings <= unassigned);
        assert!(market.state().backup.assets > assets);
        unassigned = pool.unassigned_earnings;
        assets = market.state().backup.assets;
    }
    assert_eq!(unassigned, 0);
}

// ========================================
// Slippage and validation
// ========================================

#[test]
fn test_slippage_leaves_state_unchanged() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    market.advance_time(DAY);

    let before = snapshot(&market);
    let result = market.repay_at_maturity(M1, units(1_050), units(900), &acct("bob"), &acct("bob"));
    assert!(matches!(
        result,
        Err(MarketError::Disagreement { limit, .. }) if limit == units(900)
    ));
    assert_eq!(snapshot(&market), before);

    let result = market.borrow_at_maturity(M1, units(1_000), units(1_000), &acct("bob"), &acct("bob"));
    assert_eq!(
        result,
        Err(MarketError::Disagreement {
            limit: units(1_000),
            actual: units(1_050)
        })
    );
    assert_eq!(snapshot(&market), before);

    let result =
        market.deposit_at_maturity(M1, units(100), units(200), &acct("alice"), &acct("alice"));
    assert!(matches!(result, Err(MarketError::Disagreement { .. })));
    assert_eq!(snapshot(&market), before);
}

#[test]
fn test_pool_state_checks() {
    let mut market = funded();

    let result = market.deposit_at_maturity(M1 + 1, units(1), 0, &acct("alice"), &acct("alice"));
    assert!(matches!(
        result,
        Err(MarketError::UnmatchedPoolState { observed: PoolState::Invalid, .. })
    ));

    let far = START + 4 * INTERVAL;
    let result = market.borrow_at_maturity(far, units(1), Amount::MAX, &acct("bob"), &acct("bob"));
    assert!(matches!(
        result,
        Err(MarketError::UnmatchedPoolState { observed: PoolState::NotReady, .. })
    ));

    let result = market.deposit_at_maturity(START, units(1), 0, &acct("alice"), &acct("alice"));
    assert!(matches!(
        result,
        Err(MarketError::UnmatchedPoolState { observed: PoolState::Matured, .. })
    ));
}

#[test]
fn test_zero_amounts_rejected() {
    let mut market = funded();
    assert_eq!(
        market.deposit_at_maturity(M1, 0, 0, &acct("alice"), &acct("alice")),
        Err(MarketError::ZeroDeposit)
    );
    assert_eq!(
        market.borrow_at_maturity(M1, 0, Amount::MAX, &acct("bob"), &acct("bob")),
        Err(MarketError::ZeroBorrow)
    );
    assert_eq!(
        market.repay_at_maturity(M1, units(1), Amount::MAX, &acct("bob"), &acct("bob")),
        Err(MarketError::ZeroRepay)
    );
    assert_eq!(
        market.withdraw_at_maturity(M1, units(1), 0, &acct("alice"), &acct("alice")),
        Err(MarketError::ZeroWithdraw)
    );
    assert_eq!(market.deposit(0, &acct("lp"), &acct("lp")), Err(MarketError::ZeroDeposit));
}

#[test]
fn test_borrow_needs_collateral() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(1));

    let before = snapshot(&market);
    let result = market.borrow_at_maturity(M1, units(2_000), Amount::MAX, &acct("bob"), &acct("bob"));
    assert_eq!(result, Err(MarketError::InsufficientAccountLiquidity));
    assert_eq!(snapshot(&market), before);

    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
}

#[test]
fn test_backup_capacity_shrinks_with_distance() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(100));

    // Third maturity may draw max(0.25, 0.6 * 1 / 3) of the 100k average
    let result = market.borrow_at_maturity(M3, units(30_000), Amount::MAX, &acct("bob"), &acct("bob"));
    assert_eq!(result, Err(MarketError::InsufficientProtocolLiquidity));

    market
        .borrow_at_maturity(M3, units(20_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(market.state().backup.backup_borrowed, units(20_000));
}

#[test]
fn test_capacity_follows_damped_average() {
    let mut market = setup(0);
    post_eth(&mut market, "bob", units(100));
    market.deposit(units(100_000), &acct("lp"), &acct("lp")).unwrap();

    // No time has passed: the average is still zero
    let result = market.borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"));
    assert_eq!(result, Err(MarketError::InsufficientProtocolLiquidity));

    market.advance_time(DAY);
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
}

// ========================================
// Floating side
// ========================================

#[test]
fn test_floating_deposit_and_withdraw() {
    let mut market = setup(0);
    let deposit = market.deposit(units(1_000), &acct("alice"), &acct("alice")).unwrap();
    assert_eq!(deposit.shares, units(1_000));
    assert_eq!(market.custody().vault_balance(&usdc()), units(1_000));

    let withdraw = market.withdraw(units(400), &acct("alice"), &acct("alice")).unwrap();
    assert_eq!(withdraw.shares, units(400));
    assert_eq!(market.state().backup.shares_of(&acct("alice")), units(600));
    assert_eq!(market.custody().vault_balance(&usdc()), units(600));

    let result = market.withdraw(units(601), &acct("alice"), &acct("alice"));
    assert!(result.is_err());
}

#[test]
fn test_floating_interest_accrues() {
    let mut market = setup(10 * PERCENT);
    market.deposit(units(100_000), &acct("lp"), &acct("lp")).unwrap();
    post_eth(&mut market, "bob", units(100));
    market.borrow(units(10_000), &acct("bob"), &acct("bob")).unwrap();

    market.advance_time(YEAR);
    assert_eq!(market.debt_of(&acct("bob")).unwrap(), units(11_000));
    assert_eq!(market.total_assets().unwrap(), units(101_000));

    let repay = market.repay(units(20_000), &acct("bob"), &acct("bob")).unwrap();
    assert_eq!(repay.assets, units(11_000));
    assert_eq!(repay.remaining_debt, 0);
    assert_eq!(market.state().backup.debt, 0);
}

#[test]
fn test_floating_borrow_respects_reserve() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(100));
    let result = market.borrow(units(95_000), &acct("bob"), &acct("bob"));
    assert_eq!(result, Err(MarketError::InsufficientProtocolLiquidity));
    market.borrow(units(85_000), &acct("bob"), &acct("bob")).unwrap();
}

#[test]
fn test_deposit_is_collateral() {
    let mut market = funded();
    market.deposit(units(1_000), &acct("carol"), &acct("carol")).unwrap();
    market.borrow(units(800), &acct("carol"), &acct("carol")).unwrap();

    let result = market.withdraw(units(500), &acct("carol"), &acct("carol"));
    assert_eq!(result, Err(MarketError::InsufficientAccountLiquidity));
}

#[test]
fn test_accumulator_release_raises_share_price() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(10_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(market.state().accumulator.amount, units(500));
    assert_eq!(
        market.state().backup.assets_of(&acct("lp")).unwrap(),
        units(100_000)
    );

    market.advance_time(30 * DAY);
    let preview = market.floating_assets_of(&acct("lp")).unwrap();
    assert!(preview > units(100_000));

    market.deposit(units(1_000), &acct("carol"), &acct("carol")).unwrap();
    assert!(market.state().accumulator.amount < units(500));
    assert!(market.state().backup.assets_of(&acct("lp")).unwrap() >= preview);
}

#[test]
fn test_collateral_factor_outside_unit_interval_rejected() {
    for factor in [0, 3 * WAD / 2] {
        let mut market = funded();
        market.deposit(units(1_000), &acct("carol"), &acct("carol")).unwrap();
        market.oracle_mut().set_collateral_factor(&usdc(), factor);

        let result = market.borrow(units(3_000), &acct("carol"), &acct("carol"));
        assert!(matches!(
            result,
            Err(MarketError::InvalidParameter { name: "adjust_factor", .. })
        ));
        assert!(matches!(
            market.account_liquidity(&acct("carol")),
            Err(MarketError::InvalidParameter { name: "adjust_factor", .. })
        ));
        assert_eq!(market.debt_of(&acct("carol")).unwrap(), 0);
    }

    let mut market = funded();
    market.oracle_mut().set_collateral_factor(&eth(), 0);
    let result = market.deposit_collateral(&eth(), units(1), &acct("bob"));
    assert!(matches!(
        result,
        Err(MarketError::InvalidParameter { name: "adjust_factor", .. })
    ));
}

#[test]
fn test_collateral_rejects_market_asset() {
    let mut market = funded();
    let result = market.deposit_collateral(&usdc(), units(1), &acct("bob"));
    assert!(matches!(
        result,
        Err(MarketError::InvalidParameter { name: "asset", .. })
    ));
}

// ========================================
// Liquidation
// ========================================

#[test]
fn test_liquidation_clears_unassigned_of_repaid_maturity() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(1));
    market
        .borrow_at_maturity(M1, units(100), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    market
        .borrow_at_maturity(M2, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert!(market.state().pool(M1).unassigned_earnings > 0);

    market.oracle_mut().set_price(&eth(), units(1_200));
    assert!(market.account_liquidity(&acct("bob")).unwrap().has_shortfall());

    let eth_before = market.custody().balance_of(&acct("liquidator"), &eth());
    let report = market
        .liquidate(&acct("liquidator"), &acct("bob"), units(10_000), &eth())
        .unwrap();
    assert_eq!(report.fixed_repaid[0], (M1, units(105)));
    assert!(report.seized > 0);
    assert_eq!(report.lenders_assets, mul_wad_down(report.repaid, WAD / 100).unwrap());
    assert_eq!(
        market.custody().balance_of(&acct("liquidator"), &eth()) - eth_before,
        report.seized
    );

    let pool = market.state().pool(M1);
    assert_eq!(pool.borrowed, 0);
    assert_eq!(pool.unassigned_earnings, 0);

    // A depositor arriving now has nothing to collect
    let deposit = market
        .deposit_at_maturity(M1, units(1), 0, &acct("carol"), &acct("carol"))
        .unwrap();
    assert_eq!(deposit.fee, 0);
    assert_eq!(deposit.position_assets, units(1));
    assert!(market.state().check_backup_borrowed());
}

#[test]
fn test_liquidation_guards() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(10));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    assert_eq!(
        market.liquidate(&acct("bob"), &acct("bob"), units(100), &eth()),
        Err(MarketError::SelfLiquidation)
    );
    assert_eq!(
        market.liquidate(&acct("liquidator"), &acct("bob"), units(100), &eth()),
        Err(MarketError::InsufficientShortfall)
    );

    market.oracle_mut().set_price(&eth(), units(100));
    assert_eq!(
        market.liquidate(&acct("liquidator"), &acct("bob"), units(100), &usdc()),
        Err(MarketError::NothingToSeize(usdc()))
    );
}

#[test]
fn test_bad_debt_absorbed_by_accumulator() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "dave", units(100));
    market
        .borrow_at_maturity(M1, units(8_000), Amount::MAX, &acct("dave"), &acct("dave"))
        .unwrap();
    assert_eq!(market.state().accumulator.amount, units(400));

    post_eth(&mut market, "bob", WAD / 10);
    market
        .borrow_at_maturity(M2, units(100), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    market.oracle_mut().set_price(&eth(), units(10));
    let report = market
        .liquidate(&acct("liquidator"), &acct("bob"), units(10_000), &eth())
        .unwrap();
    assert_eq!(report.seized, WAD / 10);
    assert_eq!(market.state().collateral.balance_of(&acct("bob"), &eth()), 0);

    let clearing = report.bad_debt.expect("bad debt cleared");
    assert_eq!(clearing.cleared_maturities, vec![M2]);
    assert!(clearing.spread > 0);
    assert_eq!(market.debt_of(&acct("bob")).unwrap(), 0);
    assert!(market.state().accumulator.amount < units(400));
    assert!(market.state().check_backup_borrowed());
    assert!(market.state().check_pool_consistency());
}

#[test]
fn test_clear_bad_debt_requires_no_collateral() {
    let mut market = funded();
    post_eth(&mut market, "bob", units(10));
    market
        .borrow_at_maturity(M1, units(100), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();
    assert_eq!(
        market.clear_bad_debt(&acct("bob")),
        Err(MarketError::InsufficientShortfall)
    );
}

// ========================================
// Engine
// ========================================

#[test]
fn test_custody_failure_rolls_back() {
    let mut market = funded();
    let before = snapshot(&market);
    let result = market.deposit(units(10), &acct("pauper"), &acct("pauper"));
    assert!(matches!(
        result,
        Err(MarketError::Custody(CustodyError::InsufficientFunds { .. }))
    ));
    assert_eq!(snapshot(&market), before);

    let result = market.deposit_at_maturity(M1, units(10), 0, &acct("pauper"), &acct("pauper"));
    assert!(result.is_err());
    assert_eq!(snapshot(&market), before);
}

#[test]
fn test_clock_never_rewinds() {
    let mut market = setup(0);
    assert_eq!(
        market.set_time(START - 1),
        Err(MarketError::ClockRewind {
            current: START,
            requested: START - 1
        })
    );
    market.set_time(START + 10).unwrap();
    assert_eq!(market.now(), START + 10);
}

#[test]
fn test_admin_bounds() {
    let mut market = setup(0);
    assert!(matches!(
        market.set_reserve_factor(WAD),
        Err(MarketError::InvalidParameter { name: "reserve_factor", .. })
    ));
    assert!(matches!(
        market.set_treasury(None, WAD / 10),
        Err(MarketError::InvalidParameter { name: "treasury", .. })
    ));
    assert!(matches!(
        market.set_max_future_pools(0),
        Err(MarketError::InvalidParameter { .. })
    ));
    assert!(matches!(
        market.set_fixed_borrow_threshold(WAD / 10, WAD / 5),
        Err(MarketError::InvalidParameter { .. })
    ));
    assert!(matches!(
        market.set_liquidation_incentive(LiquidationIncentive {
            liquidator: WAD / 5,
            lenders: WAD / 10
        }),
        Err(MarketError::InvalidParameter { .. })
    ));

    market.set_backup_fee_rate(WAD / 5).unwrap();
    market.set_max_future_pools(12).unwrap();
    assert_eq!(market.params().backup_fee_rate, WAD / 5);
    assert_eq!(market.params().max_future_pools, 12);
}

#[test]
fn test_smooth_factor_change_releases_first() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    market.advance_time(10 * DAY);
    let assets_before = market.state().backup.assets;
    market.set_smooth_factor(WAD).unwrap();
    assert!(market.state().backup.assets > assets_before);
    assert_eq!(market.state().accumulator.last_accrual, market.now());
}

#[test]
fn test_max_future_pools_change_releases_first() {
    let mut market = funded();
    market
        .deposit_at_maturity(M1, units(10_000), 0, &acct("alice"), &acct("alice"))
        .unwrap();
    post_eth(&mut market, "bob", units(100));
    market
        .borrow_at_maturity(M1, units(1_000), Amount::MAX, &acct("bob"), &acct("bob"))
        .unwrap();

    market.advance_time(10 * DAY);
    let assets_before = market.state().backup.assets;
    let accumulated = market.state().accumulator.amount;
    market.set_max_future_pools(6).unwrap();
    assert!(market.state().backup.assets > assets_before);
    assert!(market.state().accumulator.amount < accumulated);
    assert_eq!(market.state().accumulator.last_accrual, market.now());
    assert_eq!(market.params().max_future_pools, 6);
}

#[test]
fn test_shared_market_serializes_access() {
    let shared = SharedMarket::new(setup(0));
    let handles: Vec<_> = ["alice", "bob", "carol", "dave"]
        .into_iter()
        .map(|name| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    shared
                        .with(|market| market.deposit(units(100), &acct(name), &acct(name)))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    shared.with(|market| {
        assert_eq!(market.state().backup.assets, units(4_000));
        assert_eq!(market.state().backup.total_shares, units(4_000));
        assert_eq!(market.custody().vault_balance(&usdc()), units(4_000));
    });
}

#[test]
fn test_config_builds_market() {
    let config = MarketConfig::from_toml_str(
        r#"
        asset = "USDC"
        max_future_pools = 3
        reserve_factor = 0.2
        "#,
    )
    .unwrap();
    let params = config.params().unwrap();
    assert_eq!(params.reserve_factor, WAD / 5);

    let market = Market::new(
        params,
        config.rate_model().unwrap(),
        StaticOracle::new().with_asset("USDC", WAD, WAD),
        InMemoryCustody::new(),
        START,
    )
    .unwrap();
    assert_eq!(market.preview_deposit_at_maturity(M1, units(10)).unwrap(), units(10));
}
