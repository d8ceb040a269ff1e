//! Priced-round cap-table math.
//!
//! Pure functions, deterministic, no side effects. Every division by zero is
//! policy: the result is 0, a valid degenerate state (e.g., a cap table with
//! no existing shares), never an error.

use crate::rows::InvestorRow;

/// Synthetic entry name for the incoming round's investors.
pub const NEW_INVESTORS: &str = "New Investors";
/// Synthetic entry name for the option pool.
pub const OPTION_POOL: &str = "Option Pool";

/// The four round parameters, after slot coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundParams {
    pub round_type: String,
    /// New investment, currency units.
    pub amount: f64,
    /// Pre-money valuation, currency units.
    pub pre_money: f64,
    /// Option pool target, 0-100 scale.
    pub pool_pct: f64,
}

/// One line of the computed cap table.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub name: String,
    pub investment: f64,
    pub final_shares: f64,
    /// Fraction of `total_post_shares`, 0 when the denominator is 0.
    pub ownership: f64,
}

/// Result of a full round computation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapTable {
    pub post_money: f64,
    pub price_per_share: f64,
    pub new_shares: f64,
    pub pool_shares: f64,
    pub total_post_shares: f64,
    /// Input rows in order, then "New Investors", then "Option Pool".
    pub holdings: Vec<Holding>,
}

/// Compute the priced round.
pub fn compute(params: &RoundParams, rows: &[InvestorRow]) -> CapTable {
    let total_pre_shares: f64 = rows.iter().map(|r| r.pre_round_shares).sum();

    let price_per_share = safe_div(params.pre_money, total_pre_shares);
    let new_shares = safe_div(params.amount, price_per_share);
    let pre_pool_total = total_pre_shares + new_shares;

    let pool_fraction = params.pool_pct / 100.0;
    let pool_shares = if pool_fraction > 0.0 && pool_fraction < 1.0 {
        pre_pool_total / (1.0 - pool_fraction) - pre_pool_total
    } else {
        0.0
    };

    let total_post_shares = pre_pool_total + pool_shares;
    let post_money = params.pre_money + params.amount;

    let ownership = |shares: f64| safe_div(shares, total_post_shares);

    let mut holdings: Vec<Holding> = rows
        .iter()
        .map(|r| Holding {
            name: r.name.clone(),
            investment: r.pre_round_investment,
            final_shares: r.pre_round_shares,
            ownership: ownership(r.pre_round_shares),
        })
        .collect();
    holdings.push(Holding {
        name: NEW_INVESTORS.to_string(),
        investment: params.amount,
        final_shares: new_shares,
        ownership: ownership(new_shares),
    });
    holdings.push(Holding {
        name: OPTION_POOL.to_string(),
        investment: 0.0,
        final_shares: pool_shares,
        ownership: ownership(pool_shares),
    });

    CapTable {
        post_money,
        price_per_share,
        new_shares,
        pool_shares,
        total_post_shares,
        holdings,
    }
}

/// Division with the degenerate-state policy: x/0 = 0.
fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
