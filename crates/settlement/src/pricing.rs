//! Transfer and grid pricing
//!
//! A seller's price scales with how much of its offered capacity the final
//! bids claim, and every hop between buyer and seller adds a flat
//! transmission charge per unit of energy:
//!
//! ```text
//! load[j] = 1 + sum_i(bids[i][j]) / offered[j]
//! cost    = amount * (price[j] * load[j] + hop_cost * hops[i][j])
//! ```

use serde::{Deserialize, Serialize};

use crate::{Result, SettlementError};

/// Price the grid pays for energy a prosumer exports
pub const DEFAULT_GRID_BUY_PRICE: f64 = 0.1231;
/// Price the grid charges for energy a prosumer imports
pub const DEFAULT_GRID_SELL_PRICE: f64 = 0.2869;
/// Transmission charge per unit of energy per hop
pub const DEFAULT_TRANSMISSION_COST_PER_HOP: f64 = 0.02;

/// Fixed prices applied by the settlement engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSchedule {
    /// Grid price paid per unit of exported energy
    pub grid_buy_price: f64,
    /// Grid price charged per unit of imported energy
    pub grid_sell_price: f64,
    /// Charge per unit of energy per hop between seller and buyer
    pub transmission_cost_per_hop: f64,
}

impl PriceSchedule {
    /// Create a schedule, rejecting non-positive or non-finite prices
    pub fn new(
        grid_buy_price: f64,
        grid_sell_price: f64,
        transmission_cost_per_hop: f64,
    ) -> Result<Self> {
        for (name, value) in [
            ("grid_buy_price", grid_buy_price),
            ("grid_sell_price", grid_sell_price),
            ("transmission_cost_per_hop", transmission_cost_per_hop),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SettlementError::InvalidPrice { name, value });
            }
        }

        Ok(Self {
            grid_buy_price,
            grid_sell_price,
            transmission_cost_per_hop,
        })
    }
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self {
            grid_buy_price: DEFAULT_GRID_BUY_PRICE,
            grid_sell_price: DEFAULT_GRID_SELL_PRICE,
            transmission_cost_per_hop: DEFAULT_TRANSMISSION_COST_PER_HOP,
        }
    }
}

/// A priced (buyer, seller) cell of the transfer matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricedTransfer {
    /// Buyer index in the contribution-ranked order
    pub buyer: usize,
    /// Seller index in FCFS order
    pub seller: usize,
    /// Energy the buyer bid for from this seller
    pub amount: f64,
    /// Cost frozen against the buyer
    pub cost: f64,
}

/// Load factor of every seller given the final bids
///
/// Every buyer's bid counts towards the used capacity, including buyers that
/// stopped with an all-zero bid.
pub fn seller_loads(bids: &[Vec<f64>], offered: &[f64]) -> Result<Vec<f64>> {
    let mut used = vec![0.0; offered.len()];

    for (buyer, row) in bids.iter().enumerate() {
        if row.len() != offered.len() {
            return Err(SettlementError::ShapeMismatch(format!(
                "buyer {} bid for {} sellers, {} offered",
                buyer,
                row.len(),
                offered.len()
            )));
        }
        for (seller, amount) in row.iter().enumerate() {
            used[seller] += amount;
        }
    }

    offered
        .iter()
        .zip(used)
        .enumerate()
        .map(|(seller, (&capacity, used))| {
            if capacity <= 0.0 {
                Err(SettlementError::NonPositiveCapacity { seller, capacity })
            } else {
                Ok(1.0 + used / capacity)
            }
        })
        .collect()
}

/// Cost of moving `amount` from a seller at `offer_price` and `load` over `hops`
pub fn transfer_cost(
    amount: f64,
    offer_price: f64,
    load: f64,
    transmission_cost_per_hop: f64,
    hops: u32,
) -> f64 {
    amount * (offer_price * load + transmission_cost_per_hop * f64::from(hops))
}

/// Price every (buyer, seller) pair, buyer-major
pub fn transfer_matrix(
    schedule: &PriceSchedule,
    bids: &[Vec<f64>],
    offer_amounts: &[f64],
    offer_prices: &[f64],
    hop_distances: &[Vec<u32>],
) -> Result<Vec<PricedTransfer>> {
    if offer_prices.len() != offer_amounts.len() {
        return Err(SettlementError::ShapeMismatch(format!(
            "{} offer prices for {} offer amounts",
            offer_prices.len(),
            offer_amounts.len()
        )));
    }
    if hop_distances.len() != bids.len() {
        return Err(SettlementError::ShapeMismatch(format!(
            "{} distance vectors for {} bid vectors",
            hop_distances.len(),
            bids.len()
        )));
    }

    let loads = seller_loads(bids, offer_amounts)?;
    let mut transfers = Vec::with_capacity(bids.len() * offer_amounts.len());

    for (buyer, (row, hops)) in bids.iter().zip(hop_distances).enumerate() {
        if hops.len() != offer_amounts.len() {
            return Err(SettlementError::ShapeMismatch(format!(
                "buyer {} has {} hop distances for {} sellers",
                buyer,
                hops.len(),
                offer_amounts.len()
            )));
        }
        for (seller, &amount) in row.iter().enumerate() {
            transfers.push(PricedTransfer {
                buyer,
                seller,
                amount,
                cost: transfer_cost(
                    amount,
                    offer_prices[seller],
                    loads[seller],
                    schedule.transmission_cost_per_hop,
                    hops[seller],
                ),
            });
        }
    }

    Ok(transfers)
}

/// Grid settlement for residual metered energy
///
/// Positive values are revenue, negative values are costs.
pub fn grid_net_fund(schedule: &PriceSchedule, total_in: f64, total_out: f64) -> f64 {
    total_out * schedule.grid_buy_price - total_in * schedule.grid_sell_price
}

/// A transfer is delivered once both ends have metered at least its amount
pub fn is_fulfillable(seller_out: f64, buyer_in: f64, amount: f64) -> bool {
    seller_out >= amount && buyer_in >= amount
}
