//! Energy delivery
//!
//! Once bidding ends every (buyer, seller) pair gets a priced transfer and the
//! game gets a monitor tallying metered energy. Meter readings then fulfill
//! transfers; closing the market releases what was never delivered and
//! settles residual energy with the grid.

use std::collections::HashMap;

use common::{ProsumerId, Role, TransferId};
use settlement::{is_fulfillable, transfer_matrix, PriceSchedule};
use tracing::debug;

use crate::domain::{EnergyDeliveryMonitor, EnergyTransfer, Game};
use crate::error::{MarketError, Result};

/// Records created when bidding terminates
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    pub monitor: EnergyDeliveryMonitor,
    /// One transfer per (buyer, seller), buyer-major
    pub transfers: Vec<EnergyTransfer>,
    /// Sum of transfer costs per buyer index
    pub frozen_by_buyer: Vec<f64>,
}

/// Price the final bids and build the monitor with every transfer pending
pub fn plan_delivery(game: &Game, prices: &PriceSchedule) -> Result<DeliveryPlan> {
    if game.buy_bids.len() != game.nr_buyers() {
        return Err(MarketError::Consistency(format!(
            "{} bid vectors for {} buyers at end of bidding",
            game.buy_bids.len(),
            game.nr_buyers()
        )));
    }

    let priced = transfer_matrix(
        prices,
        &game.buy_bids,
        &game.offers_amounts,
        &game.offers_prices,
        &game.hop_distances,
    )?;

    let mut monitor = EnergyDeliveryMonitor::new(&game.id, game.nr_buyers(), game.nr_sellers());
    let mut frozen_by_buyer = vec![0.0; game.nr_buyers()];
    let mut transfers = Vec::with_capacity(priced.len());

    for cell in priced {
        let transfer = EnergyTransfer {
            id: TransferId::generate(&game.id),
            game: game.id.clone(),
            from: game.sellers[cell.seller].clone(),
            to: game.buyers_ordered[cell.buyer].clone(),
            amount: cell.amount,
            cost: cell.cost,
            is_fulfilled: false,
        };
        frozen_by_buyer[cell.buyer] += cell.cost;
        monitor.pending_energy_transfers.push(transfer.id.clone());
        transfers.push(transfer);
    }

    Ok(DeliveryPlan {
        monitor,
        transfers,
        frozen_by_buyer,
    })
}

fn transfer_roles(game: &Game, transfer: &EnergyTransfer) -> Result<(usize, usize)> {
    let seller = game.seller_index(&transfer.from).ok_or_else(|| {
        MarketError::Consistency(format!(
            "transfer {} names {} who is not a seller of {}",
            transfer.id, transfer.from, game.id
        ))
    })?;
    let buyer = game.buyer_index(&transfer.to).ok_or_else(|| {
        MarketError::Consistency(format!(
            "transfer {} names {} who is not a buyer of {}",
            transfer.id, transfer.to, game.id
        ))
    })?;
    Ok((seller, buyer))
}

/// Fulfill pending transfers touching `prosumer` that the tallies now cover
///
/// Pending transfers are scanned newest first. Each fulfilled transfer is
/// marked, its amount is taken off both tallies and it leaves the pending
/// list. `pending` must hold every transfer listed by the monitor. Returns the
/// fulfilled ids in scan order.
pub fn settle_pending(
    game: &Game,
    monitor: &mut EnergyDeliveryMonitor,
    prosumer: &ProsumerId,
    pending: &mut HashMap<TransferId, EnergyTransfer>,
) -> Result<Vec<TransferId>> {
    let mut fulfilled = Vec::new();

    for i in (0..monitor.pending_energy_transfers.len()).rev() {
        let id = &monitor.pending_energy_transfers[i];
        let transfer = pending
            .get_mut(id)
            .ok_or_else(|| MarketError::TransferNotFound(id.clone()))?;
        if !transfer.involves(prosumer) {
            continue;
        }

        let (seller, buyer) = transfer_roles(game, transfer)?;
        let seller_out = monitor.total_out_by_seller[seller];
        let buyer_in = monitor.total_in_by_buyer[buyer];
        if !is_fulfillable(seller_out, buyer_in, transfer.amount) {
            continue;
        }

        transfer.is_fulfilled = true;
        monitor.total_out_by_seller[seller] -= transfer.amount;
        monitor.total_in_by_buyer[buyer] -= transfer.amount;
        debug!(transfer = %transfer.id, amount = transfer.amount, "Transfer covered by metering");

        fulfilled.push(monitor.pending_energy_transfers.remove(i));
    }

    Ok(fulfilled)
}

/// Pending transfers whose frozen cost is released on close
///
/// The final pending entry is left out.
pub fn transfers_to_unfreeze(pending: &[TransferId]) -> &[TransferId] {
    &pending[..pending.len().saturating_sub(1)]
}

/// Role-indexed residual tallies of everyone in the game, buyers first
pub fn residual_energy(
    game: &Game,
    monitor: &EnergyDeliveryMonitor,
) -> Result<Vec<(ProsumerId, Role, f64, f64)>> {
    if monitor.total_in_by_buyer.len() != game.nr_buyers()
        || monitor.total_in_by_seller.len() != game.nr_sellers()
    {
        return Err(MarketError::Consistency(format!(
            "monitor {} does not match the participants of {}",
            monitor.id, game.id
        )));
    }

    let buyers = game.buyers_ordered.iter().enumerate().map(|(i, id)| {
        (
            id.clone(),
            Role::Buyer(i),
            monitor.total_in_by_buyer[i],
            monitor.total_out_by_buyer[i],
        )
    });
    let sellers = game.sellers.iter().enumerate().map(|(j, id)| {
        (
            id.clone(),
            Role::Seller(j),
            monitor.total_in_by_seller[j],
            monitor.total_out_by_seller[j],
        )
    });

    Ok(buyers.chain(sellers).collect())
}
