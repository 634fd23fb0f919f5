//! Market engine - transaction processing for the energy auction
//!
//! The engine reads snapshots from the registry, runs the membership,
//! bidding and delivery rules against them, and commits every resulting write
//! as one [`ChangeSet`]. Events are emitted only after a commit succeeds, so a
//! rejected transaction neither writes nor publishes anything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{GameId, ProsumerId, TransferId};
use observability::MarketMetrics;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use settlement::grid_net_fund;
use tracing::{debug, error, info, warn};

use crate::bidding::{self, BidOutcome};
use crate::delivery;
use crate::domain::{EnergyDeliveryMonitor, EnergyTransfer, Game, Prosumer};
use crate::error::{MarketError, Rejection, Result};
use crate::event::{EventEmitter, MarketEvent};
use crate::ledger::ProsumerBook;
use crate::membership;
use crate::settings::MarketSettings;
use crate::store::{ChangeSet, Registry};
use crate::transaction::{CloseSummary, Receipt, Transaction};

/// Market engine
pub struct MarketEngine {
    registry: Arc<dyn Registry>,
    emitter: Arc<dyn EventEmitter>,
    settings: MarketSettings,
    rng: Mutex<StdRng>,
    metrics: MarketMetrics,
}

impl MarketEngine {
    /// Create a new MarketEngine
    pub fn new(
        registry: Arc<dyn Registry>,
        emitter: Arc<dyn EventEmitter>,
        settings: MarketSettings,
    ) -> Self {
        let rng = match settings.hop_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            registry,
            emitter,
            settings,
            rng: Mutex::new(rng),
            metrics: MarketMetrics::new(),
        }
    }

    pub fn settings(&self) -> &MarketSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Process one transaction
    pub async fn submit(&self, tx: Transaction) -> Result<Receipt> {
        debug!(tx = tx.kind(), "Processing transaction");

        match tx {
            Transaction::RegisterProsumer {
                prosumer,
                account_balance,
                contribution_metric,
            } => {
                let prosumer = self
                    .register_prosumer(prosumer, account_balance, contribution_metric)
                    .await?;
                Ok(Receipt::ProsumerRegistered {
                    prosumer: prosumer.id,
                })
            }
            Transaction::PublishGame {
                timestamp,
                registration_duration_ms,
            } => {
                let duration = registration_duration_ms
                    .unwrap_or(self.settings.default_registration_duration_ms);
                let game = self.register_game(timestamp, duration).await?;
                Ok(Receipt::GamePublished { game })
            }
            Transaction::PublishOffer {
                timestamp,
                game,
                initiator,
                amount,
                price,
            } => {
                let seller_index = self
                    .submit_offer(timestamp, &game, &initiator, amount, price)
                    .await?;
                Ok(Receipt::OfferAccepted { seller_index })
            }
            Transaction::PublishDemand {
                timestamp,
                game,
                initiator,
                amount,
            } => {
                let buyer_index = self
                    .submit_demand(timestamp, &game, &initiator, amount)
                    .await?;
                Ok(Receipt::DemandAccepted { buyer_index })
            }
            Transaction::StopGameRegistration { game } => {
                let game = self.close_registration(&game).await?;
                Ok(Receipt::RegistrationStopped {
                    nr_buyers: game.nr_buyers(),
                    nr_sellers: game.nr_sellers(),
                })
            }
            Transaction::PublishBuyBid {
                game,
                initiator,
                keep_playing,
                bid_amounts,
            } => {
                let outcome = self
                    .submit_bid(&game, &initiator, keep_playing, bid_amounts.as_deref())
                    .await?;
                Ok(Receipt::BidAccepted { outcome })
            }
            Transaction::PublishMeterReading {
                game,
                initiator,
                in_energy,
                out_energy,
            } => {
                let fulfilled = self
                    .reconcile_meter_reading(&game, &initiator, in_energy, out_energy)
                    .await?;
                Ok(Receipt::MeterReadingRecorded { fulfilled })
            }
            Transaction::CloseMarket { game } => {
                let summary = self.close_market(&game).await?;
                Ok(Receipt::MarketClosed { summary })
            }
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Onboard a prosumer
    pub async fn register_prosumer(
        &self,
        id: ProsumerId,
        account_balance: f64,
        contribution_metric: f64,
    ) -> Result<Prosumer> {
        let result = self
            .apply_register_prosumer(id, account_balance, contribution_metric)
            .await;
        self.observe("register_prosumer", result)
    }

    /// Open a game for registration
    pub async fn register_game(
        &self,
        timestamp: DateTime<Utc>,
        registration_duration_ms: i64,
    ) -> Result<GameId> {
        let result = self
            .apply_register_game(timestamp, registration_duration_ms)
            .await;
        self.observe("publish_game", result)
    }

    /// Admit a seller. Returns its index among the game's sellers.
    pub async fn submit_offer(
        &self,
        timestamp: DateTime<Utc>,
        game: &GameId,
        prosumer: &ProsumerId,
        amount: f64,
        price: f64,
    ) -> Result<usize> {
        let result = self
            .apply_offer(timestamp, game, prosumer, amount, price)
            .await;
        self.observe("publish_offer", result)
    }

    /// Admit a buyer. Returns its rank among the game's buyers.
    pub async fn submit_demand(
        &self,
        timestamp: DateTime<Utc>,
        game: &GameId,
        prosumer: &ProsumerId,
        amount: f64,
    ) -> Result<usize> {
        let result = self.apply_demand(timestamp, game, prosumer, amount).await;
        self.observe("publish_demand", result)
    }

    /// Stop registration and hand the first turn to the top-ranked buyer
    pub async fn close_registration(&self, game: &GameId) -> Result<Game> {
        let result = self.apply_close_registration(game).await;
        self.observe("stop_game_registration", result)
    }

    /// Play a buyer's turn
    pub async fn submit_bid(
        &self,
        game: &GameId,
        buyer: &ProsumerId,
        keep_playing: bool,
        bid_amounts: Option<&[f64]>,
    ) -> Result<BidOutcome> {
        let result = self
            .apply_bid(game, buyer, keep_playing, bid_amounts)
            .await;
        self.observe("publish_buy_bid", result)
    }

    /// Record metered energy and fulfill the transfers it covers
    pub async fn reconcile_meter_reading(
        &self,
        game: &GameId,
        prosumer: &ProsumerId,
        in_energy: f64,
        out_energy: f64,
    ) -> Result<Vec<TransferId>> {
        let result = self
            .apply_meter_reading(game, prosumer, in_energy, out_energy)
            .await;
        self.observe("publish_meter_reading", result)
    }

    /// Release pending transfers and settle residual energy with the grid
    pub async fn close_market(&self, game: &GameId) -> Result<CloseSummary> {
        let result = self.apply_close_market(game).await;
        self.observe("close_market", result)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn game(&self, id: &GameId) -> Result<Game> {
        self.load_game(id).await
    }

    pub async fn prosumer(&self, id: &ProsumerId) -> Result<Prosumer> {
        self.registry
            .get_prosumer(id)
            .await?
            .ok_or_else(|| MarketError::ProsumerNotFound(id.clone()))
    }

    /// The single delivery monitor of a game
    pub async fn monitor(&self, game: &GameId) -> Result<EnergyDeliveryMonitor> {
        self.resolve_monitor(game).await
    }

    /// Every transfer of a game, ordered by buyer then seller
    pub async fn transfers(&self, game: &GameId) -> Result<Vec<EnergyTransfer>> {
        let mut transfers = self.registry.find_transfers_by_game(game).await?;
        transfers.sort_by(|a, b| a.to.cmp(&b.to).then_with(|| a.from.cmp(&b.from)));
        Ok(transfers)
    }

    // ========================================================================
    // Transaction bodies
    // ========================================================================

    async fn apply_register_prosumer(
        &self,
        id: ProsumerId,
        account_balance: f64,
        contribution_metric: f64,
    ) -> Result<Prosumer> {
        if !(account_balance.is_finite() && contribution_metric.is_finite()) {
            return Err(Rejection::InvalidProsumerSeed {
                balance: account_balance,
                metric: contribution_metric,
            }
            .into());
        }
        if self.registry.get_prosumer(&id).await?.is_some() {
            return Err(Rejection::ProsumerExists(id).into());
        }

        let prosumer = Prosumer::new(id, account_balance, contribution_metric);
        self.registry.add_prosumer(prosumer.clone()).await?;

        info!(
            prosumer = %prosumer.id,
            balance = account_balance,
            metric = contribution_metric,
            "Prosumer registered"
        );
        Ok(prosumer)
    }

    async fn apply_register_game(
        &self,
        timestamp: DateTime<Utc>,
        registration_duration_ms: i64,
    ) -> Result<GameId> {
        if registration_duration_ms <= 0 {
            return Err(Rejection::NonPositiveDuration(registration_duration_ms).into());
        }

        let game = Game::new(GameId::generate(timestamp), timestamp, registration_duration_ms);
        if game.registration_end().is_none() {
            return Err(Rejection::WindowOutOfRange(registration_duration_ms).into());
        }
        let id = game.id.clone();

        let mut changes = ChangeSet::new();
        changes.add_game(game);
        self.registry.commit(changes).await?;

        info!(game = %id, start = %timestamp, duration_ms = registration_duration_ms, "Game registered");
        self.emitter.emit(MarketEvent::GameInit {
            game: id.clone(),
            game_id: id.to_string(),
        });
        Ok(id)
    }

    async fn apply_offer(
        &self,
        timestamp: DateTime<Utc>,
        game_id: &GameId,
        prosumer: &ProsumerId,
        amount: f64,
        price: f64,
    ) -> Result<usize> {
        let mut game = self.load_game(game_id).await?;
        self.prosumer(prosumer).await?;

        let index = membership::admit_seller(&mut game, prosumer, amount, price, timestamp)?;

        let mut changes = ChangeSet::new();
        changes.update_game(game);
        self.registry.commit(changes).await?;

        info!(game = %game_id, prosumer = %prosumer, index, amount, price, "Offer accepted");
        Ok(index)
    }

    async fn apply_demand(
        &self,
        timestamp: DateTime<Utc>,
        game_id: &GameId,
        prosumer: &ProsumerId,
        amount: f64,
    ) -> Result<usize> {
        let mut game = self.load_game(game_id).await?;
        let metric = self.prosumer(prosumer).await?.contribution_metric;

        let mut ranked = Vec::with_capacity(game.nr_buyers());
        for buyer in &game.buyers_ordered {
            ranked.push(self.prosumer(buyer).await?.contribution_metric);
        }

        let index =
            membership::admit_buyer(&mut game, prosumer, metric, &ranked, amount, timestamp)?;

        let mut changes = ChangeSet::new();
        changes.update_game(game);
        self.registry.commit(changes).await?;

        info!(game = %game_id, prosumer = %prosumer, index, amount, metric, "Demand accepted");
        Ok(index)
    }

    async fn apply_close_registration(&self, game_id: &GameId) -> Result<Game> {
        let mut game = self.load_game(game_id).await?;

        {
            let mut rng = self.rng.lock();
            membership::open_bidding(&mut game, &mut *rng)?;
        }

        let first = game.buyers_ordered.first().cloned().ok_or_else(|| {
            MarketError::Consistency(format!("bidding opened on {} without buyers", game.id))
        })?;

        let mut changes = ChangeSet::new();
        changes.update_game(game.clone());
        self.registry.commit(changes).await?;

        info!(
            game = %game_id,
            buyers = game.nr_buyers(),
            sellers = game.nr_sellers(),
            "Registration closed, bidding open"
        );
        debug!(game = %game_id, hop_distances = ?game.hop_distances, "Hop distances assigned");

        self.emitter.emit(MarketEvent::BuyBid {
            game: game.id.clone(),
            buyer_in_turn: first,
            buyer_in_turn_index: 0,
        });
        Ok(game)
    }

    async fn apply_bid(
        &self,
        game_id: &GameId,
        buyer: &ProsumerId,
        keep_playing: bool,
        bid_amounts: Option<&[f64]>,
    ) -> Result<BidOutcome> {
        let mut game = self.load_game(game_id).await?;
        let outcome = bidding::apply_bid(&mut game, buyer, keep_playing, bid_amounts)?;

        let mut changes = ChangeSet::new();
        changes.update_game(game.clone());

        let mut nr_transfers = 0;
        if let BidOutcome::Finished { .. } = outcome {
            let plan = delivery::plan_delivery(&game, &self.settings.prices)?;
            nr_transfers = plan.transfers.len();

            let mut book = ProsumerBook::new();
            for (id, frozen) in game.buyers_ordered.iter().zip(&plan.frozen_by_buyer) {
                book.get_mut(self.registry.as_ref(), id).await?.frozen_funds += frozen;
            }
            book.write_into(&mut changes);

            for transfer in plan.transfers {
                changes.add_transfer(transfer);
            }
            changes.add_monitor(plan.monitor);
        }

        self.registry.commit(changes).await?;

        info!(game = %game_id, buyer = %buyer, keep_playing, round = game.nr_rounds, "Bid accepted");

        match outcome {
            BidOutcome::Finished { reason } => {
                info!(
                    game = %game_id,
                    rounds = game.nr_rounds,
                    reason = reason.as_str(),
                    transfers = nr_transfers,
                    "Bidding finished"
                );
                self.metrics.record_game_terminated(reason.as_str());
                self.metrics.set_pending_transfers(nr_transfers);
                self.emitter.emit(MarketEvent::GameStop {
                    game: game.id.clone(),
                    total_nr_rounds: game.nr_rounds,
                    reason,
                });
            }
            BidOutcome::NextTurn { index } => self.announce_turn(&game, index),
            BidOutcome::NewRound { round } => {
                debug!(game = %game_id, round, "New bidding round");
                self.announce_turn(&game, 0);
            }
        }

        Ok(outcome)
    }

    async fn apply_meter_reading(
        &self,
        game_id: &GameId,
        prosumer: &ProsumerId,
        in_energy: f64,
        out_energy: f64,
    ) -> Result<Vec<TransferId>> {
        if !(in_energy.is_finite() && out_energy.is_finite() && in_energy >= 0.0 && out_energy >= 0.0)
        {
            return Err(Rejection::InvalidMeterReading {
                in_energy,
                out_energy,
            }
            .into());
        }

        let game = self.load_game(game_id).await?;
        let role = game
            .role_of(prosumer)
            .ok_or_else(|| Rejection::NotParticipant(prosumer.clone()))?;
        if game.market_closed {
            return Err(Rejection::MarketClosed(game.id.clone()).into());
        }

        let mut monitor = self.resolve_monitor(game_id).await?;
        let registry = self.registry.as_ref();

        let mut book = ProsumerBook::new();
        book.get_mut(registry, prosumer)
            .await?
            .record_meter_reading(in_energy, out_energy);
        monitor.record(role, in_energy, out_energy)?;

        let mut pending = HashMap::with_capacity(monitor.nr_pending());
        for id in &monitor.pending_energy_transfers {
            let transfer = registry
                .get_transfer(id)
                .await?
                .ok_or_else(|| MarketError::TransferNotFound(id.clone()))?;
            pending.insert(id.clone(), transfer);
        }

        let fulfilled = delivery::settle_pending(&game, &mut monitor, prosumer, &mut pending)?;

        let mut changes = ChangeSet::new();
        let mut events = Vec::with_capacity(fulfilled.len());
        for id in &fulfilled {
            let transfer = pending
                .remove(id)
                .ok_or_else(|| MarketError::TransferNotFound(id.clone()))?;

            let buyer = book.get_mut(registry, &transfer.to).await?;
            buyer.frozen_funds -= transfer.cost;
            buyer.account_balance -= transfer.cost;
            book.get_mut(registry, &transfer.from).await?.account_balance += transfer.cost;

            events.push(MarketEvent::TransferFulfilled {
                game: game.id.clone(),
                transfer: transfer.id.clone(),
                from: transfer.from.clone(),
                to: transfer.to.clone(),
                amount: transfer.amount,
                cost: transfer.cost,
            });
            changes.update_transfer(transfer);
        }

        let nr_pending = monitor.nr_pending();
        changes.update_monitor(monitor);
        book.write_into(&mut changes);
        self.registry.commit(changes).await?;

        info!(
            game = %game_id,
            prosumer = %prosumer,
            %role,
            in_energy,
            out_energy,
            fulfilled = fulfilled.len(),
            pending = nr_pending,
            "Meter reading recorded"
        );
        self.metrics.record_transfers_fulfilled(fulfilled.len() as u64);
        self.metrics.set_pending_transfers(nr_pending);
        for event in events {
            self.emitter.emit(event);
        }

        Ok(fulfilled)
    }

    async fn apply_close_market(&self, game_id: &GameId) -> Result<CloseSummary> {
        let mut game = self.load_game(game_id).await?;
        if game.market_closed {
            return Err(Rejection::MarketClosed(game.id.clone()).into());
        }

        let monitor = self.resolve_monitor(game_id).await?;
        let registry = self.registry.as_ref();
        let mut book = ProsumerBook::new();

        let to_unfreeze = delivery::transfers_to_unfreeze(&monitor.pending_energy_transfers);
        for id in to_unfreeze {
            let transfer = registry
                .get_transfer(id)
                .await?
                .ok_or_else(|| MarketError::TransferNotFound(id.clone()))?;
            book.get_mut(registry, &transfer.to).await?.frozen_funds -= transfer.cost;
        }

        let mut grid_settlements = Vec::with_capacity(game.participants.len());
        for (id, role, total_in, total_out) in delivery::residual_energy(&game, &monitor)? {
            let net = grid_net_fund(&self.settings.prices, total_in, total_out);
            book.get_mut(registry, &id).await?.account_balance += net;
            debug!(game = %game_id, prosumer = %id, %role, total_in, total_out, net, "Grid settlement");
            grid_settlements.push((id, net));
        }

        let summary = CloseSummary {
            unfrozen_transfers: to_unfreeze.len(),
            still_frozen: monitor.nr_pending() - to_unfreeze.len(),
            grid_settlements,
        };

        game.market_closed = true;
        let mut changes = ChangeSet::new();
        changes.update_game(game);
        book.write_into(&mut changes);
        self.registry.commit(changes).await?;

        info!(
            game = %game_id,
            unfrozen = summary.unfrozen_transfers,
            still_frozen = summary.still_frozen,
            "Market closed"
        );
        self.emitter.emit(MarketEvent::MarketClosed {
            game: game_id.clone(),
            unfrozen_transfers: summary.unfrozen_transfers,
        });
        Ok(summary)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_game(&self, id: &GameId) -> Result<Game> {
        self.registry
            .get_game(id)
            .await?
            .ok_or_else(|| MarketError::GameNotFound(id.clone()))
    }

    async fn resolve_monitor(&self, game: &GameId) -> Result<EnergyDeliveryMonitor> {
        let mut monitors = self.registry.find_monitors_by_game(game).await?;
        match monitors.len() {
            1 => Ok(monitors.remove(0)),
            found => Err(MarketError::MonitorNotUnique {
                game: game.clone(),
                found,
            }),
        }
    }

    fn announce_turn(&self, game: &Game, index: usize) {
        if let Some(buyer) = game.buyers_ordered.get(index) {
            self.emitter.emit(MarketEvent::BuyBid {
                game: game.id.clone(),
                buyer_in_turn: buyer.clone(),
                buyer_in_turn_index: index,
            });
        }
    }

    fn observe<T>(&self, tx: &'static str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.metrics.record_accepted(tx),
            Err(err) if err.is_fatal() => {
                error!(tx, error = %err, "Transaction failed consistency check");
                self.metrics.record_rejected(tx);
            }
            Err(err) => {
                warn!(tx, error = %err, "Transaction rejected");
                self.metrics.record_rejected(tx);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RecordingEmitter, TerminationReason};
    use crate::store::InMemoryRegistry;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};

    const EPS: f64 = 1e-9;

    struct Harness {
        engine: MarketEngine,
        registry: Arc<InMemoryRegistry>,
        events: Arc<RecordingEmitter>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(InMemoryRegistry::new());
        let events = Arc::new(RecordingEmitter::new());
        let engine = MarketEngine::new(
            registry.clone(),
            events.clone(),
            MarketSettings::default().with_hop_seed(11),
        );
        Harness {
            engine,
            registry,
            events,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn pid(id: &str) -> ProsumerId {
        ProsumerId::new(id)
    }

    impl Harness {
        async fn prosumers(&self, list: &[(&str, f64)]) {
            for (id, metric) in list {
                self.engine
                    .register_prosumer(pid(id), 1000.0, *metric)
                    .await
                    .unwrap();
            }
        }

        /// Game with S1, S2 offering 50 each and B1 (0.8), B2 (0.2) demanding
        async fn two_by_two(&self) -> GameId {
            self.prosumers(&[("S1", 0.0), ("S2", 0.0), ("B1", 0.8), ("B2", 0.2)])
                .await;
            let game = self.engine.register_game(t0(), 60_000).await.unwrap();
            let e = &self.engine;
            e.submit_offer(t0(), &game, &pid("S1"), 50.0, 0.06).await.unwrap();
            e.submit_offer(t0(), &game, &pid("S2"), 50.0, 0.07).await.unwrap();
            e.submit_demand(t0(), &game, &pid("B2"), 20.0).await.unwrap();
            e.submit_demand(t0(), &game, &pid("B1"), 30.0).await.unwrap();
            game
        }

        /// Run bidding to completion: B1 [15,15], B2 [10,10], then both stop
        async fn finish_bidding(&self, game: &GameId) {
            let e = &self.engine;
            e.close_registration(game).await.unwrap();
            e.submit_bid(game, &pid("B1"), true, Some(&[15.0, 15.0])).await.unwrap();
            e.submit_bid(game, &pid("B2"), true, Some(&[10.0, 10.0])).await.unwrap();
            e.submit_bid(game, &pid("B1"), false, None).await.unwrap();
            let outcome = e.submit_bid(game, &pid("B2"), false, None).await.unwrap();
            assert_matches!(outcome, BidOutcome::Finished { .. });
        }
    }

    #[tokio::test]
    async fn test_register_game_emits_init() {
        let h = harness();
        let game = h.engine.register_game(t0(), 1000).await.unwrap();

        assert!(game.as_str().starts_with("Game-2024-05-01."));
        assert_eq!(
            h.events.events(),
            vec![MarketEvent::GameInit {
                game: game.clone(),
                game_id: game.to_string()
            }]
        );
        let stored = h.engine.game(&game).await.unwrap();
        assert!(stored.accepts_registrations);
        assert_eq!(stored.nr_rounds, 0);
    }

    #[tokio::test]
    async fn test_register_game_rejects_non_positive_duration() {
        let h = harness();
        let result = h.engine.register_game(t0(), 0).await;
        assert_matches!(
            result,
            Err(MarketError::Rejected(Rejection::NonPositiveDuration(0)))
        );
        assert_eq!(h.registry.game_count(), 0);
        assert!(h.events.is_empty());
    }

    #[tokio::test]
    async fn test_register_prosumer_twice() {
        let h = harness();
        h.prosumers(&[("P1", 0.5)]).await;
        let again = h.engine.register_prosumer(pid("P1"), 5.0, 0.1).await;
        assert_matches!(again, Err(MarketError::Rejected(Rejection::ProsumerExists(_))));
        assert_eq!(h.engine.prosumer(&pid("P1")).await.unwrap().account_balance, 1000.0);
    }

    #[tokio::test]
    async fn test_register_game_rejects_window_past_date_range() {
        let h = harness();
        let result = h.engine.register_game(t0(), i64::MAX).await;
        assert_matches!(
            result,
            Err(MarketError::Rejected(Rejection::WindowOutOfRange(i64::MAX)))
        );
        assert_eq!(h.registry.game_count(), 0);
        assert!(h.events.is_empty());

        // A normal game and offer still go through afterwards
        h.prosumers(&[("S1", 0.0)]).await;
        let game = h.engine.register_game(t0(), 60_000).await.unwrap();
        assert_eq!(
            h.engine.submit_offer(t0(), &game, &pid("S1"), 1.0, 1.0).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_register_prosumer_rejects_non_finite_seed() {
        let h = harness();
        let nan_metric = h.engine.register_prosumer(pid("P1"), 10.0, f64::NAN).await;
        assert_matches!(
            nan_metric,
            Err(MarketError::Rejected(Rejection::InvalidProsumerSeed { .. }))
        );
        let inf_balance = h
            .engine
            .register_prosumer(pid("P1"), f64::INFINITY, 0.5)
            .await;
        assert_matches!(
            inf_balance,
            Err(MarketError::Rejected(Rejection::InvalidProsumerSeed { .. }))
        );
        assert_matches!(
            h.engine.prosumer(&pid("P1")).await,
            Err(MarketError::ProsumerNotFound(_))
        );
    }

    #[tokio::test]
    async fn test_offer_from_unknown_prosumer() {
        let h = harness();
        let game = h.engine.register_game(t0(), 60_000).await.unwrap();
        let result = h
            .engine
            .submit_offer(t0(), &game, &pid("ghost"), 10.0, 0.1)
            .await;
        assert_matches!(result, Err(MarketError::ProsumerNotFound(_)));
        assert!(h.engine.game(&game).await.unwrap().sellers.is_empty());
    }

    #[tokio::test]
    async fn test_offer_for_unknown_game() {
        let h = harness();
        h.prosumers(&[("S1", 0.0)]).await;
        let result = h
            .engine
            .submit_offer(t0(), &GameId::new("Game-none"), &pid("S1"), 10.0, 0.1)
            .await;
        assert_matches!(result, Err(MarketError::GameNotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_demand_does_not_mutate() {
        let h = harness();
        let game = h.two_by_two().await;
        let before = h.engine.game(&game).await.unwrap();

        let result = h.engine.submit_demand(t0(), &game, &pid("B1"), 5.0).await;
        assert_matches!(result, Err(MarketError::Rejected(Rejection::AlreadyParticipant(_))));
        assert_eq!(h.engine.game(&game).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_demands_ranked_by_metric() {
        let h = harness();
        let game = h.two_by_two().await;
        let stored = h.engine.game(&game).await.unwrap();

        assert_eq!(stored.buyers_ordered, vec![pid("B1"), pid("B2")]);
        assert_eq!(stored.demands, vec![30.0, 20.0]);
        assert_eq!(stored.participants.len(), 4);
    }

    #[tokio::test]
    async fn test_offer_after_window() {
        let h = harness();
        h.prosumers(&[("S1", 0.0)]).await;
        let game = h.engine.register_game(t0(), 1000).await.unwrap();
        let late = t0() + Duration::milliseconds(1000);

        let result = h.engine.submit_offer(late, &game, &pid("S1"), 10.0, 0.1).await;
        assert_matches!(
            result,
            Err(MarketError::Rejected(Rejection::OutsideRegistrationWindow(_)))
        );
    }

    #[tokio::test]
    async fn test_close_registration_announces_first_buyer() {
        let h = harness();
        let game = h.two_by_two().await;
        h.events.take();

        let stored = h.engine.close_registration(&game).await.unwrap();
        assert!(!stored.accepts_registrations);
        assert_eq!(stored.hop_distances.len(), 2);
        assert_eq!(
            h.events.take(),
            vec![MarketEvent::BuyBid {
                game: game.clone(),
                buyer_in_turn: pid("B1"),
                buyer_in_turn_index: 0
            }]
        );

        let again = h.engine.close_registration(&game).await;
        assert_matches!(again, Err(MarketError::Rejected(Rejection::RegistrationClosed(_))));
        assert!(h.events.is_empty());

        let late_offer = h.engine.submit_offer(t0(), &game, &pid("S1"), 1.0, 1.0).await;
        assert_matches!(late_offer, Err(MarketError::Rejected(Rejection::RegistrationClosed(_))));
    }

    #[tokio::test]
    async fn test_close_registration_without_buyers() {
        let h = harness();
        let game = h.engine.register_game(t0(), 60_000).await.unwrap();
        let result = h.engine.close_registration(&game).await;
        assert_matches!(result, Err(MarketError::Rejected(Rejection::NoBuyers(_))));
        assert!(h.engine.game(&game).await.unwrap().accepts_registrations);
    }

    #[tokio::test]
    async fn test_bids_announce_next_turn() {
        let h = harness();
        let game = h.two_by_two().await;
        h.engine.close_registration(&game).await.unwrap();
        h.events.take();

        let out_of_turn = h.engine.submit_bid(&game, &pid("B2"), true, Some(&[1.0, 1.0])).await;
        assert_matches!(
            out_of_turn,
            Err(MarketError::Rejected(Rejection::NotBuyersTurn { .. }))
        );

        h.engine
            .submit_bid(&game, &pid("B1"), true, Some(&[15.0, 15.0]))
            .await
            .unwrap();
        let outcome = h
            .engine
            .submit_bid(&game, &pid("B2"), true, Some(&[10.0, 10.0]))
            .await
            .unwrap();
        assert_eq!(outcome, BidOutcome::NewRound { round: 1 });

        let indices: Vec<usize> = h
            .events
            .take()
            .into_iter()
            .filter_map(|e| match e {
                MarketEvent::BuyBid {
                    buyer_in_turn_index,
                    ..
                } => Some(buyer_in_turn_index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_termination_creates_monitor_and_freezes_funds() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;

        let stored = h.engine.game(&game).await.unwrap();
        assert!(stored.bidding_finished);
        assert_eq!(stored.nr_rounds, 1);

        let monitor = h.engine.monitor(&game).await.unwrap();
        assert_eq!(monitor.nr_pending(), 4);

        let transfers = h.engine.transfers(&game).await.unwrap();
        assert_eq!(transfers.len(), 4);
        for transfer in &transfers {
            let i = stored.buyer_index(&transfer.to).unwrap();
            let j = stored.seller_index(&transfer.from).unwrap();
            let load = 1.0 + 25.0 / 50.0;
            let expected = stored.buy_bids[i][j]
                * (stored.offers_prices[j] * load
                    + 0.02 * f64::from(stored.hop_distances[i][j]));
            assert!((transfer.cost - expected).abs() < EPS);
        }

        for buyer in ["B1", "B2"] {
            let frozen: f64 = transfers
                .iter()
                .filter(|t| t.to == pid(buyer))
                .map(|t| t.cost)
                .sum();
            let prosumer = h.engine.prosumer(&pid(buyer)).await.unwrap();
            assert!((prosumer.frozen_funds - frozen).abs() < EPS);
            assert_eq!(prosumer.account_balance, 1000.0);
        }

        let stops: Vec<MarketEvent> = h
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, MarketEvent::GameStop { .. }))
            .collect();
        assert_eq!(
            stops,
            vec![MarketEvent::GameStop {
                game: game.clone(),
                total_nr_rounds: 1,
                reason: TerminationReason::AllStopped
            }]
        );
    }

    #[tokio::test]
    async fn test_meter_reading_before_monitor() {
        let h = harness();
        let game = h.two_by_two().await;
        let result = h
            .engine
            .reconcile_meter_reading(&game, &pid("B1"), 1.0, 0.0)
            .await;
        assert_matches!(result, Err(MarketError::MonitorNotUnique { found: 0, .. }));

        // The rejected reading must not reach the prosumer
        let prosumer = h.engine.prosumer(&pid("B1")).await.unwrap();
        assert_eq!(prosumer.total_consumption, 0.0);
    }

    #[tokio::test]
    async fn test_duplicate_monitor_is_detected() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;

        let mut duplicate = EnergyDeliveryMonitor::new(&game, 2, 2);
        duplicate.id = common::MonitorId("Monitor.duplicate".to_string());
        let mut changes = ChangeSet::new();
        changes.add_monitor(duplicate);
        h.registry.commit(changes).await.unwrap();

        let reading = h
            .engine
            .reconcile_meter_reading(&game, &pid("B1"), 1.0, 0.0)
            .await;
        assert_matches!(reading, Err(MarketError::MonitorNotUnique { found: 2, .. }));
        let close = h.engine.close_market(&game).await;
        assert_matches!(close, Err(MarketError::MonitorNotUnique { found: 2, .. }));
    }

    #[tokio::test]
    async fn test_meter_reading_from_outsider() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;
        h.prosumers(&[("X", 0.0)]).await;

        let result = h
            .engine
            .reconcile_meter_reading(&game, &pid("X"), 1.0, 0.0)
            .await;
        assert_matches!(result, Err(MarketError::Rejected(Rejection::NotParticipant(_))));

        let negative = h
            .engine
            .reconcile_meter_reading(&game, &pid("B1"), -1.0, 0.0)
            .await;
        assert_matches!(
            negative,
            Err(MarketError::Rejected(Rejection::InvalidMeterReading { .. }))
        );
    }

    #[tokio::test]
    async fn test_readings_fulfill_and_move_funds() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;
        let transfers = h.engine.transfers(&game).await.unwrap();
        let cost = |from: &str, to: &str| {
            transfers
                .iter()
                .find(|t| t.from == pid(from) && t.to == pid(to))
                .map(|t| t.cost)
                .unwrap()
        };
        h.events.take();

        let e = &h.engine;
        assert!(e.reconcile_meter_reading(&game, &pid("S1"), 0.0, 25.0).await.unwrap().is_empty());
        assert!(e.reconcile_meter_reading(&game, &pid("S2"), 0.0, 25.0).await.unwrap().is_empty());
        assert_eq!(e.reconcile_meter_reading(&game, &pid("B1"), 30.0, 0.0).await.unwrap().len(), 2);
        assert_eq!(e.reconcile_meter_reading(&game, &pid("B2"), 20.0, 0.0).await.unwrap().len(), 2);

        assert_eq!(e.monitor(&game).await.unwrap().nr_pending(), 0);
        assert!(e.transfers(&game).await.unwrap().iter().all(|t| t.is_fulfilled));
        assert_eq!(h.events.len(), 4);

        let b1 = e.prosumer(&pid("B1")).await.unwrap();
        assert!((b1.account_balance - (1000.0 - cost("S1", "B1") - cost("S2", "B1"))).abs() < EPS);
        assert!(b1.frozen_funds.abs() < EPS);
        assert_eq!(b1.total_consumption, 30.0);
        assert_eq!(b1.contribution_metric, 0.0);

        let s1 = e.prosumer(&pid("S1")).await.unwrap();
        assert!((s1.account_balance - (1000.0 + cost("S1", "B1") + cost("S1", "B2"))).abs() < EPS);
        assert_eq!(s1.total_production, 25.0);
    }

    #[tokio::test]
    async fn test_close_market_skips_last_pending_transfer() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;
        let transfers = h.engine.transfers(&game).await.unwrap();
        let monitor = h.engine.monitor(&game).await.unwrap();
        let frozen_before: HashMap<ProsumerId, f64> = {
            let mut map = HashMap::new();
            for id in ["B1", "B2"] {
                map.insert(pid(id), h.engine.prosumer(&pid(id)).await.unwrap().frozen_funds);
            }
            map
        };

        // Nobody metered anything: all four transfers still pending
        let summary = h.engine.close_market(&game).await.unwrap();
        assert_eq!(summary.unfrozen_transfers, 3);
        assert_eq!(summary.still_frozen, 1);
        assert!(summary.grid_settlements.iter().all(|(_, net)| *net == 0.0));

        let last = monitor.pending_energy_transfers.last().unwrap();
        let skipped = transfers.iter().find(|t| &t.id == last).unwrap();
        for id in ["B1", "B2"] {
            let prosumer = h.engine.prosumer(&pid(id)).await.unwrap();
            let expected = if skipped.to == pid(id) { skipped.cost } else { 0.0 };
            assert!((prosumer.frozen_funds - expected).abs() < EPS);
            assert!(frozen_before[&pid(id)] >= prosumer.frozen_funds);
            assert_eq!(prosumer.account_balance, 1000.0);
        }

        assert!(h.engine.game(&game).await.unwrap().market_closed);
        assert_matches!(
            h.events.events().last(),
            Some(MarketEvent::MarketClosed {
                unfrozen_transfers: 3,
                ..
            })
        );

        let again = h.engine.close_market(&game).await;
        assert_matches!(again, Err(MarketError::Rejected(Rejection::MarketClosed(_))));
    }

    #[tokio::test]
    async fn test_close_market_applies_grid_prices_to_residuals() {
        let h = harness();
        let game = h.two_by_two().await;
        h.finish_bidding(&game).await;

        // B2 consumes beyond anything it bought, S2 exports with no buyer metered
        h.engine
            .reconcile_meter_reading(&game, &pid("B2"), 100.0, 0.0)
            .await
            .unwrap();
        h.engine
            .reconcile_meter_reading(&game, &pid("S2"), 0.0, 5.0)
            .await
            .unwrap();

        let before_b2 = h.engine.prosumer(&pid("B2")).await.unwrap().account_balance;
        let before_s2 = h.engine.prosumer(&pid("S2")).await.unwrap().account_balance;
        let monitor = h.engine.monitor(&game).await.unwrap();
        let summary = h.engine.close_market(&game).await.unwrap();

        let prices = h.engine.settings().prices;
        let b2_net = grid_net_fund(&prices, monitor.total_in_by_buyer[1], monitor.total_out_by_buyer[1]);
        let s2_net = grid_net_fund(&prices, monitor.total_in_by_seller[1], monitor.total_out_by_seller[1]);

        let b2 = h.engine.prosumer(&pid("B2")).await.unwrap();
        let s2 = h.engine.prosumer(&pid("S2")).await.unwrap();
        assert!((b2.account_balance - (before_b2 + b2_net)).abs() < EPS);
        assert!((s2.account_balance - (before_s2 + s2_net)).abs() < EPS);
        assert!(b2_net < 0.0);
        assert_eq!(summary.grid_settlements.len(), 4);

        let late = h
            .engine
            .reconcile_meter_reading(&game, &pid("B1"), 1.0, 0.0)
            .await;
        assert_matches!(late, Err(MarketError::Rejected(Rejection::MarketClosed(_))));
    }

    #[tokio::test]
    async fn test_submit_dispatches_transactions() {
        let h = harness();
        let receipt = h
            .engine
            .submit(Transaction::RegisterProsumer {
                prosumer: pid("S1"),
                account_balance: 10.0,
                contribution_metric: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(receipt, Receipt::ProsumerRegistered { prosumer: pid("S1") });

        let receipt = h
            .engine
            .submit(Transaction::PublishGame {
                timestamp: t0(),
                registration_duration_ms: None,
            })
            .await
            .unwrap();
        let Receipt::GamePublished { game } = receipt else {
            panic!("expected a published game");
        };
        let stored = h.engine.game(&game).await.unwrap();
        assert_eq!(
            stored.registration_duration_ms,
            h.engine.settings().default_registration_duration_ms
        );

        let receipt = h
            .engine
            .submit(Transaction::PublishOffer {
                timestamp: t0(),
                game,
                initiator: pid("S1"),
                amount: 5.0,
                price: 0.1,
            })
            .await
            .unwrap();
        assert_eq!(receipt, Receipt::OfferAccepted { seller_index: 0 });
    }
}
