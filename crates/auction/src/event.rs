//! Market events
//!
//! Events are published after a transaction commits. Listeners receive them
//! through an [`EventEmitter`]; emission never fails the transaction.

use common::{GameId, ProsumerId, TransferId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Why the bidding phase of a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Every buyer stopped in the same round
    AllStopped,
    /// Exactly two buyers kept playing across consecutive rounds
    ViciousCircle,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::AllStopped => "all_stopped",
            TerminationReason::ViciousCircle => "vicious_circle",
        }
    }
}

/// Event published by the market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketEvent {
    /// A game opened for registration
    #[serde(rename = "GameInitEvent")]
    GameInit { game: GameId, game_id: String },

    /// A buyer is now in turn
    #[serde(rename = "BuyBidEvent")]
    BuyBid {
        game: GameId,
        buyer_in_turn: ProsumerId,
        buyer_in_turn_index: usize,
    },

    /// Bidding ended and transfers were created
    #[serde(rename = "GameStopEvent")]
    GameStop {
        game: GameId,
        total_nr_rounds: u32,
        reason: TerminationReason,
    },

    /// Metering covered a transfer and funds moved
    #[serde(rename = "TransferFulfilledEvent")]
    TransferFulfilled {
        game: GameId,
        transfer: TransferId,
        from: ProsumerId,
        to: ProsumerId,
        amount: f64,
        cost: f64,
    },

    /// Grid settlement was applied
    #[serde(rename = "MarketClosedEvent")]
    MarketClosed {
        game: GameId,
        unfrozen_transfers: usize,
    },
}

impl MarketEvent {
    /// Game the event belongs to
    pub fn game(&self) -> &GameId {
        match self {
            MarketEvent::GameInit { game, .. }
            | MarketEvent::BuyBid { game, .. }
            | MarketEvent::GameStop { game, .. }
            | MarketEvent::TransferFulfilled { game, .. }
            | MarketEvent::MarketClosed { game, .. } => game,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            MarketEvent::GameInit { .. } => "GameInitEvent",
            MarketEvent::BuyBid { .. } => "BuyBidEvent",
            MarketEvent::GameStop { .. } => "GameStopEvent",
            MarketEvent::TransferFulfilled { .. } => "TransferFulfilledEvent",
            MarketEvent::MarketClosed { .. } => "MarketClosedEvent",
        }
    }
}

/// Sink for market events
pub trait EventEmitter: Send + Sync {
    /// Publish an event. Fire-and-forget.
    fn emit(&self, event: MarketEvent);
}

/// Keeps every emitted event in memory
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<MarketEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far
    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<MarketEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: MarketEvent) {
        self.events.lock().push(event);
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: MarketEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        info!(event = event.name(), game = %event.game(), %payload, "Market event");
    }
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<MarketEvent>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MarketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: MarketEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!(event = err.0.name(), "Event listener gone, dropping event");
        }
    }
}
