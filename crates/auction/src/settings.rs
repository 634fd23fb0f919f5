//! Engine settings

use settlement::{PriceSchedule, SettlementError};

/// Parameters the engine is constructed with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSettings {
    /// Grid and transmission prices
    pub prices: PriceSchedule,
    /// Registration window for games that do not name one
    pub default_registration_duration_ms: i64,
    /// Seed for hop distance assignment, entropy when absent
    pub hop_seed: Option<u64>,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            prices: PriceSchedule::default(),
            default_registration_duration_ms: config::default_registration_duration_ms(),
            hop_seed: None,
        }
    }
}

impl MarketSettings {
    /// Build settings from the `market` section of the configuration
    pub fn from_config(market: &config::MarketConfig) -> common::Result<Self> {
        let prices = PriceSchedule::new(
            market.grid_buy_price,
            market.grid_sell_price,
            market.transmission_cost_per_hop,
        )
        .map_err(|e| {
            let field = match &e {
                SettlementError::InvalidPrice { name, .. } => *name,
                _ => "prices",
            };
            common::Error::invalid_setting(field, e.to_string())
        })?;

        if market.registration_duration_ms <= 0 {
            return Err(common::Error::invalid_setting(
                "registration_duration_ms",
                format!("must be positive, got {}", market.registration_duration_ms),
            ));
        }

        Ok(Self {
            prices,
            default_registration_duration_ms: market.registration_duration_ms,
            hop_seed: market.hop_seed,
        })
    }

    pub fn with_hop_seed(mut self, seed: u64) -> Self {
        self.hop_seed = Some(seed);
        self
    }
}
