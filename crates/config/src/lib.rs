use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

// ==================================================================================
// MARKET CONFIG
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    #[serde(default = "default_market_name")]
    pub name: String,
    /// Price the grid pays per unit of exported energy
    #[serde(default = "default_grid_buy_price")]
    pub grid_buy_price: f64,
    /// Price the grid charges per unit of imported energy
    #[serde(default = "default_grid_sell_price")]
    pub grid_sell_price: f64,
    #[serde(default = "default_transmission_cost_per_hop")]
    pub transmission_cost_per_hop: f64,
    /// Registration window used when a game does not name one
    #[serde(default = "default_registration_duration_ms")]
    pub registration_duration_ms: i64,
    /// Fixed seed for hop distance assignment
    #[serde(default)]
    pub hop_seed: Option<u64>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: default_market_name(),
            grid_buy_price: default_grid_buy_price(),
            grid_sell_price: default_grid_sell_price(),
            transmission_cost_per_hop: default_transmission_cost_per_hop(),
            registration_duration_ms: default_registration_duration_ms(),
            hop_seed: None,
        }
    }
}

// ==================================================================================
// OBSERVABILITY CONFIG
// ==================================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// pretty | json | compact
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

// ==================================================================================
// MASTER CONFIG
// ==================================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
market:
  name: "Test Market"
  grid_buy_price: 0.1
  grid_sell_price: 0.3
  transmission_cost_per_hop: 0.05
  registration_duration_ms: 30000
  hop_seed: 42
logging:
  level: debug
  format: json
metrics:
  enabled: true
  port: 9200
"#;

        let config: MasterConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.market.name, "Test Market");
        assert_eq!(config.market.grid_buy_price, 0.1);
        assert_eq!(config.market.grid_sell_price, 0.3);
        assert_eq!(config.market.transmission_cost_per_hop, 0.05);
        assert_eq!(config.market.registration_duration_ms, 30000);
        assert_eq!(config.market.hop_seed, Some(42));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9200);
    }

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let yaml = r#"
market:
  name: "Minimal"
"#;

        let config: MasterConfig = serde_yaml::from_str(yaml).expect("Failed to parse YAML");

        assert_eq!(config.market.name, "Minimal");
        assert_eq!(config.market.grid_buy_price, 0.1231);
        assert_eq!(config.market.grid_sell_price, 0.2869);
        assert_eq!(config.market.transmission_cost_per_hop, 0.02);
        assert_eq!(config.market.registration_duration_ms, 60_000);
        assert!(config.market.hop_seed.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config: MasterConfig = serde_yaml::from_str("{}").expect("Failed to parse YAML");
        assert_eq!(config.market.name, default_market_name());
    }
}
