pub fn default_market_name() -> String {
    "Neighbourhood Energy Market".to_string()
}

// Market pricing defaults
pub fn default_grid_buy_price() -> f64 {
    0.1231
}

pub fn default_grid_sell_price() -> f64 {
    0.2869
}

pub fn default_transmission_cost_per_hop() -> f64 {
    0.02
}

pub fn default_registration_duration_ms() -> i64 {
    60_000
}

// Observability defaults
pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_enabled() -> bool {
    false
}

pub fn default_metrics_port() -> u16 {
    9100
}
