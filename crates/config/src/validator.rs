use crate::*;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Market name is required")]
    MissingMarketName,

    #[error("{field} must be a positive finite number, got: {value}")]
    InvalidPrice { field: String, value: f64 },

    #[error("registration_duration_ms must be positive, got: {0}")]
    InvalidRegistrationDuration(i64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Metrics port must be non-zero when metrics are enabled")]
    InvalidMetricsPort,

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_market(&config.market, &mut report);
    validate_logging(&config.logging, &mut report);
    validate_metrics(&config.metrics, &mut report);

    report
}

fn validate_market(market: &MarketConfig, report: &mut ValidationReport) {
    if market.name.trim().is_empty() {
        report.add_error(ValidationError::MissingMarketName);
    } else if has_unresolved_env_vars(&market.name) {
        report.add_error(ValidationError::InvalidEnvVar {
            var: market.name.clone(),
            message: "market.name still contains a placeholder".to_string(),
        });
    }

    for (field, value) in [
        ("market.grid_buy_price", market.grid_buy_price),
        ("market.grid_sell_price", market.grid_sell_price),
        ("market.transmission_cost_per_hop", market.transmission_cost_per_hop),
    ] {
        if !value.is_finite() || value <= 0.0 {
            report.add_error(ValidationError::InvalidPrice {
                field: field.to_string(),
                value,
            });
        }
    }

    if market.grid_sell_price <= market.grid_buy_price {
        report.add_warning(
            "market.grid_sell_price",
            "Grid sell price is not above the grid buy price; prosumers gain nothing by trading locally",
        );
    }

    if market.registration_duration_ms <= 0 {
        report.add_error(ValidationError::InvalidRegistrationDuration(
            market.registration_duration_ms,
        ));
    }

    match market.hop_seed {
        Some(seed) => report.add_default("market.hop_seed", &seed.to_string()),
        None => report.add_default("market.hop_seed", "entropy"),
    }
}

fn validate_logging(logging: &LoggingConfig, report: &mut ValidationReport) {
    let level = logging.level.to_lowercase();
    if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
        report.add_error(ValidationError::InvalidLogLevel(logging.level.clone()));
    }

    let format = logging.format.to_lowercase();
    if !["pretty", "json", "compact"].contains(&format.as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(logging.format.clone()));
    }
}

fn validate_metrics(metrics: &MetricsConfig, report: &mut ValidationReport) {
    if !metrics.enabled {
        return;
    }

    if metrics.port == 0 {
        report.add_error(ValidationError::InvalidMetricsPort);
    } else if metrics.port < 1024 {
        report.add_warning(
            "metrics.port",
            "Ports below 1024 usually require elevated privileges",
        );
    }
}
