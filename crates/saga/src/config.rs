//! Coordinator configuration loaded from environment variables.

use std::str::FromStr;

use domain::Money;
use rust_decimal::Decimal;

const DEFAULT_TAX_RATE_BASIS_POINTS: i64 = 800;
const DEFAULT_SHIPPING_CENTS: i64 = 999;
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_SIDE_EFFECT_QUEUE: usize = 256;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Coordinator settings with sensible defaults.
///
/// Reads from environment variables:
/// - `ORDERS_FALLBACK_TAX_RATE`: rate used when the tax service fails (default: `0.08`)
/// - `ORDERS_FALLBACK_SHIPPING`: amount used when the shipping service fails (default: `9.99`)
/// - `ORDERS_DEFAULT_CURRENCY`: currency for requests that leave it empty (default: `"USD"`)
/// - `ORDERS_SIDE_EFFECT_QUEUE`: capacity of the notification queue (default: `256`)
/// - `ORDERS_LOG_JSON`: emit JSON log lines when `true` (default: `false`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub fallback_tax_rate: Decimal,
    pub fallback_shipping: Money,
    pub default_currency: String,
    pub side_effect_queue: usize,
    pub json_logs: bool,
    pub log_level: String,
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Unparseable values are ignored in favour of the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            fallback_tax_rate: parse_var(&lookup, "ORDERS_FALLBACK_TAX_RATE")
                .filter(|rate: &Decimal| !rate.is_sign_negative())
                .unwrap_or(defaults.fallback_tax_rate),
            fallback_shipping: lookup("ORDERS_FALLBACK_SHIPPING")
                .and_then(|v| Money::from_str(v.trim()).ok())
                .filter(|amount| !amount.is_negative())
                .unwrap_or(defaults.fallback_shipping),
            default_currency: lookup("ORDERS_DEFAULT_CURRENCY")
                .map(|v| v.trim().to_ascii_uppercase())
                .filter(|v| v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic()))
                .unwrap_or(defaults.default_currency),
            side_effect_queue: parse_var(&lookup, "ORDERS_SIDE_EFFECT_QUEUE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.side_effect_queue),
            json_logs: parse_var(&lookup, "ORDERS_LOG_JSON").unwrap_or(defaults.json_logs),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fallback_tax_rate: Decimal::new(DEFAULT_TAX_RATE_BASIS_POINTS, 4),
            fallback_shipping: Money::from_cents(DEFAULT_SHIPPING_CENTS),
            default_currency: DEFAULT_CURRENCY.to_string(),
            side_effect_queue: DEFAULT_SIDE_EFFECT_QUEUE,
            json_logs: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> CoordinatorConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoordinatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.fallback_tax_rate, Decimal::from_str("0.08").unwrap());
        assert_eq!(config.fallback_shipping, Money::from_str("9.99").unwrap());
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.side_effect_queue, 256);
        assert!(!config.json_logs);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("ORDERS_FALLBACK_TAX_RATE", "0.2"),
            ("ORDERS_FALLBACK_SHIPPING", "4.50"),
            ("ORDERS_DEFAULT_CURRENCY", "eur"),
            ("ORDERS_SIDE_EFFECT_QUEUE", "8"),
            ("ORDERS_LOG_JSON", "true"),
            ("RUST_LOG", "debug"),
        ]);
        assert_eq!(config.fallback_tax_rate, Decimal::from_str("0.2").unwrap());
        assert_eq!(config.fallback_shipping, Money::from_cents(450));
        assert_eq!(config.default_currency, "EUR");
        assert_eq!(config.side_effect_queue, 8);
        assert!(config.json_logs);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("ORDERS_FALLBACK_TAX_RATE", "lots"),
            ("ORDERS_FALLBACK_SHIPPING", "-1"),
            ("ORDERS_DEFAULT_CURRENCY", "DOLLARS"),
            ("ORDERS_SIDE_EFFECT_QUEUE", "0"),
        ]);
        let defaults = CoordinatorConfig::default();
        assert_eq!(config.fallback_tax_rate, defaults.fallback_tax_rate);
        assert_eq!(config.fallback_shipping, defaults.fallback_shipping);
        assert_eq!(config.default_currency, "USD");
        assert_eq!(config.side_effect_queue, 256);
    }
}
