//! Process configuration read from the environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{anyhow, Context};
use rust_decimal::Decimal;
use crate::domain::pricing::PricingPolicy;
use crate::engine::DEFAULT_RETURN_WINDOW_DAYS;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub nats_url: Option<String>,
    pub port: u16,
    pub pricing: PricingPolicy,
    pub return_window_days: i64,
    pub shipping_subject_prefix: String,
    pub provider_timeout: Duration,
    pub webhook_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = PricingPolicy::default();

        let tax_rate: Decimal = parse_or(&get, "TAX_RATE", defaults.tax_rate)?;
        if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
            return Err(anyhow!("TAX_RATE must be between 0 and 1, got {tax_rate}"));
        }
        let return_window_days = parse_or(&get, "RETURN_WINDOW_DAYS", DEFAULT_RETURN_WINDOW_DAYS)?;
        if return_window_days < 0 {
            return Err(anyhow!("RETURN_WINDOW_DAYS cannot be negative"));
        }

        Ok(Self {
            database_url: get("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: get("NATS_URL"),
            port: parse_or(&get, "PORT", 8083)?,
            pricing: PricingPolicy {
                currency: get("STORE_CURRENCY").map_or(defaults.currency, |c| c.to_ascii_uppercase()),
                tax_rate,
                free_shipping_threshold: parse_or(&get, "FREE_SHIPPING_THRESHOLD", defaults.free_shipping_threshold)?,
                flat_shipping_fee: parse_or(&get, "FLAT_SHIPPING_FEE", defaults.flat_shipping_fee)?,
            },
            return_window_days,
            shipping_subject_prefix: get("SHIPPING_SUBJECT_PREFIX").unwrap_or_else(|| "shipping".to_string()),
            provider_timeout: Duration::from_millis(parse_or(&get, "PROVIDER_TIMEOUT_MS", 5000u64)?),
            webhook_token: get("WEBHOOK_TOKEN"),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e| anyhow!("invalid {name} {raw:?}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("DATABASE_URL", "postgres://localhost/shop")]).unwrap();
        assert_eq!(cfg.port, 8083);
        assert_eq!(cfg.pricing, PricingPolicy::default());
        assert_eq!(cfg.return_window_days, 7);
        assert_eq!(cfg.provider_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.shipping_subject_prefix, "shipping");
        assert!(cfg.nats_url.is_none() && cfg.webhook_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://db/shop"), ("PORT", "9000"), ("STORE_CURRENCY", "usd"),
            ("TAX_RATE", "0.05"), ("RETURN_WINDOW_DAYS", "14"), ("WEBHOOK_TOKEN", " s3cret "),
        ]).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.pricing.currency, "USD");
        assert_eq!(cfg.pricing.tax_rate, Decimal::new(5, 2));
        assert_eq!(cfg.return_window_days, 14);
        assert_eq!(cfg.webhook_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DATABASE_URL", "x"), ("PORT", "eighty")]).is_err());
        assert!(config(&[("DATABASE_URL", "x"), ("TAX_RATE", "1.5")]).is_err());
    }
}
