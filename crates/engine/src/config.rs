//! # Engine Configuration
//!
//! Marketplace rules and provider endpoints, read from the environment:
//!
//! - `SERVICE_TIMEZONE`: IANA name all availability is written in (default: "Asia/Kolkata")
//! - `SLOT_DURATION_MINUTES` (default: 45)
//! - `SLOT_HORIZON_DAYS` (default: 30)
//! - `SLOT_GENERATION_BUFFER_MINUTES` (default: 30)
//! - `PLATFORM_FEE_RATE` (default: 0.15)
//! - `COUNSELOR_SHARE` (default: 0.85)
//! - `AUTO_COMPLETE_GRACE_HOURS` (default: 24)
//! - `MEETING_API_URL`: base URL of the meeting-room provider (required)
//! - `MEETING_API_KEY`: bearer token for the provider (required)
//! - `EVIDENCE_DIR`: directory dispute evidence is written to (default: "./evidence")
//! - `EVIDENCE_PUBLIC_URL`: URL prefix the evidence directory is served from

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use counselhub_core::{MarketplacePolicy, ServiceCalendar};
use eyre::{Result, WrapErr};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub calendar: ServiceCalendar,
    pub policy: MarketplacePolicy,
    pub meeting_api_url: String,
    pub meeting_api_key: String,
    pub evidence_dir: PathBuf,
    pub evidence_public_url: String,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let timezone = env::var("SERVICE_TIMEZONE").unwrap_or_else(|_| "Asia/Kolkata".to_string());
        let calendar = ServiceCalendar::from_name(&timezone)?;

        let defaults = MarketplacePolicy::default();
        let policy = MarketplacePolicy {
            slot_duration: Duration::minutes(parse_var("SLOT_DURATION_MINUTES", 45)?),
            horizon_days: parse_var("SLOT_HORIZON_DAYS", defaults.horizon_days)?,
            generation_buffer: Duration::minutes(parse_var("SLOT_GENERATION_BUFFER_MINUTES", 30)?),
            platform_fee_rate: parse_var("PLATFORM_FEE_RATE", defaults.platform_fee_rate)?,
            counselor_share: parse_var("COUNSELOR_SHARE", defaults.counselor_share)?,
            auto_complete_grace: Duration::hours(parse_var("AUTO_COMPLETE_GRACE_HOURS", 24)?),
            ..defaults
        };
        policy.validate().wrap_err("Invalid marketplace policy")?;

        let meeting_api_url =
            env::var("MEETING_API_URL").wrap_err("MEETING_API_URL environment variable must be set")?;
        let meeting_api_key =
            env::var("MEETING_API_KEY").wrap_err("MEETING_API_KEY environment variable must be set")?;

        let evidence_dir = PathBuf::from(env::var("EVIDENCE_DIR").unwrap_or_else(|_| "./evidence".to_string()));
        let evidence_public_url =
            env::var("EVIDENCE_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000/evidence".to_string());

        Ok(Self {
            calendar,
            policy,
            meeting_api_url,
            meeting_api_key,
            evidence_dir,
            evidence_public_url,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre::eyre!("Invalid {} value {:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}
