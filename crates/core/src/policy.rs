use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Business rules of the marketplace.
///
/// Values are loaded from the environment by the engine configuration; the
/// defaults below are what a fresh deployment runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplacePolicy {
    /// Length of every generated slot
    pub slot_duration: Duration,
    /// Number of local days (starting today) that materialization covers
    pub horizon_days: u32,
    /// Minimum lead time for a slot generated inside a window that is already running
    pub generation_buffer: Duration,
    /// Fee added on top of the counselor's base price, e.g. `0.15`
    pub platform_fee_rate: Decimal,
    /// Fraction of the paid amount released to the counselor
    pub counselor_share: Decimal,
    /// Time after the slot ends before a booking auto-completes
    pub auto_complete_grace: Duration,
    pub dispute_description_min: usize,
    pub dispute_description_max: usize,
    pub dispute_max_evidence: usize,
}

impl Default for MarketplacePolicy {
    fn default() -> Self {
        Self {
            slot_duration: Duration::minutes(45),
            horizon_days: 30,
            generation_buffer: Duration::minutes(30),
            platform_fee_rate: Decimal::new(15, 2),
            counselor_share: Decimal::new(85, 2),
            auto_complete_grace: Duration::hours(24),
            dispute_description_min: 20,
            dispute_description_max: 2000,
            dispute_max_evidence: 5,
        }
    }
}

impl MarketplacePolicy {
    /// Client-facing price of a slot: base plus platform fee
    pub fn total_price(&self, base_price: Decimal) -> Decimal {
        round_money(base_price + base_price * self.platform_fee_rate)
    }

    /// Amount released to the counselor for a paid booking
    pub fn payout_amount(&self, paid: Decimal) -> Decimal {
        round_money(paid * self.counselor_share)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.slot_duration <= Duration::zero() {
            eyre::bail!("slot duration must be positive");
        }
        if self.horizon_days == 0 {
            eyre::bail!("slot horizon must cover at least one day");
        }
        if self.platform_fee_rate.is_sign_negative() {
            eyre::bail!("platform fee rate cannot be negative");
        }
        if self.counselor_share.is_sign_negative() || self.counselor_share > Decimal::ONE {
            eyre::bail!("counselor share must be between 0 and 1");
        }
        if self.dispute_description_min > self.dispute_description_max {
            eyre::bail!("dispute description bounds are inverted");
        }
        Ok(())
    }
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
