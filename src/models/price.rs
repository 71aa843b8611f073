use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A monetary amount held in fixed point with two decimal places.
///
/// Stored documents carry prices as plain JSON numbers; on the way in they are
/// rounded to cents so aggregated history never accumulates float drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(Decimal);

impl Price {
    pub const SCALE: u32 = 2;

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(Self::SCALE))
    }

    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, Self::SCALE))
    }

    pub fn from_f64(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        Decimal::from_f64(amount).map(Self::new)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// True for amounts a retailer could actually charge. Zero and negative
    /// values come from price elements that were present but unreadable.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = f64::deserialize(deserializer)?;
        Price::from_f64(amount)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid price amount: {}", amount)))
    }
}
