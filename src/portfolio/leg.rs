use crate::errors::{EngineError, EngineResult};
use crate::models::OptionType;
use chrono::NaiveDate;
use smallvec::SmallVec;

/// Contracts are quoted per share; one contract covers this many shares.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// How a group's cost basis is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Tracks a filled position: cost is pinned to the entered fill price.
    Active,
    /// "What would it cost to enter today": cost floats to the live quote or
    /// present-day fair value.
    #[default]
    Trial,
}

impl std::fmt::Display for ViewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Trial => write!(f, "trial"),
        }
    }
}

/// A single option position. Validated on construction and on deserialization,
/// so every downstream reader may assume `strike > 0` and `implied_volatility > 0`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawLeg", rename_all = "camelCase")]
pub struct Leg {
    pub id: String,
    #[serde(rename = "type")]
    pub option_type: OptionType,
    /// Signed contracts (negative = short)
    pub position: i32,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub implied_volatility: f64,
    /// Historical fill per share; 0 means unfilled
    pub entered_cost: f64,
    /// Most recent observed market price per share
    pub live_quote: Option<f64>,
}

impl Leg {
    /// Live quote usable as a price: present, finite and strictly positive.
    #[inline]
    pub fn usable_quote(&self) -> Option<f64> {
        self.live_quote.filter(|q| q.is_finite() && *q > 0.0)
    }

    #[inline]
    pub fn position_multiplier(&self) -> f64 {
        self.position as f64 * CONTRACT_MULTIPLIER
    }

    fn validate(&self) -> EngineResult<()> {
        if !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(EngineError::InvalidLeg(format!(
                "strike must be positive, got {}",
                self.strike
            )));
        }
        if !self.implied_volatility.is_finite() || self.implied_volatility <= 0.0 {
            return Err(EngineError::InvalidLeg(format!(
                "implied volatility must be positive, got {}",
                self.implied_volatility
            )));
        }
        if !self.entered_cost.is_finite() || self.entered_cost < 0.0 {
            return Err(EngineError::InvalidLeg(format!(
                "entered cost must be non-negative, got {}",
                self.entered_cost
            )));
        }
        if let Some(q) = self.live_quote {
            if !q.is_finite() {
                return Err(EngineError::InvalidLeg("live quote must be finite".into()));
            }
        }
        Ok(())
    }
}

/// Wire shape before validation.
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLeg {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    option_type: OptionType,
    position: i32,
    strike: f64,
    expiry: NaiveDate,
    implied_volatility: f64,
    #[serde(default)]
    entered_cost: f64,
    #[serde(default)]
    live_quote: Option<f64>,
}

impl TryFrom<RawLeg> for Leg {
    type Error = EngineError;

    fn try_from(raw: RawLeg) -> Result<Self, Self::Error> {
        let leg = Leg {
            id: raw
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            option_type: raw.option_type,
            position: raw.position,
            strike: raw.strike,
            expiry: raw.expiry,
            implied_volatility: raw.implied_volatility,
            entered_cost: raw.entered_cost,
            live_quote: raw.live_quote,
        };
        leg.validate()?;
        Ok(leg)
    }
}

/// Builders for fixtures.
#[cfg(test)]
impl Leg {
    pub fn new(
        option_type: OptionType,
        position: i32,
        strike: f64,
        expiry: NaiveDate,
        implied_volatility: f64,
    ) -> EngineResult<Self> {
        let leg = Self {
            id: uuid::Uuid::new_v4().to_string(),
            option_type,
            position,
            strike,
            expiry,
            implied_volatility,
            entered_cost: 0.0,
            live_quote: None,
        };
        leg.validate()?;
        Ok(leg)
    }

    pub fn with_entered_cost(mut self, cost: f64) -> EngineResult<Self> {
        self.entered_cost = cost;
        self.validate()?;
        Ok(self)
    }

    pub fn with_live_quote(mut self, quote: f64) -> EngineResult<Self> {
        self.live_quote = Some(quote);
        self.validate()?;
        Ok(self)
    }
}

/// One combo strategy on a single underlying.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default)]
    pub name: String,
    pub ticker: String,
    #[serde(default)]
    pub view_mode: ViewMode,
    pub legs: SmallVec<[Leg; 4]>,
}

#[cfg(test)]
impl Group {
    pub fn new(name: &str, ticker: &str, view_mode: ViewMode) -> Self {
        Self {
            name: name.to_string(),
            ticker: ticker.to_string(),
            view_mode,
            legs: SmallVec::new(),
        }
    }

    pub fn with_leg(mut self, leg: Leg) -> Self {
        self.legs.push(leg);
        self
    }
}

impl Group {
    pub fn leg_mut(&mut self, id: &str) -> Option<&mut Leg> {
        self.legs.iter_mut().find(|l| l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 20).unwrap()
    }

    #[test]
    fn test_rejects_bad_strike_and_iv() {
        assert!(Leg::new(OptionType::Call, 1, 0.0, expiry(), 0.2).is_err());
        assert!(Leg::new(OptionType::Call, 1, -5.0, expiry(), 0.2).is_err());
        assert!(Leg::new(OptionType::Put, 1, 100.0, expiry(), 0.0).is_err());
        assert!(Leg::new(OptionType::Put, 1, 100.0, expiry(), f64::NAN).is_err());
        assert!(Leg::new(OptionType::Put, -2, 100.0, expiry(), 0.25).is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok = r#"{"type":"call","position":-1,"strike":100,"expiry":"2025-06-20","impliedVolatility":0.2}"#;
        let leg: Leg = serde_json::from_str(ok).unwrap();
        assert_eq!(leg.option_type, OptionType::Call);
        assert_eq!(leg.entered_cost, 0.0);
        assert!(!leg.id.is_empty());

        let bad = r#"{"type":"put","position":1,"strike":-3,"expiry":"2025-06-20","impliedVolatility":0.2}"#;
        let err = serde_json::from_str::<Leg>(bad).unwrap_err();
        assert!(err.to_string().contains("strike"));
    }

    #[test]
    fn test_usable_quote_ignores_non_positive() {
        let leg = Leg::new(OptionType::Call, 1, 100.0, expiry(), 0.2).unwrap();
        assert_eq!(leg.usable_quote(), None);
        let leg = leg.with_live_quote(0.0).unwrap();
        assert_eq!(leg.usable_quote(), None);
        let leg = leg.with_live_quote(4.5).unwrap();
        assert_eq!(leg.usable_quote(), Some(4.5));
    }

    #[test]
    fn test_position_multiplier() {
        let leg = Leg::new(OptionType::Put, -3, 100.0, expiry(), 0.2).unwrap();
        assert_eq!(leg.position_multiplier(), -300.0);
    }

    #[test]
    fn test_group_roundtrip_keeps_ids() {
        let leg = Leg::new(OptionType::Call, 1, 100.0, expiry(), 0.2).unwrap();
        let id = leg.id.clone();
        let group = Group::new("cc", "SPY", ViewMode::Active).with_leg(leg);
        let json = serde_json::to_string(&group).unwrap();
        let back: Group = serde_json::from_str(&json).unwrap();
        assert_eq!(back.legs[0].id, id);
        assert_eq!(back.view_mode, ViewMode::Active);
    }
}
