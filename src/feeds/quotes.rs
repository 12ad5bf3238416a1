use crate::portfolio::leg::Group;
use std::collections::HashMap;

/// One push from the market-data bridge. Keys of `options` are leg ids.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    #[serde(default)]
    pub underlying_price: Option<f64>,
    #[serde(default)]
    pub options: HashMap<String, OptionQuote>,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct OptionQuote {
    #[serde(default)]
    pub mark: Option<f64>,
    #[serde(default)]
    pub iv: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteApplication {
    pub underlying_price: Option<f64>,
    pub legs_updated: usize,
}

#[inline]
fn usable(x: Option<f64>) -> Option<f64> {
    x.filter(|v| v.is_finite() && *v > 0.0)
}

/// Fold a bridge update into a group. Marks become live quotes and quoted IVs
/// replace the leg's IV; anything non-positive or non-finite is ignored, as
/// are ids that match no leg.
pub fn apply_quote_update(group: &mut Group, update: &QuoteUpdate) -> QuoteApplication {
    let mut legs_updated = 0;
    for (id, quote) in &update.options {
        let Some(leg) = group.leg_mut(id) else {
            tracing::debug!(leg_id = %id, "quote for unknown leg ignored");
            continue;
        };
        let mut touched = false;
        if let Some(mark) = usable(quote.mark) {
            leg.live_quote = Some(mark);
            touched = true;
        }
        if let Some(iv) = usable(quote.iv) {
            leg.implied_volatility = iv;
            touched = true;
        }
        if touched {
            legs_updated += 1;
        }
    }

    QuoteApplication {
        underlying_price: usable(update.underlying_price),
        legs_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptionType;
    use crate::portfolio::leg::{Leg, ViewMode};
    use chrono::NaiveDate;

    fn group() -> (Group, String, String) {
        let exp = NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let a = Leg::new(OptionType::Call, 1, 100.0, exp, 0.2).unwrap();
        let b = Leg::new(OptionType::Put, -1, 95.0, exp, 0.25).unwrap();
        let (ia, ib) = (a.id.clone(), b.id.clone());
        (Group::new("g", "SPY", ViewMode::Trial).with_leg(a).with_leg(b), ia, ib)
    }

    #[test]
    fn test_applies_marks_and_ivs() {
        let (mut g, a, b) = group();
        let raw = format!(
            r#"{{"underlyingPrice": 101.5, "options": {{"{a}": {{"mark": 3.2, "iv": 0.22}}, "{b}": {{"mark": 1.1}}}}}}"#
        );
        let update: QuoteUpdate = serde_json::from_str(&raw).unwrap();
        let applied = apply_quote_update(&mut g, &update);
        assert_eq!(applied, QuoteApplication { underlying_price: Some(101.5), legs_updated: 2 });
        assert_eq!(g.legs[0].live_quote, Some(3.2));
        assert_eq!(g.legs[0].implied_volatility, 0.22);
        assert_eq!(g.legs[1].live_quote, Some(1.1));
        assert_eq!(g.legs[1].implied_volatility, 0.25);
    }

    #[test]
    fn test_ignores_unknown_ids_and_bad_values() {
        let (mut g, a, _) = group();
        let mut update = QuoteUpdate { underlying_price: Some(f64::NAN), ..Default::default() };
        update.options.insert("nope".into(), OptionQuote { mark: Some(5.0), iv: Some(0.3) });
        update.options.insert(a, OptionQuote { mark: Some(0.0), iv: Some(-0.1) });
        let applied = apply_quote_update(&mut g, &update);
        assert_eq!(applied.legs_updated, 0);
        assert_eq!(applied.underlying_price, None);
        assert_eq!(g.legs[0].live_quote, None);
        assert_eq!(g.legs[0].implied_volatility, 0.2);
    }

    #[test]
    fn test_null_underlying_parses() {
        let update: QuoteUpdate = serde_json::from_str(r#"{"underlyingPrice": null, "options": {}}"#).unwrap();
        assert!(update.underlying_price.is_none());
        assert!(serde_json::from_str::<QuoteUpdate>("not json").is_err());
    }
}
