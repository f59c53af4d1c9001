use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which kind of instrument a [`Subscription`] covers.
///
/// Kept as a tag rather than two separate subscription types because the
/// broker reuses numeric field codes across both (`spec.md` §9 open
/// question on `open_interest`/`prevClose`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// A listed equity.
    Stock,
    /// A listed option contract.
    Option,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstrumentKind::Stock => "stock",
            InstrumentKind::Option => "option",
        })
    }
}

/// Default field-code set for equities (`spec.md` §4.2).
pub const STOCK_FIELDS: &[&str] = &["31", "84", "86", "7682", "7741", "7762"];

/// Default field-code set for options (`spec.md` §4.2).
pub const OPTION_FIELDS: &[&str] = &["31", "84", "86", "7308", "7309", "7310", "7633", "7283", "7311"];

/// A per-conid subscription held by the WS streamer.
///
/// Invariant: at most one subscription per conid; the full set is replayed
/// on every successful reconnect (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Broker contract id.
    pub conid: i64,
    /// Display symbol, when known (not required to send the frame).
    pub symbol: Option<String>,
    /// Stock or option; selects the default field-code set.
    pub kind: InstrumentKind,
    /// Field codes requested for this conid.
    pub fields: BTreeSet<String>,
}

impl Subscription {
    /// A new subscription using the default field set for `kind`.
    pub fn new(conid: i64, symbol: Option<String>, kind: InstrumentKind) -> Self {
        let defaults = match kind {
            InstrumentKind::Stock => STOCK_FIELDS,
            InstrumentKind::Option => OPTION_FIELDS,
        };
        Self {
            conid,
            symbol,
            kind,
            fields: defaults.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// The `smd+<conid>+{...}` subscribe frame body (`spec.md` §4.2).
    pub fn subscribe_frame(&self) -> String {
        let fields_json = serde_json::to_string(&self.fields).unwrap_or_default();
        format!("smd+{}+{{\"fields\":{fields_json}}}", self.conid)
    }

    /// The `umd+<conid>+{...}` unsubscribe frame body.
    pub fn unsubscribe_frame(&self) -> String {
        let fields_json = serde_json::to_string(&self.fields).unwrap_or_default();
        format!("umd+{}+{{\"fields\":{fields_json}}}", self.conid)
    }
}

/// Per-instrument options Greeks, present only for `Option` subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Greeks {
    /// Option delta.
    pub delta: Option<Decimal>,
    /// Option gamma.
    pub gamma: Option<Decimal>,
    /// Option theta.
    pub theta: Option<Decimal>,
    /// Option vega.
    pub vega: Option<Decimal>,
    /// Implied volatility.
    pub implied_vol: Option<Decimal>,
    /// Open interest.
    pub open_interest: Option<Decimal>,
}

/// Cached state for one conid (`spec.md` §3 "MarketDataCache entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataCacheEntry {
    /// Broker contract id this entry caches.
    pub conid: i64,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Equities only: session high.
    pub day_high: Option<Decimal>,
    /// Equities only: session low.
    pub day_low: Option<Decimal>,
    /// Equities only: session open.
    pub open: Option<Decimal>,
    /// Equities only: previous session close.
    pub prev_close: Option<Decimal>,
    /// Options only: Greeks/IV/OI bundle.
    pub greeks: Option<Greeks>,
    /// Wall-clock time the last tick for this conid was processed.
    pub timestamp: DateTime<Utc>,
}

impl MarketDataCacheEntry {
    /// A cache entry for a conid that just produced its first tick.
    pub fn new(conid: i64, now: DateTime<Utc>) -> Self {
        Self {
            conid,
            last: None,
            bid: None,
            ask: None,
            day_high: None,
            day_low: None,
            open: None,
            prev_close: None,
            greeks: None,
            timestamp: now,
        }
    }

    /// `isFresh(d)` from `spec.md` §3: `now - timestamp < d`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.timestamp < max_age
    }

    /// Age of this entry relative to `now`, in milliseconds.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_milliseconds().max(0)
    }

    /// VIX-style fallback: mid of bid/ask when `last` is absent
    /// (`spec.md` §8 boundary behavior).
    pub fn effective_last(&self) -> Option<Decimal> {
        self.last.or_else(|| match (self.bid, self.ask) {
            (Some(b), Some(a)) if b > Decimal::ZERO && a > Decimal::ZERO => {
                Some((b + a) / Decimal::from(2))
            }
            _ => None,
        })
    }
}

/// Per-symbol sanity band used to validate extended-hours price fields
/// before they're allowed to override the primary price (`spec.md` §4.2).
pub fn sanity_band(symbol: &str) -> (Decimal, Decimal) {
    match symbol {
        "SPY" => (Decimal::from(100), Decimal::from(2000)),
        "VIX" => (Decimal::from(5), Decimal::from(100)),
        _ => (Decimal::ZERO, Decimal::from(10000)),
    }
}

/// True when `price` falls inside `symbol`'s sanity band.
pub fn passes_sanity_band(symbol: &str, price: Decimal) -> bool {
    let (lo, hi) = sanity_band(symbol);
    price > lo && price < hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn subscription_default_fields_match_kind() {
        let stock = Subscription::new(756733, Some("SPY".into()), InstrumentKind::Stock);
        assert!(stock.fields.contains("31"));
        assert!(!stock.fields.contains("7308"));

        let option = Subscription::new(1, None, InstrumentKind::Option);
        assert!(option.fields.contains("7308"));
    }

    #[test]
    fn cache_entry_uses_mid_when_last_missing() {
        let mut entry = MarketDataCacheEntry::new(1, DateTime::<Utc>::MIN_UTC);
        entry.bid = Some(dec!(19.5));
        entry.ask = Some(dec!(20.5));
        assert_eq!(entry.effective_last(), Some(dec!(20.0)));
    }

    #[test]
    fn spy_sanity_band_rejects_out_of_range() {
        assert!(!passes_sanity_band("SPY", Decimal::from(99)));
        assert!(passes_sanity_band("SPY", Decimal::from(600)));
        assert!(!passes_sanity_band("SPY", Decimal::from(2001)));
    }

    #[test]
    fn freshness_is_strict_less_than() {
        let now = DateTime::<Utc>::MIN_UTC + chrono::Duration::seconds(60);
        let entry = MarketDataCacheEntry::new(1, DateTime::<Utc>::MIN_UTC);
        assert!(!entry.is_fresh(now, chrono::Duration::seconds(60)));
        assert!(entry.is_fresh(now + chrono::Duration::milliseconds(-1), chrono::Duration::seconds(60)));
    }
}
