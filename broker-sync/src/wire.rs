//! Wire protocol for the broker's market-data WebSocket (`spec.md` §4.2).

use model::market_data::{passes_sanity_band, Greeks, MarketDataCacheEntry};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// A decoded server-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The bare-string keep-alive echo.
    Tic,
    /// Plain-text payload telling the client to resend its session frame.
    WaitingForSession,
    /// `{"topic":"sts","authenticated":...}`.
    Status {
        /// Whether the WS handshake itself succeeded.
        authenticated: bool,
    },
    /// An `smd`-prefixed tick for one conid.
    Tick {
        /// Which conid this tick describes.
        conid: i64,
        /// Error text, if the broker reported a subscription error
        /// instead of field data.
        error: Option<String>,
        /// Raw field-code → value map, still string-typed.
        fields: std::collections::HashMap<String, String>,
    },
    /// Anything else — ignored by the caller but kept for diagnostics.
    Other(Value),
}

/// Parse one server frame. Bare `"tic"` and the "waiting for session"
/// notice arrive as plain text, not JSON (`spec.md` §4.2 step 2).
pub fn parse_server_message(raw: &str) -> ServerMessage {
    let trimmed = raw.trim();
    if trimmed == "tic" {
        return ServerMessage::Tic;
    }
    if trimmed.to_lowercase().contains("waiting for session") {
        return ServerMessage::WaitingForSession;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return ServerMessage::Other(Value::Null),
    };

    if value.get("topic").and_then(Value::as_str) == Some("sts") {
        let authenticated = value.get("authenticated").and_then(Value::as_bool).unwrap_or(false);
        return ServerMessage::Status { authenticated };
    }

    if let Some(conid) = value.get("conid").and_then(Value::as_i64) {
        let error = value.get("error").and_then(Value::as_str).map(str::to_string);
        let mut fields = std::collections::HashMap::new();
        if let Value::Object(map) = &value {
            for (key, v) in map {
                if key == "conid" || key == "error" || key == "topic" {
                    continue;
                }
                if let Some(s) = v.as_str() {
                    fields.insert(key.clone(), s.to_string());
                } else if let Some(n) = v.as_f64() {
                    fields.insert(key.clone(), n.to_string());
                }
            }
        }
        return ServerMessage::Tick { conid, error, fields };
    }

    ServerMessage::Other(value)
}

/// Field codes for equities (`spec.md` §4.2).
mod fields {
    pub const LAST: &str = "31";
    pub const BID: &str = "84";
    pub const ASK: &str = "86";
    pub const AFTER_HOURS_LAST: &str = "7762";
    pub const PRE_MARKET_LAST: &str = "7741";
    pub const OVERNIGHT_LAST: &str = "7682";
    pub const DELTA: &str = "7308";
    pub const GAMMA: &str = "7309";
    pub const THETA: &str = "7310";
    pub const VEGA: &str = "7633";
    pub const IV: &str = "7283";
    pub const OPEN_INTEREST: &str = "7311";
}

/// Strip a leading close/halt-status prefix (`C`, `H`) the broker attaches
/// to some price fields, returning the stripped value and whether a `C`
/// (closing price) prefix was present (`spec.md` §4.2).
fn strip_status_prefix(raw: &str) -> (&str, bool) {
    match raw.strip_prefix('C') {
        Some(rest) => (rest, true),
        None => (raw.strip_prefix('H').unwrap_or(raw), false),
    }
}

fn parse_decimal_field(raw: &str) -> Option<Decimal> {
    let (stripped, _) = strip_status_prefix(raw);
    Decimal::from_str(stripped).ok()
}

/// Apply one tick's field map onto a cache entry in place, implementing
/// the extended-hours preference and sanity-band rules from `spec.md`
/// §4.2. `symbol` drives the sanity band; pass `None` to skip the
/// extended-hours override path entirely.
pub fn apply_tick(
    entry: &mut MarketDataCacheEntry,
    symbol: Option<&str>,
    raw_fields: &std::collections::HashMap<String, String>,
    now: chrono::DateTime<chrono::Utc>,
) {
    if let Some(raw) = raw_fields.get(fields::LAST) {
        if let Some(value) = parse_decimal_field(raw) {
            entry.last = Some(value);
        }
    }
    if let Some(raw) = raw_fields.get(fields::BID) {
        entry.bid = parse_decimal_field(raw);
    }
    if let Some(raw) = raw_fields.get(fields::ASK) {
        entry.ask = parse_decimal_field(raw);
    }

    if let Some(symbol) = symbol {
        let extended_hours = [fields::AFTER_HOURS_LAST, fields::PRE_MARKET_LAST, fields::OVERNIGHT_LAST]
            .iter()
            .find_map(|code| raw_fields.get(*code).and_then(|raw| parse_decimal_field(raw)));
        if let Some(price) = extended_hours {
            if passes_sanity_band(symbol, price) {
                entry.last = Some(price);
            }
        }
    }

    let has_greeks = [fields::DELTA, fields::GAMMA, fields::THETA, fields::VEGA, fields::IV, fields::OPEN_INTEREST]
        .iter()
        .any(|code| raw_fields.contains_key(*code));
    if has_greeks {
        let mut greeks = entry.greeks.take().unwrap_or_default();
        if let Some(raw) = raw_fields.get(fields::DELTA) {
            greeks.delta = parse_decimal_field(raw);
        }
        if let Some(raw) = raw_fields.get(fields::GAMMA) {
            greeks.gamma = parse_decimal_field(raw);
        }
        if let Some(raw) = raw_fields.get(fields::THETA) {
            greeks.theta = parse_decimal_field(raw);
        }
        if let Some(raw) = raw_fields.get(fields::VEGA) {
            greeks.vega = parse_decimal_field(raw);
        }
        if let Some(raw) = raw_fields.get(fields::IV) {
            greeks.implied_vol = parse_decimal_field(raw);
        }
        if let Some(raw) = raw_fields.get(fields::OPEN_INTEREST) {
            greeks.open_interest = parse_decimal_field(raw);
        }
        entry.greeks = Some(greeks);
    }

    entry.timestamp = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::collections::HashMap;

    #[test]
    fn parses_bare_tic() {
        assert_eq!(parse_server_message("tic"), ServerMessage::Tic);
    }

    #[test]
    fn parses_status_frame() {
        let msg = parse_server_message(r#"{"topic":"sts","authenticated":true}"#);
        assert_eq!(msg, ServerMessage::Status { authenticated: true });
    }

    #[test]
    fn parses_tick_frame_from_cold_start_scenario() {
        let raw = r#"{"conid":756733,"31":"600.50","84":"600.49","86":"600.51"}"#;
        let msg = parse_server_message(raw);
        match msg {
            ServerMessage::Tick { conid, fields, error } => {
                assert_eq!(conid, 756733);
                assert_eq!(fields.get("31"), Some(&"600.50".to_string()));
                assert!(error.is_none());
            }
            other => panic!("expected Tick, got {other:?}"),
        }
    }

    #[test]
    fn apply_tick_sets_last_bid_ask() {
        let mut entry = MarketDataCacheEntry::new(756733, DateTime::<chrono::Utc>::MIN_UTC);
        let mut raw = HashMap::new();
        raw.insert("31".to_string(), "600.50".to_string());
        raw.insert("84".to_string(), "600.49".to_string());
        raw.insert("86".to_string(), "600.51".to_string());
        let now = DateTime::<chrono::Utc>::MIN_UTC + chrono::Duration::seconds(1);
        apply_tick(&mut entry, Some("SPY"), &raw, now);
        assert_eq!(entry.last, Some(Decimal::from_str("600.50").unwrap()));
        assert_eq!(entry.timestamp, now);
    }

    #[test]
    fn closing_price_prefix_is_stripped() {
        let mut entry = MarketDataCacheEntry::new(1, DateTime::<chrono::Utc>::MIN_UTC);
        let mut raw = HashMap::new();
        raw.insert("31".to_string(), "C123.45".to_string());
        apply_tick(&mut entry, None, &raw, DateTime::<chrono::Utc>::MIN_UTC);
        assert_eq!(entry.last, Some(Decimal::from_str("123.45").unwrap()));
    }

    #[test]
    fn out_of_band_extended_hours_price_is_rejected() {
        let mut entry = MarketDataCacheEntry::new(1, DateTime::<chrono::Utc>::MIN_UTC);
        entry.last = Some(Decimal::from(600));
        let mut raw = HashMap::new();
        raw.insert("31".to_string(), "600.00".to_string());
        raw.insert(fields::AFTER_HOURS_LAST.to_string(), "99999".to_string());
        apply_tick(&mut entry, Some("SPY"), &raw, DateTime::<chrono::Utc>::MIN_UTC);
        assert_eq!(entry.last, Some(Decimal::from_str("600.00").unwrap()));
    }
}
