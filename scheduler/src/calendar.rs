//! A concrete `America/New_York` [`MarketCalendar`] (`spec.md` §4.4):
//! weekend/holiday detection, early-close days, and ET date/time strings.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use model::calendar::{EarlyCloseInfo, MarketCalendar};

/// NYSE-observed holidays and early closes, computed from calendar rules
/// rather than a lookup table so the calendar needs no yearly maintenance.
#[derive(Debug, Clone, Copy, Default)]
pub struct NyseCalendar;

impl NyseCalendar {
    /// New instance; stateless, so this is always the same calendar.
    pub fn new() -> Self {
        Self
    }

    fn et_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&New_York).date_naive()
    }

    fn is_holiday(&self, date: NaiveDate) -> Option<&'static str> {
        let year = date.year();
        if date == observed(NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date")) {
            return Some("New Year's Day");
        }
        if date == nth_weekday(year, 1, Weekday::Mon, 3) {
            return Some("Martin Luther King Jr. Day");
        }
        if date == nth_weekday(year, 2, Weekday::Mon, 3) {
            return Some("Washington's Birthday");
        }
        if date == good_friday(year) {
            return Some("Good Friday");
        }
        if date == last_weekday(year, 5, Weekday::Mon) {
            return Some("Memorial Day");
        }
        if year >= 2021 && date == observed(NaiveDate::from_ymd_opt(year, 6, 19).expect("valid date")) {
            return Some("Juneteenth");
        }
        if date == observed(NaiveDate::from_ymd_opt(year, 7, 4).expect("valid date")) {
            return Some("Independence Day");
        }
        if date == nth_weekday(year, 9, Weekday::Mon, 1) {
            return Some("Labor Day");
        }
        if date == nth_weekday(year, 11, Weekday::Thu, 4) {
            return Some("Thanksgiving Day");
        }
        if date == observed(NaiveDate::from_ymd_opt(year, 12, 25).expect("valid date")) {
            return Some("Christmas Day");
        }
        None
    }
}

impl MarketCalendar for NyseCalendar {
    fn is_market_open(&self, now: DateTime<Utc>) -> bool {
        let date = self.et_date(now);
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && self.is_holiday(date).is_none()
    }

    fn exit_deadline(&self, now: DateTime<Utc>) -> String {
        if self.is_early_close_day(now).is_early_close {
            "12:55".to_string()
        } else {
            "15:55".to_string()
        }
    }

    fn et_date_string(&self, now: DateTime<Utc>) -> String {
        self.et_date(now).format("%Y-%m-%d").to_string()
    }

    fn et_time_string(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&New_York).format("%H:%M").to_string()
    }

    fn is_early_close_day(&self, now: DateTime<Utc>) -> EarlyCloseInfo {
        let date = self.et_date(now);
        let year = date.year();

        let day_after_thanksgiving = nth_weekday(year, 11, Weekday::Thu, 4)
            .succ_opt()
            .expect("valid date");
        if date == day_after_thanksgiving {
            return EarlyCloseInfo {
                is_early_close: true,
                reason: Some("day after Thanksgiving".to_string()),
            };
        }

        let christmas_eve = NaiveDate::from_ymd_opt(year, 12, 24).expect("valid date");
        if date == christmas_eve && !matches!(christmas_eve.weekday(), Weekday::Sat | Weekday::Sun) {
            return EarlyCloseInfo {
                is_early_close: true,
                reason: Some("Christmas Eve".to_string()),
            };
        }

        EarlyCloseInfo { is_early_close: false, reason: None }
    }
}

/// Shift a fixed holiday observed on a weekend to the nearest weekday
/// (Saturday → preceding Friday, Sunday → following Monday).
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().expect("valid date"),
        Weekday::Sun => date.succ_opt().expect("valid date"),
        _ => date,
    }
}

/// The `nth` occurrence of `weekday` in `month`/`year` (1-indexed).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, nth: u32) -> NaiveDate {
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1).expect("valid date");
    let offset = (7 + weekday.num_days_from_monday() as i64 - first_of_month.weekday().num_days_from_monday() as i64) % 7;
    let first_occurrence = first_of_month + chrono::Duration::days(offset);
    first_occurrence + chrono::Duration::days(7 * i64::from(nth - 1))
}

/// The last occurrence of `weekday` in `month`/`year`.
fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).expect("valid date")
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).expect("valid date")
    };
    let last_of_month = next_month_first.pred_opt().expect("valid date");
    let diff = (last_of_month.weekday().num_days_from_monday() as i64 - weekday.num_days_from_monday() as i64 + 7) % 7;
    last_of_month - chrono::Duration::days(diff)
}

/// Good Friday, two days before Easter Sunday (Meeus/Jones/Butcher algorithm).
fn good_friday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    let easter = NaiveDate::from_ymd_opt(year, month as u32, day as u32).expect("valid Easter date");
    easter - chrono::Duration::days(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et_noon(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("unambiguous")
            .with_timezone(&Utc)
    }

    #[test]
    fn weekend_is_closed() {
        let calendar = NyseCalendar::new();
        // 2026-01-03 is a Saturday.
        assert!(!calendar.is_market_open(et_noon(2026, 1, 3)));
    }

    #[test]
    fn thanksgiving_is_closed_and_day_after_is_early_close() {
        let calendar = NyseCalendar::new();
        // Thanksgiving 2026 is November 26.
        assert!(!calendar.is_market_open(et_noon(2026, 11, 26)));
        let info = calendar.is_early_close_day(et_noon(2026, 11, 27));
        assert!(info.is_early_close);
        assert_eq!(calendar.exit_deadline(et_noon(2026, 11, 27)), "12:55");
    }

    #[test]
    fn ordinary_weekday_gets_normal_deadline() {
        let calendar = NyseCalendar::new();
        assert!(calendar.is_market_open(et_noon(2026, 3, 2)));
        assert_eq!(calendar.exit_deadline(et_noon(2026, 3, 2)), "15:55");
    }

    #[test]
    fn et_date_string_reflects_new_york_calendar_day() {
        let calendar = NyseCalendar::new();
        assert_eq!(calendar.et_date_string(et_noon(2026, 3, 2)), "2026-03-02");
    }

    #[test]
    fn independence_day_observed_on_preceding_friday_when_on_saturday() {
        let calendar = NyseCalendar::new();
        // July 4 2026 is a Saturday; observed on Friday July 3.
        assert!(!calendar.is_market_open(et_noon(2026, 7, 3)));
    }
}
