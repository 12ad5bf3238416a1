use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::collections::HashSet;

/// Calendar collaborator consumed by the leg normalizer.
///
/// All dates are plain calendar dates (no time of day), so every count below is
/// independent of timezone and daylight-saving transitions.
pub trait TradingCalendar: Send + Sync {
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Trading days in `(from, to]`: the start date is excluded, the end date
    /// counted if it trades. Zero when `to <= from`.
    fn trading_days_between(&self, from: NaiveDate, to: NaiveDate) -> u32 {
        let mut count = 0u32;
        let mut day = from;
        while day < to {
            day = match day.succ_opt() {
                Some(d) => d,
                None => break,
            };
            if self.is_trading_day(day) {
                count += 1;
            }
        }
        count
    }

    /// Calendar-day difference, clamped at zero.
    fn calendar_days_between(&self, from: NaiveDate, to: NaiveDate) -> u32 {
        (to - from).num_days().max(0) as u32
    }

    /// Saturates at the representable date range instead of panicking.
    #[allow(dead_code)]
    fn add_calendar_days(&self, date: NaiveDate, n: i64) -> NaiveDate {
        let shifted = if n >= 0 {
            date.checked_add_days(Days::new(n as u64))
        } else {
            date.checked_sub_days(Days::new(n.unsigned_abs()))
        };
        shifted.unwrap_or(if n >= 0 { NaiveDate::MAX } else { NaiveDate::MIN })
    }
}

/// Years with precomputed holiday tables. Dates outside fall back to
/// computing the rules on demand.
const FIRST_YEAR: i32 = 1990;
const LAST_YEAR: i32 = 2100;

/// NYSE full-day closures: weekends plus the ten exchange holidays.
pub struct NyseCalendar {
    holidays: HashSet<NaiveDate>,
}

impl NyseCalendar {
    pub fn new() -> Self {
        let mut holidays = HashSet::with_capacity(((LAST_YEAR - FIRST_YEAR + 1) * 10) as usize);
        for year in FIRST_YEAR..=LAST_YEAR {
            holidays.extend(nyse_holidays(year));
        }
        Self { holidays }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        let year = date.year();
        if (FIRST_YEAR..=LAST_YEAR).contains(&year) {
            return self.holidays.contains(&date);
        }
        // New Year's Day falling on a Saturday is observed on Dec 31 of the prior year.
        nyse_holidays(year).contains(&date) || nyse_holidays(year + 1).contains(&date)
    }
}

impl Default for NyseCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingCalendar for NyseCalendar {
    #[inline]
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }
}

/// Holiday dates (already shifted to their observed weekday) for one year.
pub fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let fixed = |month: u32, day: u32| NaiveDate::from_ymd_opt(year, month, day).map(observed);

    let mut out: Vec<NaiveDate> = [
        fixed(1, 1),
        nth_weekday(year, 1, Weekday::Mon, 3),
        nth_weekday(year, 2, Weekday::Mon, 3),
        easter(year).and_then(|d| d.checked_sub_days(Days::new(2))),
        last_weekday(year, 5, Weekday::Mon),
        fixed(6, 19),
        fixed(7, 4),
        nth_weekday(year, 9, Weekday::Mon, 1),
        nth_weekday(year, 11, Weekday::Thu, 4),
        fixed(12, 25),
    ]
    .into_iter()
    .flatten()
    .collect();

    out.sort();
    out
}

/// Saturday holidays are observed on Friday, Sunday holidays on Monday.
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date.pred_opt().unwrap_or(date),
        Weekday::Sun => date.succ_opt().unwrap_or(date),
        _ => date,
    }
}

/// Easter Sunday, anonymous Gregorian algorithm.
fn easter(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
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
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// n-th (1-based) occurrence of `weekday` in the month.
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = first_next.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last.checked_sub_days(Days::new(back as u64))
}
