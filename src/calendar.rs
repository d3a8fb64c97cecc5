//! Bikram Sambat (BS) <-> Gregorian (AD) conversion.
//!
//! The public string functions never fail loudly: anything that cannot be
//! converted comes back as an empty string, because they run on every edit of a
//! date input. The `*_date` variants expose the typed error for callers that
//! want it.

use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bs_table::{self, BS_FIRST_YEAR};
use crate::error::ConversionError;

/// Years accepted by [`is_valid_ad_date`]. Dates inside the window must also
/// fall within [`bs_table::ad_span`] (AD 1913-04-13 ..= 2034-04-13).
pub const AD_YEAR_WINDOW: std::ops::RangeInclusive<i32> = 1913..=2034;

static STRICT_ISO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{4})-([0-9]{2})-([0-9]{2})$").expect("static pattern"));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub enum Calendar {
    #[n(0)]
    Bs,
    #[n(1)]
    Ad,
}

/// A date tagged with the calendar it belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub struct CalendarDate {
    #[n(0)]
    pub calendar: Calendar,
    #[n(1)]
    pub year: i32,
    #[n(2)]
    pub month: u32,
    #[n(3)]
    pub day: u32,
}

impl CalendarDate {
    pub fn bs(year: i32, month: u32, day: u32) -> Self {
        Self {
            calendar: Calendar::Bs,
            year,
            month,
            day,
        }
    }

    pub fn ad(year: i32, month: u32, day: u32) -> Self {
        Self {
            calendar: Calendar::Ad,
            year,
            month,
            day,
        }
    }

    /// Checks the day against the month-length rules of the date's calendar.
    pub fn validate(&self) -> Result<(), ConversionError> {
        if !(1..=12).contains(&self.month) {
            return Err(ConversionError::MonthOutOfRange { month: self.month });
        }
        let out_of_range = ConversionError::DayOutOfRange {
            year: self.year,
            month: self.month,
            day: self.day,
        };
        match self.calendar {
            Calendar::Bs => {
                let days = bs_table::month_days(self.year, self.month)
                    .ok_or(ConversionError::TableMiss(self.year))?;
                if self.day == 0 || self.day > days {
                    return Err(out_of_range);
                }
            }
            Calendar::Ad => {
                if NaiveDate::from_ymd_opt(self.year, self.month, self.day).is_none() {
                    return Err(out_of_range);
                }
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        match self.calendar {
            Calendar::Ad => NaiveDate::from_ymd_opt(self.year, self.month, self.day),
            Calendar::Bs => None,
        }
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        CalendarDate::ad(value.year(), value.month(), value.day())
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Input accepted by [`bs_to_ad`]: typed text or a date-picker selection.
#[derive(Debug, Clone, Copy)]
pub enum BsInput<'a> {
    Text(&'a str),
    Date(CalendarDate),
}

impl<'a> From<&'a str> for BsInput<'a> {
    fn from(value: &'a str) -> Self {
        BsInput::Text(value)
    }
}

impl<'a> From<&'a String> for BsInput<'a> {
    fn from(value: &'a String) -> Self {
        BsInput::Text(value.as_str())
    }
}

impl From<CalendarDate> for BsInput<'_> {
    fn from(value: CalendarDate) -> Self {
        BsInput::Date(value)
    }
}

fn devanagari_to_latin(c: char) -> char {
    match c {
        '\u{0966}'..='\u{096F}' => {
            char::from_digit(u32::from(c) - 0x0966, 10).unwrap_or(c)
        }
        other => other,
    }
}

/// Canonicalises BS text to `YYYY-MM-DD`, or returns `""` when it cannot.
///
/// Devanagari digits are mapped to Latin ones, everything except digits and
/// `-`/`/` separators is dropped. Accepts `YYYYMMDD` or `YYYY-M-D` / `YYYY/M/D`.
/// Month and day values are not range checked here.
pub fn normalize_bs_text(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(devanagari_to_latin)
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '/')
        .map(|c| if c == '/' { '-' } else { c })
        .collect();

    if cleaned.len() == 8 && cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return format!("{}-{}-{}", &cleaned[0..4], &cleaned[4..6], &cleaned[6..8]);
    }

    let parts: Vec<&str> = cleaned.split('-').collect();
    match parts.as_slice() {
        [y, m, d] if y.len() == 4 && (1..=2).contains(&m.len()) && (1..=2).contains(&d.len()) => {
            format!("{y}-{m:0>2}-{d:0>2}")
        }
        _ => String::new(),
    }
}

fn parse_canonical(normalized: &str, calendar: Calendar) -> Result<CalendarDate, ConversionError> {
    let malformed = || ConversionError::Malformed(normalized.to_string());
    let parts: Vec<&str> = normalized.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return Err(malformed());
    };
    let year: i32 = year.parse().map_err(|_| malformed())?;
    let month: u32 = month.parse().map_err(|_| malformed())?;
    let day: u32 = day.parse().map_err(|_| malformed())?;
    Ok(CalendarDate {
        calendar,
        year,
        month,
        day,
    })
}

/// Parses BS text (any form [`normalize_bs_text`] accepts) into a BS date.
pub fn parse_bs(raw: &str) -> Result<CalendarDate, ConversionError> {
    let normalized = normalize_bs_text(raw);
    if normalized.is_empty() {
        return Err(ConversionError::Malformed(raw.to_string()));
    }
    let date = parse_canonical(&normalized, Calendar::Bs)?;
    date.validate()?;
    Ok(date)
}

/// Parses strict `YYYY-MM-DD` AD text that the month table can convert.
pub fn parse_ad(raw: &str) -> Result<NaiveDate, ConversionError> {
    let caps = STRICT_ISO
        .captures(raw)
        .ok_or_else(|| ConversionError::Malformed(raw.to_string()))?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
    let year: i32 = field(1)
        .parse()
        .map_err(|_| ConversionError::Malformed(raw.to_string()))?;
    let month: u32 = field(2)
        .parse()
        .map_err(|_| ConversionError::Malformed(raw.to_string()))?;
    let day: u32 = field(3)
        .parse()
        .map_err(|_| ConversionError::Malformed(raw.to_string()))?;
    if !AD_YEAR_WINDOW.contains(&year) {
        return Err(ConversionError::YearOutOfRange(year));
    }
    let date = CalendarDate::ad(year, month, day);
    date.validate()?;
    let date = date
        .to_naive()
        .ok_or(ConversionError::DayOutOfRange { year, month, day })?;
    let (first, last) = bs_table::ad_span().ok_or(ConversionError::TableMiss(BS_FIRST_YEAR))?;
    if date < first || date > last {
        return Err(ConversionError::YearOutOfRange(year));
    }
    Ok(date)
}

/// Converts a BS date to AD by counting days from the BS 1970-01-01 epoch.
pub fn bs_to_ad_date(bs: CalendarDate) -> Result<NaiveDate, ConversionError> {
    let bs = CalendarDate {
        calendar: Calendar::Bs,
        ..bs
    };
    bs.validate()?;

    let mut offset: i64 = 0;
    for year in BS_FIRST_YEAR..bs.year {
        offset += i64::from(bs_table::year_days(year).ok_or(ConversionError::TableMiss(year))?);
    }
    for month in 1..bs.month {
        offset += i64::from(
            bs_table::month_days(bs.year, month).ok_or(ConversionError::TableMiss(bs.year))?,
        );
    }
    offset += i64::from(bs.day - 1);

    let epoch = bs_table::ad_epoch().ok_or(ConversionError::TableMiss(BS_FIRST_YEAR))?;
    epoch
        .checked_add_signed(chrono::Duration::days(offset))
        .ok_or(ConversionError::TableMiss(bs.year))
}

/// Converts an AD date to BS by walking the BS month table from the epoch.
pub fn ad_to_bs_date(ad: NaiveDate) -> Result<CalendarDate, ConversionError> {
    let epoch = bs_table::ad_epoch().ok_or(ConversionError::TableMiss(BS_FIRST_YEAR))?;
    let mut remaining = (ad - epoch).num_days();
    if remaining < 0 {
        return Err(ConversionError::YearOutOfRange(ad.year()));
    }

    let mut year = BS_FIRST_YEAR;
    loop {
        let len = i64::from(bs_table::year_days(year).ok_or(ConversionError::TableMiss(year))?);
        if remaining < len {
            break;
        }
        remaining -= len;
        year += 1;
    }

    let mut month = 1;
    loop {
        let len =
            i64::from(bs_table::month_days(year, month).ok_or(ConversionError::TableMiss(year))?);
        if remaining < len {
            break;
        }
        remaining -= len;
        month += 1;
    }

    // remaining < month length <= 32
    let day = u32::try_from(remaining + 1).map_err(|_| ConversionError::TableMiss(year))?;
    Ok(CalendarDate::bs(year, month, day))
}

/// BS input to AD `YYYY-MM-DD`, or `""` on any failure.
pub fn bs_to_ad<'a>(input: impl Into<BsInput<'a>>) -> String {
    let parsed = match input.into() {
        BsInput::Text(raw) => {
            if raw.trim().is_empty() {
                return String::new();
            }
            parse_bs(raw)
        }
        BsInput::Date(date) => Ok(CalendarDate {
            calendar: Calendar::Bs,
            ..date
        }),
    };
    match parsed.and_then(bs_to_ad_date) {
        Ok(ad) => CalendarDate::from(ad).to_string(),
        Err(err) => {
            debug!(%err, "BS to AD conversion produced no value");
            String::new()
        }
    }
}

/// AD `YYYY-MM-DD` to BS `YYYY-MM-DD`, or `""` on any failure.
pub fn ad_to_bs(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    match parse_ad(input).and_then(ad_to_bs_date) {
        Ok(bs) => bs.to_string(),
        Err(err) => {
            debug!(%err, "AD to BS conversion produced no value");
            String::new()
        }
    }
}

/// Strict format, year window and real-calendar-date check for AD text.
pub fn is_valid_ad_date(input: &str) -> bool {
    parse_ad(input).is_ok()
}
