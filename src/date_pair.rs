//! BS/AD input pairs kept in step with each other.
//!
//! An edit carries the side it came from. The synchroniser only ever derives
//! the opposite side, so writing the derived value cannot feed back into the
//! field that was just edited.
use chrono::NaiveDate;
use tracing::debug;

use crate::calendar::{ad_to_bs, bs_to_ad, is_valid_ad_date, parse_ad};
use crate::schema::names;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSide {
    Bs,
    Ad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFieldPair {
    pub bs_field: &'static str,
    pub ad_field: &'static str,
    pub label: &'static str,
}

impl DateFieldPair {
    pub const fn new(bs_field: &'static str, ad_field: &'static str, label: &'static str) -> Self {
        Self {
            bs_field,
            ad_field,
            label,
        }
    }

    pub fn field(&self, side: DateSide) -> &'static str {
        match side {
            DateSide::Bs => self.bs_field,
            DateSide::Ad => self.ad_field,
        }
    }

    /// Which side of this pair `name` is, if any.
    pub fn side_of(&self, name: &str) -> Option<DateSide> {
        if name == self.bs_field {
            Some(DateSide::Bs)
        } else if name == self.ad_field {
            Some(DateSide::Ad)
        } else {
            None
        }
    }
}

pub const KYC_DATE_PAIRS: &[DateFieldPair] = &[
    DateFieldPair::new(names::DOB_BS, names::DOB_AD, "Date of Birth"),
    DateFieldPair::new(names::CITIZEN_BS, names::CITIZEN_AD, "Citizenship Issue Date"),
    DateFieldPair::new(
        names::NOMINEE_DOB_BS,
        names::NOMINEE_DOB_AD,
        "Nominee Date of Birth",
    ),
];

pub fn pair_for(name: &str) -> Option<(&'static DateFieldPair, DateSide)> {
    KYC_DATE_PAIRS
        .iter()
        .find_map(|pair| pair.side_of(name).map(|side| (pair, side)))
}

/// What the caller should do with the pair after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Empty input, nothing to propagate.
    Skipped,
    /// Write `value` into `field` (the side opposite the edit) and clear invalid markers.
    Derived { field: &'static str, value: String },
    /// The date lies after today: clear both fields and report it.
    FutureDate,
    /// The edited text could not be converted. Nothing is written.
    Unconvertible,
}

/// Derives the opposite side of `pair` from an edit of `side`.
pub fn sync_pair(pair: &DateFieldPair, side: DateSide, raw: &str, today: NaiveDate) -> SyncOutcome {
    if raw.trim().is_empty() {
        return SyncOutcome::Skipped;
    }

    let (ad_text, derived_field, derived_value) = match side {
        DateSide::Bs => {
            let ad = bs_to_ad(raw);
            if ad.is_empty() {
                debug!(field = pair.bs_field, "BS input could not be converted");
                return SyncOutcome::Unconvertible;
            }
            (ad.clone(), pair.ad_field, ad)
        }
        DateSide::Ad => {
            let raw = raw.trim();
            if !is_valid_ad_date(raw) {
                debug!(field = pair.ad_field, "AD input failed the validity guard");
                return SyncOutcome::Unconvertible;
            }
            let bs = ad_to_bs(raw);
            if bs.is_empty() {
                return SyncOutcome::Unconvertible;
            }
            (raw.to_string(), pair.bs_field, bs)
        }
    };

    match parse_ad(&ad_text) {
        Ok(ad) if ad > today => {
            debug!(label = pair.label, %ad, %today, "future date rejected");
            SyncOutcome::FutureDate
        }
        Ok(_) => SyncOutcome::Derived {
            field: derived_field,
            value: derived_value,
        },
        Err(_) => SyncOutcome::Unconvertible,
    }
}
