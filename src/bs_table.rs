//! Bikram Sambat month lengths.
//!
//! BS months do not follow a fixed pattern; every year has its own row, taken
//! from the published Nepali calendar. Row `i` is BS year `BS_FIRST_YEAR + i`.
//! Published tables disagree on BS 1974; the row here keeps BS 2000-01-01 on
//! AD 1943-04-14.

use chrono::NaiveDate;

pub const BS_FIRST_YEAR: i32 = 1970;
pub const BS_LAST_YEAR: i32 = BS_FIRST_YEAR + BS_MONTH_DAYS.len() as i32 - 1;

/// AD date of BS 1970-01-01 (Baisakh 1).
const AD_EPOCH: (i32, u32, u32) = (1913, 4, 13);

#[rustfmt::skip]
const BS_MONTH_DAYS: [[u8; 12]; 121] = [
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1970
    [31, 31, 32, 31, 32, 30, 30, 29, 30, 29, 30, 30], // 1971
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 1972
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 1973
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1974
    [31, 31, 32, 32, 30, 31, 30, 29, 30, 29, 30, 30], // 1975
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 1976
    [30, 32, 31, 32, 31, 31, 29, 30, 29, 30, 29, 31], // 1977
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1978
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 1979
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 1980
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 1981
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1982
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 1983
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 1984
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 1985
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1986
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 1987
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 1988
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 1989
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1990
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 1991
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 1992
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 1993
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1994
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 1995
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 1996
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1997
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 1998
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 1999
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2000
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2001
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2002
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2003
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2004
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2005
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2006
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2007
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 29, 31], // 2008
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2009
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2010
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2011
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2012
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2013
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2014
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2015
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2016
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2017
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2018
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2019
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2020
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2021
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2022
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2023
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2024
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2025
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2026
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2027
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2028
    [31, 31, 32, 31, 32, 30, 30, 29, 30, 29, 30, 30], // 2029
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2030
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2031
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2032
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2033
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2034
    [30, 32, 31, 32, 31, 31, 29, 30, 30, 29, 29, 31], // 2035
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2036
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2037
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2038
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2039
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2040
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2041
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2042
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2043
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2044
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2045
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2046
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2047
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2048
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2049
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2050
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2051
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2052
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2053
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2054
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2055
    [31, 31, 32, 31, 32, 30, 30, 29, 30, 29, 30, 30], // 2056
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2057
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2058
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2059
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2060
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2061
    [30, 32, 31, 32, 31, 31, 29, 30, 29, 30, 29, 31], // 2062
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2063
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2064
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2065
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 29, 31], // 2066
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2067
    [31, 31, 32, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2068
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2069
    [31, 31, 31, 32, 31, 31, 29, 30, 30, 29, 30, 30], // 2070
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2071
    [31, 32, 31, 32, 31, 30, 30, 29, 30, 29, 30, 30], // 2072
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 31], // 2073
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2074
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2075
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2076
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 30, 29, 31], // 2077
    [31, 31, 31, 32, 31, 31, 30, 29, 30, 29, 30, 30], // 2078
    [31, 31, 32, 31, 31, 31, 30, 29, 30, 29, 30, 30], // 2079
    [31, 32, 31, 32, 31, 30, 30, 30, 29, 29, 30, 30], // 2080
    [31, 31, 32, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2081
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2082
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2083
    [31, 31, 32, 31, 31, 30, 30, 30, 29, 30, 30, 30], // 2084
    [31, 32, 31, 32, 30, 31, 30, 30, 29, 30, 30, 30], // 2085
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2086
    [31, 31, 32, 31, 31, 31, 30, 30, 29, 30, 30, 30], // 2087
    [30, 31, 32, 32, 30, 31, 30, 30, 29, 30, 30, 30], // 2088
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2089
    [30, 32, 31, 32, 31, 30, 30, 30, 29, 30, 30, 30], // 2090
];

pub fn ad_epoch() -> Option<NaiveDate> {
    let (y, m, d) = AD_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// First and last AD dates the table can convert.
pub fn ad_span() -> Option<(NaiveDate, NaiveDate)> {
    let first = ad_epoch()?;
    let total: i64 = (BS_FIRST_YEAR..=BS_LAST_YEAR)
        .map(|y| year_days(y).map(i64::from))
        .sum::<Option<i64>>()?;
    let last = first.checked_add_signed(chrono::Duration::days(total - 1))?;
    Some((first, last))
}

fn row(year: i32) -> Option<&'static [u8; 12]> {
    let idx = usize::try_from(year.checked_sub(BS_FIRST_YEAR)?).ok()?;
    BS_MONTH_DAYS.get(idx)
}

/// Days in BS `month` (1-based) of `year`, if the table covers it.
pub fn month_days(year: i32, month: u32) -> Option<u32> {
    let idx = usize::try_from(month.checked_sub(1)?).ok()?;
    row(year)?.get(idx).map(|d| u32::from(*d))
}

pub fn year_days(year: i32) -> Option<u32> {
    row(year).map(|r| r.iter().map(|d| u32::from(*d)).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_spans_1970_to_2090() {
        assert_eq!(BS_LAST_YEAR, 2090);
        assert_eq!(month_days(1999, 12), Some(31));
        assert!(month_days(1969, 12).is_none());
        assert!(month_days(2091, 1).is_none());
        assert!(month_days(2081, 13).is_none());
        assert!(month_days(2081, 0).is_none());
    }

    #[test]
    fn month_lengths_stay_within_bounds() {
        for year in BS_FIRST_YEAR..=BS_LAST_YEAR {
            for month in 1..=12 {
                let days = month_days(year, month).unwrap();
                assert!((29..=32).contains(&days), "{year}-{month} has {days} days");
            }
            let total = year_days(year).unwrap();
            assert!((365..=366).contains(&total), "{year} has {total} days");
        }
    }

    #[test]
    fn known_year_lengths() {
        assert_eq!(month_days(2081, 1), Some(31));
        assert_eq!(month_days(2082, 1), Some(30));
        assert_eq!(year_days(2080), Some(365));
        assert_eq!(year_days(1974), Some(365));
    }

    #[test]
    fn ad_span_matches_table_ends() {
        let (first, last) = ad_span().unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(1913, 4, 13).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2034, 4, 13).unwrap());
    }
}
