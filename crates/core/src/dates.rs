//! Lenient parsing of the full and partial publication dates providers return.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// A date where month and day may be unknown ("1983", "1983-04").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn to_iso(&self) -> String {
        match (self.month, self.day) {
            (Some(m), Some(d)) => format!("{:04}-{:02}-{:02}", self.year, m, d),
            (Some(m), None) => format!("{:04}-{:02}", self.year, m),
            _ => format!("{:04}", self.year),
        }
    }

    fn full(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: Some(date.month()),
            day: Some(date.day()),
        }
    }
}

const FULL_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

const MONTH_FORMATS: &[&str] = &["%b %Y", "%B %Y"];

/// Parse a provider-supplied date. Returns `None` when the text is not
/// recognisable as a date at all.
pub fn parse(text: &str) -> Option<PartialDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for fmt in FULL_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(PartialDate::full(d));
        }
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(PartialDate::full(dt.date()));
        }
    }
    // chrono needs a day to build a NaiveDate, so month-only forms borrow the 1st.
    for fmt in MONTH_FORMATS {
        let padded = format!("1 {}", text);
        let with_day = format!("%d {}", fmt);
        if let Ok(d) = NaiveDate::parse_from_str(&padded, &with_day) {
            return Some(PartialDate {
                year: d.year(),
                month: Some(d.month()),
                day: None,
            });
        }
    }
    if let Some((y, m)) = text.split_once('-') {
        if let (Some(year), Ok(month)) = (parse_year(y), m.parse::<u32>()) {
            if (1..=12).contains(&month) && m.len() <= 2 {
                return Some(PartialDate {
                    year,
                    month: Some(month),
                    day: None,
                });
            }
        }
    }
    parse_year(text).map(|year| PartialDate {
        year,
        month: None,
        day: None,
    })
}

pub fn is_valid(text: &str) -> bool {
    parse(text).is_some()
}

fn parse_year(text: &str) -> Option<i32> {
    if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok().filter(|y| *y >= 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_full_date() {
        let d = parse("2020-01-01").unwrap();
        assert_eq!(d.to_iso(), "2020-01-01");
    }

    #[test]
    fn partial_dates() {
        assert_eq!(parse("1983").unwrap().to_iso(), "1983");
        assert_eq!(parse("1983-04").unwrap().to_iso(), "1983-04");
        assert_eq!(parse("April 1983").unwrap().to_iso(), "1983-04");
    }

    #[test]
    fn textual_dates() {
        assert_eq!(parse("6 Jun 2021").unwrap().to_iso(), "2021-06-06");
        assert_eq!(parse("June 6, 2021").unwrap().to_iso(), "2021-06-06");
        assert_eq!(parse("06/06/2021").unwrap().to_iso(), "2021-06-06");
        assert_eq!(parse("2021-06-06T10:00:00").unwrap().to_iso(), "2021-06-06");
    }

    #[test]
    fn rejects_garbage() {
        assert!(!is_valid("not-a-date"));
        assert!(!is_valid(""));
        assert!(!is_valid("2021-13"));
        assert!(!is_valid("12345"));
    }
}
