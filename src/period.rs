//! Billing periods and the rules for spotting them in page text.
//!
//! Provider UIs label invoices inconsistently ("December 2024", "Dec 1, 2024",
//! "2024-12", "12/2024"), so matching extracts every period mention from a
//! piece of text and compares periods rather than strings.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

const MIN_YEAR: i32 = 1990;
const MAX_YEAR: i32 = 2100;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid billing period {input:?}: expected YYYY-MM or YYYYMM")]
pub struct PeriodError {
    input: String,
}

/// A calendar month that an invoice covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) || !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PeriodError {
                input: format!("{year:04}-{month:02}"),
            });
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The period containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The calendar month before the one containing `today`.
    ///
    /// Invoices are issued after a month closes, so this is the default target.
    pub fn previous(today: NaiveDate) -> Self {
        Self::containing(today).pred()
    }

    pub fn pred(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// `YYYYMM`, used in file names and object keys.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || PeriodError {
            input: s.to_string(),
        };

        let (year, month) = match trimmed.split_once(['-', '/']) {
            Some((year, month)) => (year, month),
            None if trimmed.len() == 6 && trimmed.is_ascii() => trimmed.split_at(4),
            None => return Err(err()),
        };
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(err());
        }

        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        Self::new(year, month).map_err(|_| err())
    }
}

// "December 2024", "Dec. 2024", "Dec 1, 2024", "Sept 2024"
static MONTH_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(?:\d{1,2}(?:st|nd|rd|th)?,?\s+)?(\d{4})\b",
    )
    .expect("month name pattern is valid")
});

// US dates "12/01/2024": month first, day ignored.
static US_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/\d{1,2}/(\d{4})\b").expect("US date pattern is valid")
});

// "2024-12", "2024/12", "2024-12-01"
static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})[-/](\d{1,2})(?:[-/]\d{1,2})?\b").expect("ISO pattern is valid")
});

// "12/2024", "12-2024"
static MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[-/](\d{4})\b").expect("month/year pattern is valid")
});

// "202412"
static COMPACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})(\d{2})\b").expect("compact pattern is valid"));

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| m[..3].eq_ignore_ascii_case(&prefix))
        .map(|i| i as u32 + 1)
}

#[derive(Clone, Copy)]
enum Layout {
    MonthName,
    MonthFirst,
    YearFirst,
}

/// Every billing period mentioned in `text`, in order of appearance, without duplicates.
///
/// Patterns are applied from most to least specific; a later pattern never
/// claims text already matched by an earlier one, so "12/01/2024" is read as
/// December 2024 and not as January 2024.
pub fn mentioned_periods(text: &str) -> Vec<BillingPeriod> {
    let patterns: [(&Regex, Layout); 5] = [
        (&MONTH_NAME_RE, Layout::MonthName),
        (&US_DATE_RE, Layout::MonthFirst),
        (&ISO_RE, Layout::YearFirst),
        (&MONTH_YEAR_RE, Layout::MonthFirst),
        (&COMPACT_RE, Layout::YearFirst),
    ];

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut found: Vec<(usize, BillingPeriod)> = Vec::new();

    for (regex, layout) in patterns {
        for caps in regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let span = (whole.start(), whole.end());
            if claimed.iter().any(|&(s, e)| span.0 < e && s < span.1) {
                continue;
            }

            let (first, second) = (&caps[1], &caps[2]);
            let parsed = match layout {
                Layout::MonthName => month_from_name(first)
                    .zip(second.parse::<i32>().ok())
                    .map(|(m, y)| (y, m)),
                Layout::MonthFirst => first.parse::<u32>().ok().zip(second.parse::<i32>().ok()).map(|(m, y)| (y, m)),
                Layout::YearFirst => second.parse::<u32>().ok().zip(first.parse::<i32>().ok()).map(|(m, y)| (y, m)),
            };

            if let Some(period) = parsed.and_then(|(y, m)| BillingPeriod::new(y, m).ok()) {
                claimed.push(span);
                found.push((span.0, period));
            }
        }
    }

    found.sort_by_key(|(start, _)| *start);
    let mut periods = Vec::with_capacity(found.len());
    for (_, period) in found {
        if !periods.contains(&period) {
            periods.push(period);
        }
    }
    periods
}
