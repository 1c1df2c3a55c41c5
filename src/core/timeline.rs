use std::fmt;

use serde::Serialize;

/// A calendar quarter, the shared index unit for every forecast series.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Quarter {
    year: i32,
    quarter: u8,
}

impl Quarter {
    pub fn new(year: i32, quarter: u8) -> Result<Self, String> {
        if !(1..=4).contains(&quarter) {
            return Err(format!("quarter must be 1-4, got {quarter}"));
        }
        Ok(Self { year, quarter })
    }

    /// Parses "Q1 2027" or "2027Q1".
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        let invalid = || format!("invalid quarter '{trimmed}', expected e.g. 'Q1 2027'");

        if let Some(rest) = trimmed.strip_prefix(['Q', 'q']) {
            let (q, year) = rest.split_once(' ').ok_or_else(invalid)?;
            let quarter = q.trim().parse::<u8>().map_err(|_| invalid())?;
            let year = year.trim().parse::<i32>().map_err(|_| invalid())?;
            return Self::new(year, quarter).map_err(|_| invalid());
        }

        if let Some((year, q)) = trimmed.split_once(['Q', 'q']) {
            let year = year.trim().parse::<i32>().map_err(|_| invalid())?;
            let quarter = q.trim().parse::<u8>().map_err(|_| invalid())?;
            return Self::new(year, quarter).map_err(|_| invalid());
        }

        Err(invalid())
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn succ(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    /// Number of quarters from `base` to `self`; negative when `self` precedes `base`.
    pub fn index_from(self, base: Quarter) -> i64 {
        (self.year as i64 - base.year as i64) * 4 + (self.quarter as i64 - base.quarter as i64)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{} {}", self.quarter, self.year)
    }
}

impl Serialize for Quarter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Builds the contiguous quarter sequence the whole forecast is indexed by.
///
/// The sequence starts at `start`, runs for at least `min_len` quarters, and
/// is extended one quarter at a time until every quarter in `must_include`
/// falls inside it. Callers validate that no must-include quarter precedes
/// `start`.
pub fn build_timeline(start: Quarter, min_len: u32, must_include: &[Quarter]) -> Vec<Quarter> {
    let mut quarters = Vec::with_capacity(min_len as usize);
    let mut current = start;
    for _ in 0..min_len.max(1) {
        quarters.push(current);
        current = current.succ();
    }

    while must_include
        .iter()
        .any(|q| *q > *quarters.last().unwrap_or(&start))
    {
        quarters.push(current);
        current = current.succ();
    }

    quarters
}
