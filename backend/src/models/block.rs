//! Half-day scheduling blocks.
//!
//! A block is the atomic scheduling unit: one AM or PM session on a calendar
//! date. Every calendar day in a horizon has exactly two blocks. Blocks are
//! produced by the date-range generator and never mutated afterwards.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

crate::define_id_type!(i64, BlockId);

/// Half-day session within a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Session {
    Am,
    Pm,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Am => "AM",
            Session::Pm => "PM",
        }
    }

    /// Nominal start time of the session.
    pub fn start_time(&self) -> NaiveTime {
        match self {
            Session::Am => NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            Session::Pm => NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        }
    }

    /// Nominal end time of the session.
    pub fn end_time(&self) -> NaiveTime {
        match self {
            Session::Am => NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            Session::Pm => NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }
}

/// An atomic half-day scheduling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub date: NaiveDate,
    pub session: Session,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, date: NaiveDate, session: Session) -> Self {
        Self {
            id: id.into(),
            date,
            session,
        }
    }

    /// Nominal UTC start of this block's session.
    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(self.session.start_time()))
    }

    /// Nominal UTC end of this block's session.
    ///
    /// Overnight work is modeled by the rotation template, not the block; the
    /// validator extends end times for overnight activity types.
    pub fn ends_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.date.and_time(self.session.end_time()))
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    /// Monday of the ISO week containing this block's date.
    pub fn week_start(&self) -> NaiveDate {
        monday_of(self.date)
    }
}

/// Monday of the ISO week containing `date`.
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Generate the chronological block sequence for an inclusive date range.
///
/// Each day contributes an AM block followed by a PM block. Ids are assigned
/// sequentially starting at `first_id` so generated horizons are deterministic.
pub fn generate_blocks(start: NaiveDate, end: NaiveDate, first_id: i64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut next_id = first_id;
    let mut day = start;
    while day <= end {
        for session in [Session::Am, Session::Pm] {
            blocks.push(Block::new(next_id, day, session));
            next_id += 1;
        }
        day += Duration::days(1);
    }
    blocks
}
