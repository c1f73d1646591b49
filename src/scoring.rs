//! Shared score and duration utilities
//!
//! Used to derive the `derived.*` snapshot values (sets won, match and set
//! durations) that are not stored in the application's state record.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Team side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }

    /// Snapshot key of this side's team record
    pub fn team_key(&self) -> &'static str {
        match self {
            Side::A => "teamA",
            Side::B => "teamB",
        }
    }

    /// Accepts `A`/`B`, `teamA`/`teamB` (case-insensitive)
    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "teama" => Some(Side::A),
            "b" | "teamb" => Some(Side::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetScore {
    pub a: i64,
    pub b: i64,
    pub finished: bool,
}

impl SetScore {
    /// Winner of a finished set; ties have none
    pub fn winner(&self) -> Option<Side> {
        if !self.finished || self.a == self.b {
            return None;
        }
        Some(if self.a > self.b { Side::A } else { Side::B })
    }
}

/// Sets won by (A, B)
pub fn sets_won(sets: &[SetScore]) -> (u32, u32) {
    sets.iter()
        .filter_map(SetScore::winner)
        .fold((0, 0), |(a, b), side| match side {
            Side::A => (a + 1, b),
            Side::B => (a, b + 1),
        })
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour on
pub fn format_duration(total_seconds: i64) -> String {
    let total = total_seconds.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Parse a timestamp given as epoch milliseconds or an RFC 3339 string
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Whole seconds between two instants (never negative)
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_seconds().max(0)
}
