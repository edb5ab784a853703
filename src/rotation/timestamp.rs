//! Timestamp layouts used when naming rotated files.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a layout name is not one of the supported set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid timestamp format: {0}. Valid formats: mmddyy-HH-MM-SS-AMPM, mmddyy-HHMMSS-AMPM, mmddyy-HH:MM:SS-AMPM")]
pub struct InvalidLayout(pub String);

/// Supported textual layouts. The date part is always `mmddyy`; the layouts
/// only differ in how the 12-hour time part is separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TimestampLayout {
    /// `mmddyy-HH-MM-SS-AMPM`
    #[default]
    Hyphenated,
    /// `mmddyy-HHMMSS-AMPM`
    Compact,
    /// `mmddyy-HH:MM:SS-AMPM`
    Colon,
}

impl TimestampLayout {
    /// Every accepted layout.
    pub const ALL: [TimestampLayout; 3] = [
        TimestampLayout::Hyphenated,
        TimestampLayout::Compact,
        TimestampLayout::Colon,
    ];

    /// The layout's configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            TimestampLayout::Hyphenated => "mmddyy-HH-MM-SS-AMPM",
            TimestampLayout::Compact => "mmddyy-HHMMSS-AMPM",
            TimestampLayout::Colon => "mmddyy-HH:MM:SS-AMPM",
        }
    }

    fn time_pattern(self) -> &'static str {
        match self {
            TimestampLayout::Hyphenated => "%I-%M-%S-%p",
            TimestampLayout::Compact => "%I%M%S-%p",
            TimestampLayout::Colon => "%I:%M:%S-%p",
        }
    }

    /// Render `at` in this layout.
    pub fn format(self, at: &NaiveDateTime) -> String {
        format!(
            "{}-{}",
            at.format("%m%d%y"),
            at.format(self.time_pattern())
        )
    }
}

impl fmt::Display for TimestampLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimestampLayout {
    type Err = InvalidLayout;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|layout| layout.as_str() == s)
            .ok_or_else(|| InvalidLayout(s.to_string()))
    }
}

impl TryFrom<String> for TimestampLayout {
    type Error = InvalidLayout;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Heuristic for names that already start with a generated date: six digits
/// followed by a hyphen.
pub fn looks_like_timestamp(stem: &str) -> bool {
    let bytes = stem.as_bytes();
    bytes.len() > 6 && bytes[..6].iter().all(u8::is_ascii_digit) && bytes[6] == b'-'
}
