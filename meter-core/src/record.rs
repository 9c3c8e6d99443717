//! Log line grammar.
//!
//! Every persisted record is one text line:
//!
//! ```text
//! 2024/05/06,14:00:00,12340,gal.
//! 2024/05/06,14:03:12,12340,gal.,startup
//! 2024/05/06,14:05:00,12360,gal.,correction +20
//! 2024/05/07,09:30:41,800,gal.,reset
//! ```
//!
//! Only the fixed-width `YYYY/MM/DD,HH:MM:SS,` prefix and the integer reading
//! are structural. Whatever follows the reading is free-form and parsed
//! leniently, so lines written by older firmware keep scanning.

use core::fmt::{self, Write as _};

use heapless::String;
use winnow::ascii::dec_int;
use winnow::combinator::opt;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::stream::AsChar;
use winnow::token::{rest, take_while};

use crate::clock::{Date, DateTime, Time};
use crate::counter::Reading;

/// Longest line the meter writes or accepts.
pub const MAX_LINE_LEN: usize = 96;

/// Byte offset of the delimiter between date and time.
pub const DATE_DELIMITER_OFFSET: usize = 10;
/// Byte offset of the delimiter between time and reading.
pub const TIME_DELIMITER_OFFSET: usize = 19;

/// Unit suffix written after every reading.
pub const UNIT_SUFFIX: &str = "gal.";

/// Owned text of one log line, without the terminating newline.
pub type LineBuffer = String<MAX_LINE_LEN>;

/// Why a record was written.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordTag {
    /// Hourly sample.
    Periodic,
    /// Reading recovered at boot.
    Startup,
    /// Manual recalibration by `delta` units.
    Correction { delta: Reading },
    /// Log restarted from this reading.
    Reset,
}

/// One parsed log line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub stamp: DateTime,
    pub reading: Reading,
    pub tag: RecordTag,
}

impl LogRecord {
    #[must_use]
    pub const fn new(stamp: DateTime, reading: Reading, tag: RecordTag) -> Self {
        Self {
            stamp,
            reading,
            tag,
        }
    }

    #[must_use]
    pub const fn periodic(stamp: DateTime, reading: Reading) -> Self {
        Self::new(stamp, reading, RecordTag::Periodic)
    }

    /// Renders the record into a fixed-capacity line buffer.
    pub fn to_line(&self) -> Result<LineBuffer, fmt::Error> {
        let mut line = LineBuffer::new();
        write!(line, "{self}")?;
        Ok(line)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{UNIT_SUFFIX}", self.stamp, self.reading)?;
        match self.tag {
            RecordTag::Periodic => Ok(()),
            RecordTag::Startup => f.write_str(",startup"),
            RecordTag::Correction { delta } => write!(f, ",correction {delta:+}"),
            RecordTag::Reset => f.write_str(",reset"),
        }
    }
}

/// Line failed structural validation. Scans skip such lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordCorrupt;

impl fmt::Display for RecordCorrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("malformed log record")
    }
}

/// Parses a full record line.
pub fn parse_line(line: &str) -> Result<LogRecord, RecordCorrupt> {
    let mut input = trim_line_end(line);
    record.parse_next(&mut input).map_err(|_| RecordCorrupt)
}

/// Parses only the timestamp prefix, leaving the rest of the line unchecked.
pub fn parse_stamp(line: &str) -> Result<DateTime, RecordCorrupt> {
    let mut input = trim_line_end(line);
    stamp.parse_next(&mut input).map_err(|_| RecordCorrupt)
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

fn record(input: &mut &str) -> ModalResult<LogRecord> {
    let stamp = stamp.parse_next(input)?;
    let reading: Reading = dec_int.parse_next(input)?;
    let trailer = opt((',', rest)).parse_next(input)?;
    let tag = trailer.map_or(RecordTag::Periodic, |(_, text)| tag_from_trailer(text));
    Ok(LogRecord::new(stamp, reading, tag))
}

// `YYYY/MM/DD,HH:MM:SS,` with the delimiters at their fixed offsets.
fn stamp(input: &mut &str) -> ModalResult<DateTime> {
    let (date, _, time, _) = (date, ',', time, ',').parse_next(input)?;
    Ok(DateTime::new(date, time))
}

fn date(input: &mut &str) -> ModalResult<Date> {
    (digits::<u16>(4), '/', digits::<u8>(2), '/', digits::<u8>(2))
        .verify_map(|(year, _, month, _, day)| Date::checked(year, month, day))
        .parse_next(input)
}

fn time(input: &mut &str) -> ModalResult<Time> {
    (digits::<u8>(2), ':', digits::<u8>(2), ':', digits::<u8>(2))
        .verify_map(|(hour, _, minute, _, second)| Time::checked(hour, minute, second))
        .parse_next(input)
}

fn digits<'i, T>(width: usize) -> impl Parser<&'i str, T, ErrMode<ContextError>>
where
    T: core::str::FromStr,
{
    take_while(width, AsChar::is_dec_digit).parse_to()
}

// Free-form tail after the reading: `gal.` optionally followed by `,<tag>`.
fn tag_from_trailer(trailer: &str) -> RecordTag {
    let Some((_, tag)) = trailer.split_once(',') else {
        return RecordTag::Periodic;
    };

    let tag = tag.trim();
    if tag.eq_ignore_ascii_case("startup") {
        RecordTag::Startup
    } else if tag.eq_ignore_ascii_case("reset") {
        RecordTag::Reset
    } else if let Some(delta) = tag.strip_prefix("correction") {
        let delta = delta.trim().trim_start_matches('+');
        delta
            .parse()
            .map_or(RecordTag::Periodic, |delta| RecordTag::Correction { delta })
    } else {
        RecordTag::Periodic
    }
}
