//! Append-only usage log with startup scan and daily rotation.
//!
//! The main log receives one line per hour. Rotation first summarizes it into
//! the daily log, keeping one representative record per calendar day, then
//! renames the daily log over the main log. Both steps go through the
//! [`Storage`] trait, so the same code runs against flash, a host directory
//! and the in-memory test store.

use core::fmt;

use crate::clock::Date;
use crate::counter::Reading;
use crate::record::{LineBuffer, LogRecord, MAX_LINE_LEN, RecordTag, parse_line};
use crate::store::{Line, LineReader, OpenMode, Storage, StorageFile, StoreError};

/// Main hourly log.
pub const MAIN_LOG_PATH: &str = "/meter.log";
/// Scratch file the summary is written to before it replaces the main log.
pub const DAILY_LOG_PATH: &str = "/daily.log";
/// Hour whose sample represents the whole day after rotation.
pub const MARKER_HOUR: u8 = 2;

const READ_BUFFER_LEN: usize = MAX_LINE_LEN + 32;

/// Locations of the two log files.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LogPaths {
    pub main: &'static str,
    pub daily: &'static str,
}

impl LogPaths {
    #[must_use]
    pub const fn new(main: &'static str, daily: &'static str) -> Self {
        Self { main, daily }
    }
}

impl Default for LogPaths {
    fn default() -> Self {
        Self::new(MAIN_LOG_PATH, DAILY_LOG_PATH)
    }
}

/// Log operation that failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogOp {
    Append,
    Scan,
    Summarize,
    Compress,
    Reset,
}

impl LogOp {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            LogOp::Append => "append",
            LogOp::Scan => "scan",
            LogOp::Summarize => "summarize",
            LogOp::Compress => "compress",
            LogOp::Reset => "reset",
        }
    }
}

/// Storage failure while working on one of the log files.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LogError {
    pub op: LogOp,
    pub path: &'static str,
    pub source: StoreError,
}

impl LogError {
    #[must_use]
    pub const fn new(op: LogOp, path: &'static str, source: StoreError) -> Self {
        Self { op, path, source }
    }
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op.label(), self.path, self.source)
    }
}

/// What a full scan of the main log found.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LogStats {
    /// Highest reading, `None` when the log holds no valid record.
    pub latest: Option<Reading>,
    pub records: usize,
    /// Runs of consecutive records sharing a date.
    pub days: usize,
}

impl LogStats {
    /// `true` when rotation would drop at least one record.
    #[must_use]
    pub const fn compactable(&self) -> bool {
        self.days < self.records
    }
}

/// Record kept for one calendar day while summarizing.
#[derive(Copy, Clone, Debug)]
struct DaySummary {
    date: Date,
    marker: Option<LogRecord>,
    last: LogRecord,
}

impl DaySummary {
    fn start(record: LogRecord, marker_hour: u8) -> Self {
        let mut day = Self {
            date: record.stamp.date,
            marker: None,
            last: record,
        };
        day.observe(record, marker_hour);
        day
    }

    fn observe(&mut self, record: LogRecord, marker_hour: u8) {
        if self.marker.is_none()
            && record.tag == RecordTag::Periodic
            && record.stamp.time.hour == marker_hour
        {
            self.marker = Some(record);
        }
        self.last = record;
    }

    fn representative(&self) -> LogRecord {
        self.marker.unwrap_or(self.last)
    }
}

/// The persistent usage log.
pub struct UsageLog<'s, S: Storage> {
    store: &'s S,
    paths: LogPaths,
    marker_hour: u8,
}

impl<'s, S: Storage> UsageLog<'s, S> {
    #[must_use]
    pub fn new(store: &'s S) -> Self {
        Self::with_paths(store, LogPaths::default())
    }

    #[must_use]
    pub const fn with_paths(store: &'s S, paths: LogPaths) -> Self {
        Self {
            store,
            paths,
            marker_hour: MARKER_HOUR,
        }
    }

    #[must_use]
    pub const fn paths(&self) -> LogPaths {
        self.paths
    }

    #[must_use]
    pub const fn store(&self) -> &'s S {
        self.store
    }

    /// Appends one record to the main log and flushes it.
    pub fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let path = self.paths.main;
        let error = |source| LogError::new(LogOp::Append, path, source);

        let line = encode(record).map_err(error)?;
        let mut file = self.store.open(path, OpenMode::Append).map_err(error)?;
        file.write_all(line.as_bytes()).map_err(error)?;
        file.flush().map_err(error)
    }

    /// Highest reading found in the main log, or `None` when it holds no
    /// valid record. A missing log is not an error.
    pub fn scan_latest_reading(&self) -> Result<Option<Reading>, LogError> {
        self.stats().map(|stats| stats.latest)
    }

    /// Scans the main log once, collecting its highest reading and how many
    /// records and days it holds.
    pub fn stats(&self) -> Result<LogStats, LogError> {
        let mut stats = LogStats::default();
        let mut last_date: Option<Date> = None;
        self.for_each_record(|record| {
            let reading = record.reading;
            stats.latest = Some(stats.latest.map_or(reading, |max| max.max(reading)));
            stats.records += 1;
            if last_date != Some(record.stamp.date) {
                stats.days += 1;
                last_date = Some(record.stamp.date);
            }
        })?;
        Ok(stats)
    }

    /// Visits every valid record in append order and returns the number of
    /// lines that were skipped as unreadable or malformed.
    pub fn for_each_record<V>(&self, mut visit: V) -> Result<usize, LogError>
    where
        V: FnMut(&LogRecord),
    {
        match self.scan(self.paths.main, LogOp::Scan, &mut visit) {
            Err(LogError {
                source: StoreError::NotFound,
                ..
            }) => Ok(0),
            other => other,
        }
    }

    /// Rewrites the daily log with one record per calendar day of the main log.
    ///
    /// Each day is represented by its first periodic record taken during the
    /// marker hour, or by its last record when no such sample exists. Returns
    /// the number of days written.
    pub fn summarize(&self) -> Result<usize, LogError> {
        let daily_path = self.paths.daily;
        let write_error = |source| LogError::new(LogOp::Summarize, daily_path, source);

        if !self.store.exists(self.paths.main) {
            return Err(LogError::new(
                LogOp::Summarize,
                self.paths.main,
                StoreError::NotFound,
            ));
        }

        let mut daily = self
            .store
            .open(daily_path, OpenMode::Truncate)
            .map_err(write_error)?;

        let mut current: Option<DaySummary> = None;
        let mut days = 0usize;
        let mut write_result: Result<(), StoreError> = Ok(());
        let marker_hour = self.marker_hour;

        self.scan(self.paths.main, LogOp::Summarize, &mut |record: &LogRecord| {
            if write_result.is_err() {
                return;
            }
            match current.as_mut() {
                Some(day) if day.date == record.stamp.date => day.observe(*record, marker_hour),
                Some(day) => {
                    write_result = write_record(&mut daily, &day.representative());
                    days += 1;
                    current = Some(DaySummary::start(*record, marker_hour));
                }
                None => current = Some(DaySummary::start(*record, marker_hour)),
            }
        })?;
        write_result.map_err(write_error)?;

        if let Some(day) = current {
            write_record(&mut daily, &day.representative()).map_err(write_error)?;
            days += 1;
        }
        daily.flush().map_err(write_error)?;
        Ok(days)
    }

    /// Replaces the main log with the daily log.
    pub fn compress(&self) -> Result<(), LogError> {
        self.store
            .rename(self.paths.daily, self.paths.main)
            .map_err(|source| LogError::new(LogOp::Compress, self.paths.daily, source))
    }

    /// Summarizes then compresses. Returns the number of days kept.
    pub fn rotate(&self) -> Result<usize, LogError> {
        let days = self.summarize()?;
        self.compress()?;
        Ok(days)
    }

    /// Replaces the whole log with `record`.
    pub fn reset(&self, record: &LogRecord) -> Result<(), LogError> {
        let daily_path = self.paths.daily;
        let error = |source| LogError::new(LogOp::Reset, daily_path, source);

        let line = encode(record).map_err(error)?;
        {
            let mut file = self
                .store
                .open(daily_path, OpenMode::Truncate)
                .map_err(error)?;
            file.write_all(line.as_bytes()).map_err(error)?;
            file.flush().map_err(error)?;
        }
        self.store
            .rename(daily_path, self.paths.main)
            .map_err(|source| LogError::new(LogOp::Reset, self.paths.main, source))
    }

    /// Size of the main log in bytes; zero when it does not exist.
    pub fn size(&self) -> Result<usize, LogError> {
        match self.store.open(self.paths.main, OpenMode::Read) {
            Ok(file) => Ok(file.size()),
            Err(StoreError::NotFound) => Ok(0),
            Err(source) => Err(LogError::new(LogOp::Scan, self.paths.main, source)),
        }
    }

    fn scan(
        &self,
        path: &'static str,
        op: LogOp,
        visit: &mut dyn FnMut(&LogRecord),
    ) -> Result<usize, LogError> {
        let error = |source| LogError::new(op, path, source);
        let file = self.store.open(path, OpenMode::Read).map_err(error)?;
        let mut reader: LineReader<_, READ_BUFFER_LEN> = LineReader::new(file);
        let mut skipped = 0usize;

        while let Some(line) = reader.next_line().map_err(error)? {
            match line {
                Line::Text(text) if text.trim().is_empty() => {}
                Line::Text(text) => match parse_line(text) {
                    Ok(record) => visit(&record),
                    Err(_) => skipped += 1,
                },
                Line::Unreadable => skipped += 1,
            }
        }
        Ok(skipped)
    }
}

fn write_record<F: StorageFile>(file: &mut F, record: &LogRecord) -> Result<(), StoreError> {
    let line = encode(record)?;
    file.write_all(line.as_bytes())
}

fn encode(record: &LogRecord) -> Result<LineBuffer, StoreError> {
    let mut line = record.to_line().map_err(|_| StoreError::NoSpace)?;
    line.push('\n').map_err(|_| StoreError::NoSpace)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DateTime, Time};
    use crate::store::ram::RamStore;

    type Store = RamStore<4, 2048>;

    fn at(day: u8, hour: u8, minute: u8) -> DateTime {
        DateTime::new(Date::new(2024, 6, day), Time::new(hour, minute, 0))
    }

    fn raw(store: &Store, path: &str, contents: &str) {
        let mut file = store.open(path, OpenMode::Append).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn readings(log: &UsageLog<'_, Store>) -> heapless::Vec<Reading, 32> {
        let mut out = heapless::Vec::new();
        log.for_each_record(|record| out.push(record.reading).unwrap())
            .unwrap();
        out
    }

    #[test]
    fn missing_log_scans_as_empty() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        assert_eq!(log.scan_latest_reading(), Ok(None));
        assert_eq!(log.size(), Ok(0));
    }

    #[test]
    fn scan_returns_maximum_and_is_idempotent() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        for (hour, reading) in [(1, 100), (2, 700), (3, 650)] {
            log.append(&LogRecord::periodic(at(1, hour, 0), reading))
                .unwrap();
        }
        assert_eq!(log.scan_latest_reading(), Ok(Some(700)));
        assert_eq!(log.scan_latest_reading(), Ok(Some(700)));
    }

    #[test]
    fn stats_count_records_and_days() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        for (day, hour, reading) in [(1, 2, 100), (1, 5, 140), (2, 2, 200), (3, 2, 300)] {
            log.append(&LogRecord::periodic(at(day, hour, 0), reading))
                .unwrap();
        }

        let stats = log.stats().unwrap();
        assert_eq!(stats.latest, Some(300));
        assert_eq!((stats.records, stats.days), (4, 3));
        assert!(stats.compactable());

        log.rotate().unwrap();
        let stats = log.stats().unwrap();
        assert_eq!((stats.records, stats.days), (3, 3));
        assert!(!stats.compactable());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let store = Store::new();
        raw(
            &store,
            MAIN_LOG_PATH,
            "2024/06/01,01:00:00,100,gal.\n\
             garbage line\n\
             2024/06/01,02:00:0\n\
             \n\
             2024/06/01,03:00:00,300,gal.\n",
        );
        let log = UsageLog::new(&store);

        let mut seen = 0;
        let skipped = log.for_each_record(|_| seen += 1).unwrap();
        assert_eq!(seen, 2);
        assert_eq!(skipped, 2);
        assert_eq!(log.scan_latest_reading(), Ok(Some(300)));
    }

    #[test]
    fn append_then_scan_sees_the_record() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        log.append(&LogRecord::new(at(3, 9, 15), 4_200, RecordTag::Startup))
            .unwrap();
        assert!(log.scan_latest_reading().unwrap().unwrap() >= 4_200);
        assert_eq!(log.size(), Ok("2024/06/03,09:15:00,4200,gal.,startup\n".len()));
    }

    #[test]
    fn append_failure_names_operation_and_path() {
        let store = Store::new();
        store.set_read_only(true);
        let log = UsageLog::new(&store);
        let err = log
            .append(&LogRecord::periodic(at(1, 0, 0), 1))
            .unwrap_err();
        assert_eq!(err, LogError::new(LogOp::Append, MAIN_LOG_PATH, StoreError::Io));
    }

    #[test]
    fn rotation_keeps_marker_sample_per_day() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        for day in 1..=3u8 {
            for hour in 0..6u8 {
                let reading = Reading::from(day) * 1_000 + Reading::from(hour) * 10;
                log.append(&LogRecord::periodic(at(day, hour, 0), reading))
                    .unwrap();
            }
        }

        assert_eq!(log.rotate(), Ok(3));
        assert!(!store.exists(DAILY_LOG_PATH));
        assert_eq!(readings(&log).as_slice(), &[1_020, 2_020, 3_020]);
    }

    #[test]
    fn day_without_marker_keeps_its_last_record() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        log.append(&LogRecord::periodic(at(1, 2, 0), 10)).unwrap();
        log.append(&LogRecord::periodic(at(1, 9, 0), 30)).unwrap();
        log.append(&LogRecord::new(at(2, 7, 12), 40, RecordTag::Startup))
            .unwrap();
        log.append(&LogRecord::periodic(at(2, 8, 0), 50)).unwrap();

        assert_eq!(log.rotate(), Ok(2));
        assert_eq!(readings(&log).as_slice(), &[10, 50]);
    }

    #[test]
    fn marker_hour_ignores_non_periodic_records() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        log.append(&LogRecord::new(at(1, 2, 0), 5, RecordTag::Startup))
            .unwrap();
        log.append(&LogRecord::periodic(at(1, 2, 30), 7)).unwrap();
        log.append(&LogRecord::periodic(at(1, 3, 0), 9)).unwrap();

        assert_eq!(log.rotate(), Ok(1));
        assert_eq!(readings(&log).as_slice(), &[7]);
    }

    #[test]
    fn summarize_without_main_log_fails() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        assert_eq!(
            log.summarize(),
            Err(LogError::new(
                LogOp::Summarize,
                MAIN_LOG_PATH,
                StoreError::NotFound
            ))
        );
        assert_eq!(
            log.compress(),
            Err(LogError::new(
                LogOp::Compress,
                DAILY_LOG_PATH,
                StoreError::NotFound
            ))
        );
    }

    #[test]
    fn compress_overwrites_instead_of_appending() {
        let store = Store::new();
        raw(&store, MAIN_LOG_PATH, "2024/06/01,01:00:00,100,gal.\n");
        raw(&store, DAILY_LOG_PATH, "2024/06/01,02:00:00,900,gal.\n");
        let log = UsageLog::new(&store);

        log.compress().unwrap();
        assert_eq!(readings(&log).as_slice(), &[900]);
    }

    #[test]
    fn reset_replaces_history() {
        let store = Store::new();
        let log = UsageLog::new(&store);
        log.append(&LogRecord::periodic(at(1, 1, 0), 5_000)).unwrap();
        log.reset(&LogRecord::new(at(1, 1, 30), 800, RecordTag::Reset))
            .unwrap();

        assert_eq!(log.scan_latest_reading(), Ok(Some(800)));
        assert!(!store.exists(DAILY_LOG_PATH));
    }
}
