//! Device configuration stored as `KEY=value` lines in `/config.txt`.
//!
//! ```text
//! # reed meter
//! WIFI_SSID=garage
//! WIFI_PASS=hunter22
//! TZ_OFFSET=-8
//! METER_OFFSET=123450
//! LOG_LIMIT=49152
//! ```
//!
//! Unknown keys, blank lines and `#` comments are ignored. The first
//! occurrence of a key wins. Values that do not parse leave the default.

use core::fmt::{self, Write as _};

use heapless::String;
use winnow::ascii::space0;
use winnow::prelude::*;
use winnow::token::{rest, take_while};

use crate::counter::Reading;
use crate::record::MAX_LINE_LEN;
use crate::store::{Line, LineReader, OpenMode, Storage, StorageFile, StoreError};

/// Location of the configuration file.
pub const CONFIG_PATH: &str = "/config.txt";

/// Main-log size above which boot rotates the log.
pub const DEFAULT_LOG_LIMIT: usize = 48 * 1024;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

/// Keys understood in the configuration file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigKey {
    WifiSsid,
    WifiPassword,
    TimezoneOffset,
    MeterOffset,
    LogLimit,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 5] = [
        ConfigKey::WifiSsid,
        ConfigKey::WifiPassword,
        ConfigKey::TimezoneOffset,
        ConfigKey::MeterOffset,
        ConfigKey::LogLimit,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ConfigKey::WifiSsid => "WIFI_SSID",
            ConfigKey::WifiPassword => "WIFI_PASS",
            ConfigKey::TimezoneOffset => "TZ_OFFSET",
            ConfigKey::MeterOffset => "METER_OFFSET",
            ConfigKey::LogLimit => "LOG_LIMIT",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Persisted device settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub wifi_ssid: String<MAX_SSID_LEN>,
    pub wifi_password: String<MAX_PASSWORD_LEN>,
    /// Local time offset from UTC, in whole hours.
    pub timezone_offset_hours: i32,
    /// Reading installed at boot when the log holds nothing higher.
    pub meter_offset: Reading,
    pub log_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            timezone_offset_hours: 0,
            meter_offset: 0,
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

impl Config {
    /// Reads [`CONFIG_PATH`]. `Ok(None)` means the file does not exist.
    pub fn load<S: Storage>(store: &S) -> Result<Option<Self>, StoreError> {
        let file = match store.open(CONFIG_PATH, OpenMode::Read) {
            Ok(file) => file,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut reader: LineReader<_, { MAX_LINE_LEN + 32 }> = LineReader::new(file);
        let mut parser = ConfigParser::default();
        while let Some(line) = reader.next_line()? {
            if let Line::Text(text) = line {
                parser.apply_line(text);
            }
        }
        Ok(Some(parser.finish()))
    }

    /// Parses configuration text already held in memory.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut parser = ConfigParser::default();
        for line in text.lines() {
            parser.apply_line(line);
        }
        parser.finish()
    }

    /// Writes the configuration back to [`CONFIG_PATH`], replacing it.
    pub fn write_to<S: Storage>(&self, store: &S) -> Result<(), StoreError> {
        let mut file = store.open(CONFIG_PATH, OpenMode::Truncate)?;
        for key in ConfigKey::ALL {
            let mut line: String<{ MAX_LINE_LEN + 32 }> = String::new();
            write!(line, "{}=", key.name()).map_err(|_| StoreError::NoSpace)?;
            self.write_value(key, &mut line)
                .map_err(|_| StoreError::NoSpace)?;
            line.push('\n').map_err(|_| StoreError::NoSpace)?;
            file.write_all(line.as_bytes())?;
        }
        file.flush()
    }

    fn write_value<W: fmt::Write>(&self, key: ConfigKey, out: &mut W) -> fmt::Result {
        match key {
            ConfigKey::WifiSsid => out.write_str(&self.wifi_ssid),
            ConfigKey::WifiPassword => out.write_str(&self.wifi_password),
            ConfigKey::TimezoneOffset => write!(out, "{}", self.timezone_offset_hours),
            ConfigKey::MeterOffset => write!(out, "{}", self.meter_offset),
            ConfigKey::LogLimit => write!(out, "{}", self.log_limit),
        }
    }
}

#[derive(Default)]
struct ConfigParser {
    config: Config,
    seen: u8,
}

impl ConfigParser {
    fn apply_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        let mut input = trimmed;
        let Ok((name, value)) = entry.parse_next(&mut input) else {
            return;
        };
        let Some(key) = ConfigKey::from_name(name) else {
            return;
        };
        if self.seen & key.bit() != 0 {
            return;
        }
        self.seen |= key.bit();
        self.assign(key, value);
    }

    fn assign(&mut self, key: ConfigKey, value: &str) {
        let config = &mut self.config;
        match key {
            ConfigKey::WifiSsid => {
                if let Ok(ssid) = String::try_from(value) {
                    config.wifi_ssid = ssid;
                }
            }
            ConfigKey::WifiPassword => {
                if let Ok(password) = String::try_from(value) {
                    config.wifi_password = password;
                }
            }
            ConfigKey::TimezoneOffset => {
                if let Ok(hours) = value.parse::<i32>() {
                    if (-12..=14).contains(&hours) {
                        config.timezone_offset_hours = hours;
                    }
                }
            }
            ConfigKey::MeterOffset => {
                if let Ok(offset) = value.parse() {
                    config.meter_offset = offset;
                }
            }
            ConfigKey::LogLimit => {
                if let Ok(limit) = value.parse() {
                    config.log_limit = limit;
                }
            }
        }
    }

    fn finish(self) -> Config {
        self.config
    }
}

// `KEY = value`; the value runs to the end of the line.
fn entry<'i>(input: &mut &'i str) -> ModalResult<(&'i str, &'i str)> {
    let key = take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)?;
    (space0, '=', space0).parse_next(input)?;
    let value = rest.parse_next(input)?;
    Ok((key, value.trim_end()))
}
