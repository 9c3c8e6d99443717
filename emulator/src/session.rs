use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use meter_core::clock::WallClock;
use meter_core::counter::{PulseSampler, PulseTally, Reading};
use meter_core::debounce::PulseDebouncer;
use meter_core::meter::{Meter, NoopConnectivity, PollOutcome};
use meter_core::record::LogRecord;
use meter_core::store::Storage;
use tracing::{debug, info};

use crate::clock::HostClock;
use crate::diagnostics::TracingDiagnostics;
use crate::line::{PulseShape, SimulatedLine, spawn_pulse_train};
use crate::store::DirStore;

const DEFAULT_HISTORY: usize = 10;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("reading", "reading              - show the current reading"),
    ("status", "status               - reading, clock and storage summary"),
    ("correct", "correct <delta>      - shift the reading by a signed amount"),
    ("reset", "reset <value>        - restart the log from a new reading"),
    ("pulse", "pulse [count]        - drive bouncy reed closures onto the line"),
    ("rotate", "rotate               - keep one record per day in the log"),
    ("history", "history [count]      - show the newest log records"),
    ("files", "files                - list files in the store"),
    ("diag", "diag                 - show recent diagnostic events"),
    ("help", "help [topic]         - show help for a command"),
    ("exit", "exit                 - stop the emulator"),
];

/// Operator command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Reading,
    Status,
    Correct(Reading),
    Reset(Reading),
    Pulse(u32),
    Rotate,
    History(usize),
    Files,
    Diag,
    Help(Option<String>),
    Exit,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut words = input.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_owned());
        };
        let argument = words.next();
        if let Some(extra) = words.next() {
            return Err(format!("unexpected `{extra}`"));
        }

        let command = match verb.to_ascii_lowercase().as_str() {
            "reading" => Command::Reading,
            "status" => Command::Status,
            "correct" => Command::Correct(required(argument, "delta")?),
            "reset" => Command::Reset(required(argument, "value")?),
            "pulse" => Command::Pulse(optional(argument, 1)?),
            "rotate" => Command::Rotate,
            "history" => Command::History(optional(argument, DEFAULT_HISTORY)?),
            "files" => Command::Files,
            "diag" => Command::Diag,
            "help" => Command::Help(argument.map(str::to_owned)),
            "exit" | "quit" => Command::Exit,
            other => return Err(format!("unknown command `{other}`")),
        };

        match (&command, argument) {
            (
                Command::Reading
                | Command::Status
                | Command::Rotate
                | Command::Files
                | Command::Diag
                | Command::Exit,
                Some(extra),
            ) => Err(format!("unexpected `{extra}`")),
            _ => Ok(command),
        }
    }
}

fn required<T: std::str::FromStr>(argument: Option<&str>, name: &str) -> Result<T, String> {
    let value = argument.ok_or_else(|| format!("missing <{name}>"))?;
    value
        .trim_start_matches('+')
        .parse()
        .map_err(|_| format!("invalid {name} `{value}`"))
}

fn optional<T: std::str::FromStr>(argument: Option<&str>, default: T) -> Result<T, String> {
    match argument {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| format!("invalid count `{value}`")),
    }
}

/// What the console wants the session loop to do next.
#[derive(Debug, Eq, PartialEq)]
pub enum Reply {
    Lines(Vec<String>),
    Exit,
}

/// Executes operator commands against a running meter.
pub struct Console {
    line: Arc<SimulatedLine>,
    shape: PulseShape,
}

impl Console {
    pub fn new(line: Arc<SimulatedLine>, shape: PulseShape) -> Self {
        Self { line, shape }
    }

    pub fn handle<S, C>(
        &self,
        meter: &mut Meter<'_, S, C, TracingDiagnostics>,
        input: &str,
    ) -> Reply
    where
        S: Storage,
        C: WallClock,
    {
        let command = match Command::parse(input) {
            Ok(command) => command,
            Err(err) => return Reply::Lines(vec![format!("ERR syntax {err}")]),
        };
        debug!(?command, "console command");

        let lines = match command {
            Command::Exit => return Reply::Exit,
            Command::Reading => vec![format!("reading {} gal.", meter.current_reading())],
            Command::Status => meter
                .status_snapshot()
                .to_string()
                .lines()
                .map(str::to_owned)
                .collect(),
            Command::Correct(delta) => {
                let reading = meter.apply_correction(delta);
                vec![format!("OK reading {reading} gal.")]
            }
            Command::Reset(value) => match meter.reset_reading(value) {
                Ok(reading) => vec![format!("OK reading {reading} gal., log restarted")],
                Err(err) => vec![format!("ERR {err}")],
            },
            Command::Pulse(count) => {
                spawn_pulse_train(Arc::clone(&self.line), count, self.shape);
                vec![format!("OK {count} pulse(s) queued")]
            }
            Command::Rotate => match meter.rotate() {
                Ok(days) => vec![format!("OK {days} day(s) kept")],
                Err(err) => vec![format!("ERR {err}")],
            },
            Command::History(count) => history(meter, count),
            Command::Files => files(meter.store()),
            Command::Diag => {
                let lines: Vec<String> = meter
                    .diagnostics()
                    .recorder()
                    .oldest_first()
                    .map(ToString::to_string)
                    .collect();
                if lines.is_empty() {
                    vec!["no diagnostic events".to_owned()]
                } else {
                    lines
                }
            }
            Command::Help(topic) => help(topic.as_deref()),
        };
        Reply::Lines(lines)
    }
}

fn history<S, C>(meter: &Meter<'_, S, C, TracingDiagnostics>, count: usize) -> Vec<String>
where
    S: Storage,
    C: WallClock,
{
    let mut newest: VecDeque<LogRecord> = VecDeque::with_capacity(count);
    let visit = |record: &LogRecord| {
        if count == 0 {
            return;
        }
        if newest.len() == count {
            newest.pop_front();
        }
        newest.push_back(*record);
    };
    match meter.usage_log().for_each_record(visit) {
        Ok(0) => newest.iter().map(ToString::to_string).collect(),
        Ok(skipped) => newest
            .iter()
            .map(ToString::to_string)
            .chain([format!("({skipped} unreadable line(s) skipped)")])
            .collect(),
        Err(err) => vec![format!("ERR {err}")],
    }
}

fn files<S: Storage>(store: &S) -> Vec<String> {
    let mut lines = Vec::new();
    let listed = store.list(&mut |name, size| lines.push(format!("{name} {size}B")));
    if let Err(err) = listed {
        return vec![format!("ERR {err}")];
    }
    match store.usage() {
        Ok(usage) => lines.push(format!(
            "{}B used, {}B free of {}B",
            usage.used,
            usage.free(),
            usage.total
        )),
        Err(err) => lines.push(format!("ERR usage {err}")),
    }
    lines
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        None => HELP_TOPICS
            .iter()
            .map(|(_, text)| (*text).to_owned())
            .collect(),
        Some(topic) => HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
            .map_or_else(
                || vec![format!("ERR no help for `{topic}`")],
                |(_, text)| vec![(*text).to_owned()],
            ),
    }
}

/// Timing knobs for one session.
#[derive(Copy, Clone, Debug)]
pub struct SessionSettings {
    pub sample_period: Duration,
    pub window_ticks: u16,
    pub poll_period: Duration,
}

impl SessionSettings {
    /// Real-time length of the debounce window.
    pub fn window(&self) -> Duration {
        self.sample_period * u32::from(self.window_ticks)
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Daily restart; the next session continues from this clock.
    Restart(HostClock),
    Exit,
}

/// Boots a meter and runs it until the daily restart or an operator exit.
///
/// Every session starts with a fresh pulse tally, as a rebooted device
/// would, and recovers its reading from the store.
pub fn run(
    store: &DirStore,
    clock: HostClock,
    line: &Arc<SimulatedLine>,
    commands: &Receiver<String>,
    settings: &SessionSettings,
) -> Result<SessionEnd> {
    let tally = PulseTally::new();
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| sample_line(line, &tally, &stop, settings));
        let outcome = drive(store, clock, line, commands, settings, &tally);
        stop.store(true, Ordering::Release);
        outcome
    })
}

fn sample_line(
    line: &SimulatedLine,
    tally: &PulseTally,
    stop: &AtomicBool,
    settings: &SessionSettings,
) {
    let debouncer = PulseDebouncer::new(settings.window_ticks, line.level());
    let mut sampler = PulseSampler::new(debouncer, tally);
    let mut deadline = Instant::now();
    while !stop.load(Ordering::Acquire) {
        sampler.tick(line.level());
        deadline += settings.sample_period;
        thread::sleep(deadline.saturating_duration_since(Instant::now()));
    }
}

fn drive(
    store: &DirStore,
    clock: HostClock,
    line: &Arc<SimulatedLine>,
    commands: &Receiver<String>,
    settings: &SessionSettings,
    tally: &PulseTally,
) -> Result<SessionEnd> {
    let mut meter = Meter::boot(store, clock, TracingDiagnostics::new(), tally);
    info!(reading = meter.current_reading(), "meter booted");

    let console = Console::new(Arc::clone(line), PulseShape::for_window(settings.window()));
    let mut connectivity = NoopConnectivity::new();
    let stdout = io::stdout();
    prompt(&mut stdout.lock())?;

    loop {
        if meter.poll(&mut connectivity) == PollOutcome::Restart {
            info!(reading = meter.current_reading(), "daily restart");
            return Ok(SessionEnd::Restart(*meter.clock()));
        }

        match commands.recv_timeout(settings.poll_period) {
            Ok(input) => {
                if input.trim().is_empty() {
                    prompt(&mut stdout.lock())?;
                    continue;
                }
                match console.handle(&mut meter, &input) {
                    Reply::Exit => return Ok(SessionEnd::Exit),
                    Reply::Lines(lines) => {
                        let mut out = stdout.lock();
                        for line in lines {
                            writeln!(out, "{line}")?;
                        }
                        prompt(&mut out)?;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(SessionEnd::Exit),
        }
    }
}

fn prompt(out: &mut impl Write) -> io::Result<()> {
    write!(out, "> ")?;
    out.flush()
}
