//! Protocol and event logs.
//!
//! The protocol log records what was run in a replayable, padded text format:
//!
//! ```text
//! pump:on                                  # switch pump on
//!
//! ISI 2.013                                # inter-stimulus interval: 2.013 s
//!
//! ```
//!
//! The event log records every input line, frame and acknowledgment with a
//! wall-clock timestamp.

use crate::command::{Command, CommandKind, SessionParams, Switch};
use crate::device::DeviceState;
use crate::error::StimResult;
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::warn;

/// Width of the command column.
pub const COMMAND_COLUMN: usize = 40;

/// One protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEntry {
    /// Replayable command token
    pub token: String,
    /// Human comment
    pub comment: String,
}

impl ProtocolEntry {
    /// New entry.
    pub fn new(token: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            comment: comment.into(),
        }
    }

    /// Padded text, including the separating blank line.
    pub fn render(&self) -> String {
        format!(
            "{:<width$} # {}\n\n",
            self.token,
            self.comment,
            width = COMMAND_COLUMN
        )
    }

    /// Entry for an executed command, or `None` for commands that are not
    /// part of a protocol (help, show, listings).
    ///
    /// `state` is the device state after the command ran.
    pub fn describe(
        command: &Command,
        params: &SessionParams,
        state: &DeviceState,
        stim_alias: &str,
    ) -> Option<Self> {
        let entry = match command.kind() {
            CommandKind::PlayVideoOnce => Self::new("Play", "playing video stimulus"),
            CommandKind::PlayVideoTimes(n) => {
                Self::new(format!("Play {n}"), format!("playing video {n} times"))
            }
            CommandKind::SelectStimulus => Self::new(
                format!("{stim_alias} {}", params.stimulus),
                format!("set {stim_alias} to {}", params.stimulus),
            ),
            CommandKind::LedToggle => {
                let state = if state.led { "ON" } else { "OFF" };
                Self::new("LED", format!("LED {state}"))
            }
            CommandKind::LedTimed(s) => Self::new(format!("LED {s}"), format!("LED ON for {s} s")),
            CommandKind::Pulse(spec) => Self::new(
                format!("Pulse {} {} {}", spec.span_s, spec.freq_hz, spec.width_ms),
                format!(
                    "LED pulsing for {:.3} s at {:.3} Hz with {} ms pulse width",
                    spec.span_s, spec.freq_hz, spec.width_ms
                ),
            ),
            CommandKind::VideoLedCoordinate(timer_ms) => Self::new(
                format!("LEDandVideo {:.3}", *timer_ms as f64 / 1000.0),
                format!("coordinated video playing and LED with timer = {timer_ms} ms"),
            ),
            CommandKind::InterStimulusInterval(s) => isi_entry(*s),
            CommandKind::Trigger => Self::new("Trigger", "100 ms trigger signal"),
            CommandKind::StopAll => Self::new("Stop", "terminate all operations on the board"),
            CommandKind::Pump(switch) => Self::new(
                command.text(),
                format!("{} pump", switch_verb(*switch, "switch on", "switch off")),
            ),
            CommandKind::PumpSetValue(v) => {
                Self::new(command.text(), format!("set pump value to {v}"))
            }
            CommandKind::Shock(switch) => Self::new(
                command.text(),
                format!("{} shock pulses", switch_verb(*switch, "switch on", "switch off")),
            ),
            CommandKind::Valve(kind, switch) => Self::new(
                command.text(),
                format!("{} {} valve", switch_verb(*switch, "open", "close"), kind.label()),
            ),
            CommandKind::SetAttribute { name, raw, .. } => Self::new(
                format!("Set_Attribute {name}={raw}"),
                format!("set parameter {name} = {raw}"),
            ),
            _ => return None,
        };
        Some(entry)
    }
}

fn switch_verb(switch: Switch, on: &'static str, off: &'static str) -> &'static str {
    match switch {
        Switch::Toggle => "toggle",
        Switch::On => on,
        Switch::Off => off,
    }
}

fn isi_entry(seconds: f64) -> ProtocolEntry {
    ProtocolEntry::new(
        format!("ISI {seconds:.3}"),
        format!("inter-stimulus interval: {seconds:.3} s"),
    )
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn append(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Autosaved protocol of the session.
#[derive(Debug)]
pub struct ProtocolLog {
    path: PathBuf,
    last_stimulus: Option<Instant>,
}

impl ProtocolLog {
    /// `dir/autosaved_<YYYYMMDD_HHMMSS>.txt`
    pub fn create(dir: &Path) -> StimResult<Self> {
        fs::create_dir_all(dir)?;
        let name = format!("autosaved_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
        Ok(Self::at(dir.join(name)))
    }

    /// Log at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_stimulus: None,
        }
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry.
    ///
    /// For direct commands the measured time since the previous logged
    /// command is written first as an `ISI` entry. Inside a series that entry
    /// is skipped; the series' own `isi` commands carry the timing.
    pub fn record(&mut self, entry: &ProtocolEntry, in_series: bool) -> StimResult<()> {
        let now = Instant::now();
        let mut text = String::new();
        if !in_series {
            if let Some(last) = self.last_stimulus {
                text.push_str(&isi_entry(now.duration_since(last).as_secs_f64()).render());
            }
        }
        text.push_str(&entry.render());
        append(&self.path, &text)?;
        self.last_stimulus = Some(now);
        Ok(())
    }

    /// Restart interval measurement from now.
    pub fn mark(&mut self) {
        self.last_stimulus = Some(Instant::now());
    }
}

/// Timestamped log of inputs and serial traffic.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// `dir/<YYYYMMDD>[_name]_log.txt`
    pub fn create(dir: &Path, name: Option<&str>) -> StimResult<Self> {
        fs::create_dir_all(dir)?;
        let date = Local::now().format("%Y%m%d");
        let file = match name {
            Some(name) if !name.is_empty() => format!("{date}_{name}_log.txt"),
            _ => format!("{date}_log.txt"),
        };
        Ok(Self::at(dir.join(file)))
    }

    /// Log at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Free-form line.
    pub fn note(&self, text: &str) {
        self.write(&format!("{text} at {}\n", timestamp()));
    }

    /// Operator input.
    pub fn input(&self, line: &str) {
        self.write(&format!("\nInput '{line}' at {}\n", timestamp()));
    }

    /// Frame written to the board.
    pub fn frame_sent(&self, frame: &str) {
        self.write(&format!("Sent '{frame}' at {}\n", timestamp()));
    }

    /// Line received from the board.
    pub fn feedback(&self, line: &str) {
        self.write(&format!("Feedback '{line}' at {}\n", timestamp()));
    }

    fn write(&self, text: &str) {
        if let Err(err) = append(&self.path, text) {
            warn!(error = %err, file = %self.path.display(), "Event log write failed");
        }
    }
}

/// Protocol files in `dir`, newest first.
pub fn list_protocols(dir: &Path) -> StimResult<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        files.push((modified, path));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}
