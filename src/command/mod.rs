//! Command language: typed commands, the mutable-attribute table, the token
//! validator and the series/repetition parser.
//!
//! A [`Command`] can only be produced by [`Grammar::validate`]; every other
//! component receives commands that already passed validation.

pub mod attributes;
pub mod grammar;
pub mod series;

pub use attributes::{AttrValue, SessionParams};
pub use grammar::{Grammar, ShortcutLookup};
pub use series::{CommandSeries, RepetitionBlock, SeriesItem};

use std::fmt;
use std::time::Duration;

/// Words that can never be used as shortcut names.
pub const RESERVED_WORDS: &[&str] = &[
    "h", "help", "q", "v", "p", "t", "well", "u", "run", "load", "trig", "stim", "set", "show",
    "r", "isi", "pump", "shock", "air", "odor_a", "odor_b", "stop", "shortcuts",
];

/// Valves on the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValveKind {
    /// Clean air line
    Air,
    /// Odor A line
    OdorA,
    /// Odor B line
    OdorB,
}

impl ValveKind {
    /// All valves, in wire order.
    pub const ALL: [ValveKind; 3] = [ValveKind::Air, ValveKind::OdorA, ValveKind::OdorB];

    /// Token used both in the command language and on the wire.
    pub fn token(self) -> &'static str {
        match self {
            ValveKind::Air => "air",
            ValveKind::OdorA => "odor_a",
            ValveKind::OdorB => "odor_b",
        }
    }

    /// Case-insensitive lookup by token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.token().eq_ignore_ascii_case(token))
    }

    /// Human readable name ("odor A").
    pub fn label(self) -> &'static str {
        match self {
            ValveKind::Air => "air",
            ValveKind::OdorA => "odor A",
            ValveKind::OdorB => "odor B",
        }
    }
}

impl fmt::Display for ValveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Requested change for a two-state actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Invert the current confirmed state
    Toggle,
    /// Force on
    On,
    /// Force off
    Off,
}

impl Switch {
    /// Target state given the current one.
    pub fn target(self, current: bool) -> bool {
        match self {
            Switch::Toggle => !current,
            Switch::On => true,
            Switch::Off => false,
        }
    }
}

/// LED pulse train parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseSpec {
    /// Total span of the train in seconds
    pub span_s: f64,
    /// Pulse frequency in Hz
    pub freq_hz: f64,
    /// Width of each pulse in ms
    pub width_ms: u32,
}

/// Everything a validated command can ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Play the active stimulus once
    PlayVideoOnce,
    /// Play the active stimulus n times
    PlayVideoTimes(u32),
    /// Switch the LED on/off
    LedToggle,
    /// LED on for the given seconds
    LedTimed(f64),
    /// LED pulse train
    Pulse(PulseSpec),
    /// LED and video with a relative timer (ms, negative = video first)
    VideoLedCoordinate(i64),
    /// Wait between stimuli, seconds
    InterStimulusInterval(f64),
    /// 100 ms pulse on the trigger pin
    Trigger,
    /// Terminate every operation on the board
    StopAll,
    /// Pump on/off
    Pump(Switch),
    /// Pump PWM value
    PumpSetValue(u8),
    /// Shock pulses on/off
    Shock(Switch),
    /// Valve open/close
    Valve(ValveKind, Switch),
    /// Change a mutable attribute
    SetAttribute {
        /// Canonical attribute name
        name: &'static str,
        /// Value as typed
        raw: String,
        /// Parsed value
        value: AttrValue,
    },
    /// Print an attribute
    ShowAttribute(String),
    /// Run a stored shortcut
    ShortcutInvoke(String),
    /// Stop everything and leave the session
    Quit,
    /// Help text, optionally for one topic
    Help(Option<String>),
    /// Reload and list shortcuts
    ListShortcuts,
    /// Print "well"
    SayWell,
    /// Show "u" for a while
    ShowU,
    /// Print the start banner
    Run,
    /// List stored protocol files
    LoadProtocol,
    /// Choose the active stimulus
    SelectStimulus,
}

/// A validated command together with the token it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    text: String,
}

impl Command {
    pub(crate) fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// What the command does.
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Normalised token the command was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Duration the hardware is told to run for, if the command carries one.
    pub fn nominal_duration(&self) -> Option<Duration> {
        let secs = match &self.kind {
            CommandKind::LedTimed(s) | CommandKind::InterStimulusInterval(s) => *s,
            CommandKind::Pulse(spec) => spec.span_s,
            _ => return None,
        };
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Whether executing the command talks to the board or the display.
    pub fn touches_hardware(&self) -> bool {
        matches!(
            self.kind,
            CommandKind::PlayVideoOnce
                | CommandKind::PlayVideoTimes(_)
                | CommandKind::LedToggle
                | CommandKind::LedTimed(_)
                | CommandKind::Pulse(_)
                | CommandKind::VideoLedCoordinate(_)
                | CommandKind::Trigger
                | CommandKind::StopAll
                | CommandKind::Pump(_)
                | CommandKind::PumpSetValue(_)
                | CommandKind::Shock(_)
                | CommandKind::Valve(..)
                | CommandKind::Quit
        )
    }

    /// True for `isi<seconds>`.
    pub fn is_interval(&self) -> bool {
        matches!(self.kind, CommandKind::InterStimulusInterval(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            f.write_str("<Enter>")
        } else {
            f.write_str(&self.text)
        }
    }
}
