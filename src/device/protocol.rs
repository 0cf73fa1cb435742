//! Wire protocol of the controller board.
//!
//! Frames are ASCII lines terminated by `\n`, one command per line. The board
//! answers with fixed acknowledgment lines and may send unsolicited lines
//! (`Warning: ...`, `All valves CLOSED`, valve and pump reports) at any time.

use super::Actuator;
use crate::command::{PulseSpec, ValveKind};
use std::fmt;
use std::time::Duration;

/// Frame that terminates every operation on the board.
pub const QUIT_FRAME: &str = "quit";
/// Frame that emits a 100 ms trigger pulse.
pub const TRIGGER_FRAME: &str = "trigger";
/// Warning that accompanies a refused valve opening.
pub const PUMP_OFF_WARNING: &str = "Cannot open valve - Pump is OFF";

/// Frame switching an actuator on or off.
pub fn switch_frame(actuator: Actuator, on: bool) -> String {
    let action = if on { "on" } else { "off" };
    match actuator {
        Actuator::Led => action.to_string(),
        Actuator::Pump => format!("pump:{action}"),
        Actuator::Shock => format!("shock:{action}"),
        Actuator::Valve(kind) => format!("{}:{action}", kind.token()),
    }
}

/// `r<ms>d<delayMs>`: LED on for `duration` after `delay`.
pub fn led_timer_frame(duration: Duration, delay: Duration) -> String {
    format!("r{}d{}", duration.as_millis(), delay.as_millis())
}

/// `p<ms>f<mHz>w<widthMs>`
pub fn pulse_frame(spec: &PulseSpec) -> String {
    let span_ms = (spec.span_s * 1000.0).max(0.0) as u64;
    let freq_mhz = (spec.freq_hz * 1000.0).max(0.0) as u64;
    format!("p{span_ms}f{freq_mhz}w{}", spec.width_ms)
}

/// `pump:value:<0-255>`
pub fn pump_value_frame(value: u8) -> String {
    format!("pump:value:{value}")
}

/// A classified line from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// `Light ON`
    LightOn,
    /// `Light OFF`
    LightOff,
    /// `Pulsing ON`
    PulsingOn,
    /// `Pulsing OFF`
    PulsingOff,
    /// `Trigger ON`
    TriggerOn,
    /// `Trigger OFF`
    TriggerOff,
    /// `Pump ON`
    PumpOn,
    /// `Pump OFF...`
    PumpOff,
    /// `Pump value set to N`
    PumpValueSet(Option<u8>),
    /// `Shock pulses ON`
    ShockOn,
    /// `Shock pulses OFF`
    ShockOff,
    /// `<Valve> valve OPEN`
    ValveOpen(ValveKind),
    /// `<Valve> valve CLOSED`
    ValveClosed(ValveKind),
    /// `All valves CLOSED`
    AllValvesClosed,
    /// `All operations terminated`
    AllTerminated,
    /// `Warning: ...`
    Warning(String),
    /// `Invalid ...`: the board refused the command
    Refused(String),
    /// Anything else
    Other(String),
}

impl Feedback {
    /// Classify one line (without its terminator).
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line {
            "Light ON" => return Feedback::LightOn,
            "Light OFF" => return Feedback::LightOff,
            "Pulsing ON" => return Feedback::PulsingOn,
            "Pulsing OFF" => return Feedback::PulsingOff,
            "Trigger ON" => return Feedback::TriggerOn,
            "Trigger OFF" => return Feedback::TriggerOff,
            "Pump ON" => return Feedback::PumpOn,
            "Shock pulses ON" => return Feedback::ShockOn,
            "Shock pulses OFF" => return Feedback::ShockOff,
            "All valves CLOSED" => return Feedback::AllValvesClosed,
            "All operations terminated" => return Feedback::AllTerminated,
            _ => {}
        }
        if line.starts_with("Warning:") {
            return Feedback::Warning(line.to_string());
        }
        if line.starts_with("Pump OFF") {
            return Feedback::PumpOff;
        }
        if let Some(rest) = line.strip_prefix("Pump value set to") {
            return Feedback::PumpValueSet(rest.trim().parse().ok());
        }
        if line.starts_with("Invalid") {
            return Feedback::Refused(line.to_string());
        }
        if let Some(valve) = line.strip_suffix(" valve OPEN").and_then(valve_name) {
            return Feedback::ValveOpen(valve);
        }
        if let Some(valve) = line.strip_suffix(" valve CLOSED").and_then(valve_name) {
            return Feedback::ValveClosed(valve);
        }
        Feedback::Other(line.to_string())
    }

    /// Kind used to match the line against an expected acknowledgment.
    pub fn kind(&self) -> Option<FeedbackKind> {
        let kind = match self {
            Feedback::LightOn => FeedbackKind::LightOn,
            Feedback::LightOff => FeedbackKind::LightOff,
            Feedback::PulsingOn => FeedbackKind::PulsingOn,
            Feedback::PulsingOff => FeedbackKind::PulsingOff,
            Feedback::TriggerOn => FeedbackKind::TriggerOn,
            Feedback::TriggerOff => FeedbackKind::TriggerOff,
            Feedback::PumpOn => FeedbackKind::PumpOn,
            Feedback::PumpOff => FeedbackKind::PumpOff,
            Feedback::PumpValueSet(_) => FeedbackKind::PumpValueSet,
            Feedback::ShockOn => FeedbackKind::ShockOn,
            Feedback::ShockOff => FeedbackKind::ShockOff,
            Feedback::ValveOpen(kind) => FeedbackKind::ValveOpen(*kind),
            Feedback::ValveClosed(kind) => FeedbackKind::ValveClosed(*kind),
            Feedback::AllValvesClosed => FeedbackKind::AllValvesClosed,
            Feedback::AllTerminated => FeedbackKind::AllTerminated,
            Feedback::Warning(_) | Feedback::Refused(_) | Feedback::Other(_) => return None,
        };
        Some(kind)
    }

    /// Lines the board may send without being asked.
    ///
    /// These are applied to the believed state even while another
    /// acknowledgment is awaited.
    pub fn is_unsolicited_report(&self) -> bool {
        matches!(
            self,
            Feedback::ValveOpen(_)
                | Feedback::ValveClosed(_)
                | Feedback::AllValvesClosed
                | Feedback::PumpOn
                | Feedback::PumpOff
        )
    }
}

/// Acknowledgment the session can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// `Light ON`
    LightOn,
    /// `Light OFF`
    LightOff,
    /// `Pulsing ON`
    PulsingOn,
    /// `Pulsing OFF`
    PulsingOff,
    /// `Trigger ON`
    TriggerOn,
    /// `Trigger OFF`
    TriggerOff,
    /// `Pump ON`
    PumpOn,
    /// `Pump OFF`
    PumpOff,
    /// `Pump value set to`
    PumpValueSet,
    /// `Shock pulses ON`
    ShockOn,
    /// `Shock pulses OFF`
    ShockOff,
    /// `<Valve> valve OPEN`
    ValveOpen(ValveKind),
    /// `<Valve> valve CLOSED`
    ValveClosed(ValveKind),
    /// `All valves CLOSED`
    AllValvesClosed,
    /// `All operations terminated`
    AllTerminated,
}

impl FeedbackKind {
    /// Acknowledgment confirming a switch of `actuator` to `on`.
    pub fn for_switch(actuator: Actuator, on: bool) -> Self {
        match (actuator, on) {
            (Actuator::Led, true) => FeedbackKind::LightOn,
            (Actuator::Led, false) => FeedbackKind::LightOff,
            (Actuator::Pump, true) => FeedbackKind::PumpOn,
            (Actuator::Pump, false) => FeedbackKind::PumpOff,
            (Actuator::Shock, true) => FeedbackKind::ShockOn,
            (Actuator::Shock, false) => FeedbackKind::ShockOff,
            (Actuator::Valve(kind), true) => FeedbackKind::ValveOpen(kind),
            (Actuator::Valve(kind), false) => FeedbackKind::ValveClosed(kind),
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackKind::LightOn => f.write_str("Light ON"),
            FeedbackKind::LightOff => f.write_str("Light OFF"),
            FeedbackKind::PulsingOn => f.write_str("Pulsing ON"),
            FeedbackKind::PulsingOff => f.write_str("Pulsing OFF"),
            FeedbackKind::TriggerOn => f.write_str("Trigger ON"),
            FeedbackKind::TriggerOff => f.write_str("Trigger OFF"),
            FeedbackKind::PumpOn => f.write_str("Pump ON"),
            FeedbackKind::PumpOff => f.write_str("Pump OFF"),
            FeedbackKind::PumpValueSet => f.write_str("Pump value set to"),
            FeedbackKind::ShockOn => f.write_str("Shock pulses ON"),
            FeedbackKind::ShockOff => f.write_str("Shock pulses OFF"),
            FeedbackKind::ValveOpen(kind) => write!(f, "{} valve OPEN", wire_name(*kind)),
            FeedbackKind::ValveClosed(kind) => write!(f, "{} valve CLOSED", wire_name(*kind)),
            FeedbackKind::AllValvesClosed => f.write_str("All valves CLOSED"),
            FeedbackKind::AllTerminated => f.write_str("All operations terminated"),
        }
    }
}

/// Valve name as the firmware prints it.
fn wire_name(kind: ValveKind) -> &'static str {
    match kind {
        ValveKind::Air => "Air",
        ValveKind::OdorA => "Odor_A",
        ValveKind::OdorB => "Odor_B",
    }
}

fn valve_name(prefix: &str) -> Option<ValveKind> {
    // Only the first word names the valve ("Air valve OPEN").
    let word = prefix.split_whitespace().next()?;
    ValveKind::from_token(word)
}
