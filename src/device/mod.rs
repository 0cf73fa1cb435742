//! Controller board: believed actuator state, wire protocol and the session
//! that owns the serial link.

#[cfg(feature = "instrument_serial")]
pub mod port;
pub mod protocol;
pub mod session;

pub use protocol::{Feedback, FeedbackKind};
pub use session::{DeviceSession, DynSerial, SerialPortIO, SessionTimeouts, Transition};

use crate::command::ValveKind;
use std::fmt;

/// Something on the board that can be switched on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    /// LED driver
    Led,
    /// Air pump
    Pump,
    /// Shock generator
    Shock,
    /// One of the valves
    Valve(ValveKind),
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actuator::Led => f.write_str("LED"),
            Actuator::Pump => f.write_str("pump"),
            Actuator::Shock => f.write_str("shock"),
            Actuator::Valve(kind) => write!(f, "{} valve", kind.label()),
        }
    }
}

/// Pump state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpState {
    /// Running
    pub on: bool,
    /// Last PWM value confirmed by the board
    pub value: u8,
}

impl Default for PumpState {
    fn default() -> Self {
        Self {
            on: false,
            value: 255,
        }
    }
}

/// Best-known belief about the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    /// LED on
    pub led: bool,
    /// Pump
    pub pump: PumpState,
    /// Shock pulses running
    pub shock: bool,
    /// Air valve open
    pub air: bool,
    /// Odor A valve open
    pub odor_a: bool,
    /// Odor B valve open
    pub odor_b: bool,
}

impl DeviceState {
    /// Whether the actuator is believed on.
    pub fn is_on(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Led => self.led,
            Actuator::Pump => self.pump.on,
            Actuator::Shock => self.shock,
            Actuator::Valve(kind) => self.valve(kind),
        }
    }

    /// Whether a valve is believed open.
    pub fn valve(&self, kind: ValveKind) -> bool {
        match kind {
            ValveKind::Air => self.air,
            ValveKind::OdorA => self.odor_a,
            ValveKind::OdorB => self.odor_b,
        }
    }

    pub(crate) fn set(&mut self, actuator: Actuator, on: bool) {
        match actuator {
            Actuator::Led => self.led = on,
            Actuator::Pump => self.pump.on = on,
            Actuator::Shock => self.shock = on,
            Actuator::Valve(ValveKind::Air) => self.air = on,
            Actuator::Valve(ValveKind::OdorA) => self.odor_a = on,
            Actuator::Valve(ValveKind::OdorB) => self.odor_b = on,
        }
    }

    pub(crate) fn close_all_valves(&mut self) {
        self.air = false;
        self.odor_a = false;
        self.odor_b = false;
    }

    /// Zero every on/off flag; the pump value is kept.
    pub(crate) fn reset(&mut self) {
        let value = self.pump.value;
        *self = Self::default();
        self.pump.value = value;
    }

    /// Open valves, for shutdown.
    pub fn open_valves(&self) -> Vec<ValveKind> {
        ValveKind::ALL
            .into_iter()
            .filter(|kind| self.valve(*kind))
            .collect()
    }

    /// Apply a feedback line that reports hardware state.
    ///
    /// Returns whether the line carried state information.
    pub(crate) fn apply(&mut self, feedback: &Feedback) -> bool {
        match feedback {
            Feedback::LightOn => self.led = true,
            Feedback::LightOff => self.led = false,
            Feedback::PulsingOn => self.led = true,
            Feedback::PulsingOff => self.led = false,
            Feedback::PumpOn => self.pump.on = true,
            Feedback::PumpOff => {
                // The firmware closes every valve when the pump stops.
                self.pump.on = false;
                self.close_all_valves();
            }
            Feedback::PumpValueSet(Some(value)) => self.pump.value = *value,
            Feedback::ShockOn => self.shock = true,
            Feedback::ShockOff => self.shock = false,
            Feedback::ValveOpen(kind) => self.set(Actuator::Valve(*kind), true),
            Feedback::ValveClosed(kind) => self.set(Actuator::Valve(*kind), false),
            Feedback::AllValvesClosed => self.close_all_valves(),
            Feedback::AllTerminated => self.reset(),
            _ => return false,
        }
        true
    }
}
