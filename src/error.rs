//! Error types for the stimulus controller.
//!
//! This module defines `StimError`, the single error type shared by the command
//! grammar, the shortcut store, the execution scheduler and the device session.
//! It is built with `thiserror` so every layer can propagate faults with `?`.
//!
//! ## Error Hierarchy
//!
//! `StimError` variants fall into three groups:
//!
//! - **Input errors** (`Syntax`, `UnknownAttribute`, `AttributeNotMutable`,
//!   `InvalidAttributeValue`, `StimulusUnavailable`, `SeriesValidationFailed`,
//!   the shortcut variants): reported to the operator, the input loop continues.
//! - **Device refusals** (`InterlockViolation`, `DeviceRejected`, `LedBusy`,
//!   `SerialUnavailable`): the command did not run; device state is unchanged.
//! - **Protocol faults** (`ProtocolTimeout`, `UnexpectedFeedback`,
//!   `SerialUnexpectedEof`, `Interrupted`): the in-flight series is aborted and
//!   the true hardware state is unknown until `stop_all` resynchronises it.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the controller error type.
pub type StimResult<T> = std::result::Result<T, StimError>;

/// Primary error type of the controller.
#[derive(Error, Debug)]
pub enum StimError {
    /// Token does not match any command form.
    #[error("Invalid command '{0}'")]
    Syntax(String),

    /// `set:`/`show:` names an attribute the session does not have.
    #[error("No attribute named '{0}'")]
    UnknownAttribute(String),

    /// Attribute exists but cannot be changed at runtime.
    #[error("Attribute '{0}' is not immediately mutable")]
    AttributeNotMutable(String),

    /// Value does not parse as the attribute's declared type or range.
    #[error("Invalid value '{value}' for {attribute}: {reason}")]
    InvalidAttributeValue {
        /// Attribute name
        attribute: String,
        /// Raw value as typed
        value: String,
        /// Why it was refused
        reason: String,
    },

    /// Stimulus name is not among the loaded stimuli.
    #[error("Stimulus '{name}' is not available (available: {available})")]
    StimulusUnavailable {
        /// Requested name
        name: String,
        /// Comma separated list of loaded names
        available: String,
    },

    /// One token of a chained series failed the up-front check; nothing ran.
    #[error("Invalid command '{token}' at position {index} of series: {source}")]
    SeriesValidationFailed {
        /// Offending token
        token: String,
        /// Zero-based position in the expanded series
        index: usize,
        /// Underlying validation failure
        #[source]
        source: Box<StimError>,
    },

    /// Shortcut with this name is already defined.
    #[error("Shortcut name '{0}' already exists")]
    ShortcutExists(String),

    /// Name collides with a built-in command or the stimulus alias.
    #[error("Cannot use '{0}' as shortcut name because it's a built-in command")]
    ReservedName(String),

    /// Name contains characters other than letters, digits and underscore.
    #[error("Invalid shortcut name '{0}'. Use only letters, numbers, and underscore")]
    InvalidShortcutName(String),

    /// Shortcut refers back to itself, directly or through other shortcuts.
    #[error("Shortcut cycle detected: {0}")]
    ShortcutCycle(String),

    /// Nesting of shortcuts and repetition blocks exceeds the configured depth.
    #[error("Expansion nested deeper than {0} levels")]
    ExpansionTooDeep(usize),

    /// Expanded series would contain more commands than allowed.
    #[error("Expanded series exceeds {0} commands")]
    ExpansionTooLarge(usize),

    /// No controller board is connected.
    #[error("Serial communication is unavailable")]
    SerialUnavailable,

    /// Board closed the connection.
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// No acknowledgment arrived before the deadline.
    #[error("No '{expected}' acknowledgment for '{frame}' within {timeout:?}")]
    ProtocolTimeout {
        /// Frame that was sent
        frame: String,
        /// Acknowledgment that was awaited
        expected: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// A line arrived that does not fit the expected acknowledgment grammar.
    #[error("Wrong feedback for '{frame}': got '{line}', expected '{expected}'")]
    UnexpectedFeedback {
        /// Frame that was sent
        frame: String,
        /// Line received
        line: String,
        /// Acknowledgment that was awaited
        expected: String,
    },

    /// Valve open requested while the pump is off.
    #[error("Cannot open {0} valve - Pump is OFF")]
    InterlockViolation(String),

    /// Board refused the command with a warning or error line.
    #[error("Device rejected command: {0}")]
    DeviceRejected(String),

    /// Timed LED operation requested while the LED is already on.
    #[error("The LEDs are ON. Please turn them OFF first")]
    LedBusy,

    /// Operator interrupt during a wait or handshake.
    #[error("Interrupted by operator")]
    Interrupted,

    /// File or port I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl StimError {
    /// Input and interlock errors: reported, then the input loop continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StimError::Syntax(_)
                | StimError::UnknownAttribute(_)
                | StimError::AttributeNotMutable(_)
                | StimError::InvalidAttributeValue { .. }
                | StimError::StimulusUnavailable { .. }
                | StimError::SeriesValidationFailed { .. }
                | StimError::ShortcutExists(_)
                | StimError::ReservedName(_)
                | StimError::InvalidShortcutName(_)
                | StimError::ShortcutCycle(_)
                | StimError::ExpansionTooDeep(_)
                | StimError::ExpansionTooLarge(_)
                | StimError::InterlockViolation(_)
                | StimError::DeviceRejected(_)
                | StimError::LedBusy
                | StimError::SerialUnavailable
        )
    }

    /// Faults after which the believed device state can no longer be trusted.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            StimError::ProtocolTimeout { .. }
                | StimError::UnexpectedFeedback { .. }
                | StimError::SerialUnexpectedEof
                | StimError::Interrupted
        )
    }

    /// Wrap a per-token failure as an atomic series pre-check failure.
    pub fn in_series(self, token: impl Into<String>, index: usize) -> Self {
        StimError::SeriesValidationFailed {
            token: token.into(),
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let recoverable = StimError::InterlockViolation("air".into());
        assert!(recoverable.is_recoverable());
        assert!(!recoverable.requires_resync());

        let fatal = StimError::ProtocolTimeout {
            frame: "on".into(),
            expected: "Light ON".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(!fatal.is_recoverable());
        assert!(fatal.requires_resync());
    }

    #[test]
    fn series_wrapper_keeps_source() {
        let err = StimError::Syntax("bogus".into()).in_series("bogus", 1);
        let msg = err.to_string();
        assert!(msg.contains("bogus"));
        assert!(msg.contains("position 1"));
        assert!(err.is_recoverable());
    }
}
