//! Session attributes and the table of those that can be changed at runtime.
//!
//! `set:<name>=<value>` only accepts names listed in [`MUTABLE_ATTRIBUTES`].
//! Each entry knows how to parse its value, write it into [`SessionParams`]
//! and format it back for `show:`. A small set of read-only names can be
//! shown but never set.

use crate::error::{StimError, StimResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime-tunable stimulus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// LED timer relative to video start for `t`, ms (negative = video first)
    #[serde(rename = "videoLED_timer")]
    pub video_led_timer_ms: i64,
    /// LED on-time for `t`, ms
    #[serde(rename = "LED_retention")]
    pub led_retention_ms: u64,
    /// How long the last video frame is held, ms
    #[serde(rename = "video_retention")]
    pub video_retention_ms: u64,
    /// Repetitions printed by `well`
    pub well_times: u32,
    /// How long `u` is shown, seconds
    #[serde(rename = "u_time")]
    pub u_time_s: f64,
    /// Ask for the timer before each direct `t`
    pub update_timer: bool,
    /// Ask for the pulse parameters before each direct `p`
    pub update_pulse: bool,
    /// Pulse train span, seconds
    #[serde(rename = "pulse_span")]
    pub pulse_span_s: f64,
    /// Pulse frequency, Hz
    #[serde(rename = "pulse_frequency")]
    pub pulse_frequency_hz: f64,
    /// Pulse width, ms
    #[serde(rename = "pulse_width")]
    pub pulse_width_ms: u32,
    /// Active stimulus name
    pub stimulus: String,
    /// Pump PWM value sent with `pump:value`
    pub pump_value: u8,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            video_led_timer_ms: 0,
            led_retention_ms: 1000,
            video_retention_ms: 0,
            well_times: 1,
            u_time_s: 1.0,
            update_timer: false,
            update_pulse: false,
            pulse_span_s: 5.0,
            pulse_frequency_hz: 10.0,
            pulse_width_ms: 10,
            stimulus: String::new(),
            pump_value: 255,
        }
    }
}

/// Parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Integer attributes
    Int(i64),
    /// Floating point attributes
    Float(f64),
    /// Boolean flags
    Bool(bool),
    /// Stimulus names
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Text(v) => f.write_str(v),
        }
    }
}

/// Declared type and range of a mutable attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrKind {
    /// Whole number within an inclusive range
    Int {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Number strictly greater than `above` (or equal when `inclusive`)
    Float {
        /// Lower bound
        above: f64,
        /// Whether the bound itself is accepted
        inclusive: bool,
    },
    /// `true`/`false`/`1`/`0`
    Bool,
    /// Name of a loaded stimulus
    Stimulus,
}

/// One row of the mutable-attribute table.
pub struct AttributeSpec {
    /// Name used in `set:`/`show:`
    pub name: &'static str,
    /// Unit printed after the value
    pub unit: &'static str,
    /// Declared type
    pub kind: AttrKind,
    apply: fn(&mut SessionParams, &AttrValue),
    format: fn(&SessionParams) -> String,
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl AttributeSpec {
    /// Parse a raw value according to the declared type.
    ///
    /// Stimulus membership is checked by the validator, which knows the
    /// loaded library.
    pub fn parse(&self, raw: &str) -> StimResult<AttrValue> {
        let invalid = |reason: String| StimError::InvalidAttributeValue {
            attribute: self.name.to_string(),
            value: raw.to_string(),
            reason,
        };
        match self.kind {
            AttrKind::Int { min, max } => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| invalid("expected a whole number".into()))?;
                if value < min || value > max {
                    return Err(invalid(format!("must be between {min} and {max}")));
                }
                Ok(AttrValue::Int(value))
            }
            AttrKind::Float { above, inclusive } => {
                let value: f64 = raw
                    .parse()
                    .map_err(|_| invalid("expected a number".into()))?;
                let ok = value.is_finite()
                    && if inclusive {
                        value >= above
                    } else {
                        value > above
                    };
                if !ok {
                    let op = if inclusive { ">=" } else { ">" };
                    return Err(invalid(format!("must be {op} {above}")));
                }
                Ok(AttrValue::Float(value))
            }
            AttrKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(AttrValue::Bool(true)),
                "false" | "0" => Ok(AttrValue::Bool(false)),
                _ => Err(invalid("expected true/false/1/0".into())),
            },
            AttrKind::Stimulus => {
                if raw.is_empty() {
                    return Err(invalid("stimulus name is empty".into()));
                }
                Ok(AttrValue::Text(raw.to_string()))
            }
        }
    }

    /// Write an already parsed value into the parameters.
    pub fn apply(&self, params: &mut SessionParams, value: &AttrValue) {
        (self.apply)(params, value);
    }

    /// Current value, without unit.
    pub fn format(&self, params: &SessionParams) -> String {
        (self.format)(params)
    }

    /// "name = value unit" line used by `show:` and after `set:`.
    pub fn describe(&self, params: &SessionParams) -> String {
        let value = self.format(params);
        if self.unit.is_empty() {
            format!("{} = {}", self.name, value)
        } else {
            format!("{} = {} {}", self.name, value, self.unit)
        }
    }
}

fn as_i64(value: &AttrValue) -> i64 {
    match value {
        AttrValue::Int(v) => *v,
        AttrValue::Float(v) => *v as i64,
        AttrValue::Bool(v) => i64::from(*v),
        AttrValue::Text(_) => 0,
    }
}

fn as_f64(value: &AttrValue) -> f64 {
    match value {
        AttrValue::Float(v) => *v,
        AttrValue::Int(v) => *v as f64,
        AttrValue::Bool(v) => f64::from(u8::from(*v)),
        AttrValue::Text(_) => 0.0,
    }
}

fn as_bool(value: &AttrValue) -> bool {
    match value {
        AttrValue::Bool(v) => *v,
        AttrValue::Int(v) => *v != 0,
        AttrValue::Float(v) => *v != 0.0,
        AttrValue::Text(_) => false,
    }
}

/// Runtime-mutable attributes.
pub static MUTABLE_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec {
        name: "videoLED_timer",
        unit: "ms",
        kind: AttrKind::Int {
            min: -3_600_000,
            max: 3_600_000,
        },
        apply: |p, v| p.video_led_timer_ms = as_i64(v),
        format: |p| p.video_led_timer_ms.to_string(),
    },
    AttributeSpec {
        name: "LED_retention",
        unit: "ms",
        kind: AttrKind::Int {
            min: 0,
            max: 3_600_000,
        },
        apply: |p, v| p.led_retention_ms = as_i64(v).max(0) as u64,
        format: |p| p.led_retention_ms.to_string(),
    },
    AttributeSpec {
        name: "video_retention",
        unit: "ms",
        kind: AttrKind::Int {
            min: 0,
            max: 3_600_000,
        },
        apply: |p, v| p.video_retention_ms = as_i64(v).max(0) as u64,
        format: |p| p.video_retention_ms.to_string(),
    },
    AttributeSpec {
        name: "well_times",
        unit: "",
        kind: AttrKind::Int { min: 0, max: 1000 },
        apply: |p, v| p.well_times = as_i64(v).clamp(0, 1000) as u32,
        format: |p| p.well_times.to_string(),
    },
    AttributeSpec {
        name: "u_time",
        unit: "s",
        kind: AttrKind::Float {
            above: 0.0,
            inclusive: true,
        },
        apply: |p, v| p.u_time_s = as_f64(v),
        format: |p| p.u_time_s.to_string(),
    },
    AttributeSpec {
        name: "update_timer",
        unit: "",
        kind: AttrKind::Bool,
        apply: |p, v| p.update_timer = as_bool(v),
        format: |p| p.update_timer.to_string(),
    },
    AttributeSpec {
        name: "update_pulse",
        unit: "",
        kind: AttrKind::Bool,
        apply: |p, v| p.update_pulse = as_bool(v),
        format: |p| p.update_pulse.to_string(),
    },
    AttributeSpec {
        name: "pulse_span",
        unit: "s",
        kind: AttrKind::Float {
            above: 0.0,
            inclusive: false,
        },
        apply: |p, v| p.pulse_span_s = as_f64(v),
        format: |p| p.pulse_span_s.to_string(),
    },
    AttributeSpec {
        name: "pulse_frequency",
        unit: "Hz",
        kind: AttrKind::Float {
            above: 0.0,
            inclusive: false,
        },
        apply: |p, v| p.pulse_frequency_hz = as_f64(v),
        format: |p| p.pulse_frequency_hz.to_string(),
    },
    AttributeSpec {
        name: "pulse_width",
        unit: "ms",
        kind: AttrKind::Int {
            min: MIN_PULSE_WIDTH_MS as i64,
            max: 60_000,
        },
        apply: |p, v| p.pulse_width_ms = as_i64(v).clamp(0, 60_000) as u32,
        format: |p| p.pulse_width_ms.to_string(),
    },
    AttributeSpec {
        name: "stimulus",
        unit: "",
        kind: AttrKind::Stimulus,
        apply: |p, v| {
            if let AttrValue::Text(name) = v {
                p.stimulus = name.clone();
            }
        },
        format: |p| p.stimulus.clone(),
    },
    AttributeSpec {
        name: "pump_value",
        unit: "",
        kind: AttrKind::Int { min: 0, max: 255 },
        apply: |p, v| p.pump_value = as_i64(v).clamp(0, 255) as u8,
        format: |p| p.pump_value.to_string(),
    },
];

/// Session facts that can be shown but not set.
pub const READ_ONLY_ATTRIBUTES: &[&str] = &[
    "stim_name",
    "led_state",
    "pump_state",
    "shock_state",
    "air_state",
    "odor_a_state",
    "odor_b_state",
    "serial_port",
    "baud_rate",
    "shortcuts_file",
    "protocol_file",
    "log_file",
];

/// Narrowest pulse the board can produce.
pub const MIN_PULSE_WIDTH_MS: u32 = 2;

/// Result of looking an attribute name up.
#[derive(Debug, Clone, Copy)]
pub enum AttrLookup {
    /// Listed in the mutable table
    Mutable(&'static AttributeSpec),
    /// Known, but read-only
    ReadOnly(&'static str),
    /// Not an attribute of the session
    Unknown,
}

/// Find an attribute by exact name.
pub fn lookup(name: &str) -> AttrLookup {
    if let Some(spec) = MUTABLE_ATTRIBUTES.iter().find(|spec| spec.name == name) {
        return AttrLookup::Mutable(spec);
    }
    match READ_ONLY_ATTRIBUTES.iter().find(|known| **known == name) {
        Some(known) => AttrLookup::ReadOnly(known),
        None => AttrLookup::Unknown,
    }
}

/// Resolve a name for `set:`, rejecting read-only and unknown names.
pub fn mutable(name: &str) -> StimResult<&'static AttributeSpec> {
    match lookup(name) {
        AttrLookup::Mutable(spec) => Ok(spec),
        AttrLookup::ReadOnly(name) => Err(StimError::AttributeNotMutable(name.to_string())),
        AttrLookup::Unknown => Err(StimError::UnknownAttribute(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_value_range_is_enforced() {
        let spec = mutable("pump_value").unwrap();
        assert_eq!(spec.parse("200").unwrap(), AttrValue::Int(200));
        assert!(matches!(
            spec.parse("300"),
            Err(StimError::InvalidAttributeValue { .. })
        ));
        assert!(spec.parse("abc").is_err());
    }

    #[test]
    fn bool_synonyms() {
        let spec = mutable("update_pulse").unwrap();
        assert_eq!(spec.parse("True").unwrap(), AttrValue::Bool(true));
        assert_eq!(spec.parse("0").unwrap(), AttrValue::Bool(false));
        assert!(spec.parse("yes").is_err());
    }

    #[test]
    fn apply_and_describe() {
        let mut params = SessionParams::default();
        let spec = mutable("pulse_span").unwrap();
        let value = spec.parse("10").unwrap();
        spec.apply(&mut params, &value);
        assert_eq!(params.pulse_span_s, 10.0);
        assert_eq!(spec.describe(&params), "pulse_span = 10 s");
    }

    #[test]
    fn read_only_and_unknown_names() {
        assert!(matches!(
            mutable("stim_name"),
            Err(StimError::AttributeNotMutable(_))
        ));
        assert!(matches!(
            mutable("colour"),
            Err(StimError::UnknownAttribute(_))
        ));
        assert!(matches!(lookup("led_state"), AttrLookup::ReadOnly(_)));
    }

    #[test]
    fn negative_timer_is_allowed() {
        let spec = mutable("videoLED_timer").unwrap();
        assert_eq!(spec.parse("-500").unwrap(), AttrValue::Int(-500));
    }
}
