//! Token validator.
//!
//! [`Grammar::validate`] is the only constructor of [`Command`]. It is a pure
//! function of the token, the current session parameters, the loaded stimulus
//! names and the known shortcut names; nothing is executed or sent.

use super::attributes::{self, AttrKind, AttrLookup, AttrValue, SessionParams};
use super::{Command, CommandKind, PulseSpec, Switch, ValveKind};
use crate::error::{StimError, StimResult};

/// Name lookup used by the validator so it does not depend on the store.
pub trait ShortcutLookup {
    /// Whether a shortcut with this exact name exists.
    fn contains(&self, name: &str) -> bool;
}

/// Lookup with no shortcuts at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShortcuts;

impl ShortcutLookup for NoShortcuts {
    fn contains(&self, _name: &str) -> bool {
        false
    }
}

impl ShortcutLookup for [String] {
    fn contains(&self, name: &str) -> bool {
        self.iter().any(|known| known == name)
    }
}

impl ShortcutLookup for Vec<String> {
    fn contains(&self, name: &str) -> bool {
        ShortcutLookup::contains(self.as_slice(), name)
    }
}

/// Everything the validator needs to know about the session.
#[derive(Debug, Clone, Copy)]
pub struct Grammar<'a> {
    params: &'a SessionParams,
    stimuli: &'a [String],
    stim_alias: &'a str,
}

impl<'a> Grammar<'a> {
    /// Build a validator over the given session view.
    pub fn new(params: &'a SessionParams, stimuli: &'a [String], stim_alias: &'a str) -> Self {
        Self {
            params,
            stimuli,
            stim_alias,
        }
    }

    /// Alias that selects the active stimulus (for example `r/v`).
    pub fn stim_alias(&self) -> &'a str {
        self.stim_alias
    }

    /// Classify one token.
    pub fn validate(&self, text: &str, shortcuts: &dyn ShortcutLookup) -> StimResult<Command> {
        self.validate_with(self.params, text, shortcuts)
    }

    /// Validate every token of an expanded series before anything runs.
    ///
    /// `set:` tokens are applied to a scratch copy of the parameters as they
    /// are met, so later tokens see the values an earlier `set:` establishes.
    /// The first failure is returned with its position.
    pub fn compile_series(
        &self,
        tokens: &[String],
        shortcuts: &dyn ShortcutLookup,
    ) -> StimResult<Vec<Command>> {
        let mut scratch = self.params.clone();
        let mut commands = Vec::with_capacity(tokens.len());
        for (index, token) in tokens.iter().enumerate() {
            let command = self
                .validate_with(&scratch, token, shortcuts)
                .map_err(|err| err.in_series(token.trim(), index))?;
            if let CommandKind::SetAttribute { name, value, .. } = command.kind() {
                if let Ok(spec) = attributes::mutable(name) {
                    spec.apply(&mut scratch, value);
                }
            }
            commands.push(command);
        }
        Ok(commands)
    }

    fn validate_with(
        &self,
        params: &SessionParams,
        text: &str,
        shortcuts: &dyn ShortcutLookup,
    ) -> StimResult<Command> {
        let token = text.trim();
        if token.is_empty() {
            return Ok(Command::new(CommandKind::PlayVideoOnce, ""));
        }
        if shortcuts.contains(token) {
            return Ok(Command::new(
                CommandKind::ShortcutInvoke(token.to_string()),
                token,
            ));
        }
        if let Some(kind) = self.keyword(params, token) {
            return Ok(Command::new(kind, token));
        }
        let kind = self.prefixed(token)?;
        Ok(Command::new(kind, token))
    }

    fn keyword(&self, params: &SessionParams, token: &str) -> Option<CommandKind> {
        let kind = match token {
            "q" => CommandKind::Quit,
            "h" | "help" => CommandKind::Help(None),
            "v" => CommandKind::PlayVideoOnce,
            "p" => CommandKind::Pulse(PulseSpec {
                span_s: params.pulse_span_s,
                freq_hz: params.pulse_frequency_hz,
                width_ms: params.pulse_width_ms,
            }),
            "t" => CommandKind::VideoLedCoordinate(params.video_led_timer_ms),
            "r" => CommandKind::LedToggle,
            "well" => CommandKind::SayWell,
            "u" => CommandKind::ShowU,
            "run" => CommandKind::Run,
            "load" => CommandKind::LoadProtocol,
            "trig" => CommandKind::Trigger,
            "stim" => CommandKind::SelectStimulus,
            "stop" => CommandKind::StopAll,
            "shortcuts" => CommandKind::ListShortcuts,
            "pump" => CommandKind::Pump(Switch::Toggle),
            "shock" => CommandKind::Shock(Switch::Toggle),
            other if other == self.stim_alias => CommandKind::SelectStimulus,
            other => CommandKind::Valve(ValveKind::from_token(other)?, Switch::Toggle),
        };
        Some(kind)
    }

    fn prefixed(&self, token: &str) -> StimResult<CommandKind> {
        let syntax = || StimError::Syntax(token.to_string());

        if let Some(rest) = token.strip_prefix("set:") {
            return self.set_attribute(rest);
        }
        if let Some(rest) = token.strip_prefix("show:") {
            let name = rest.trim();
            return match attributes::lookup(name) {
                AttrLookup::Unknown => Err(StimError::UnknownAttribute(name.to_string())),
                _ => Ok(CommandKind::ShowAttribute(name.to_string())),
            };
        }
        if let Some(topic) = help_topic(token) {
            return Ok(CommandKind::Help(Some(topic.to_string())));
        }
        if let Some(rest) = token.strip_prefix("pump:") {
            return match rest {
                "on" => Ok(CommandKind::Pump(Switch::On)),
                "off" => Ok(CommandKind::Pump(Switch::Off)),
                _ => {
                    let digits = rest.strip_prefix("value:").ok_or_else(syntax)?;
                    if !is_digits(digits) {
                        return Err(syntax());
                    }
                    let value: u8 = digits.parse().map_err(|_| StimError::InvalidAttributeValue {
                        attribute: "pump_value".into(),
                        value: digits.to_string(),
                        reason: "must be between 0 and 255".into(),
                    })?;
                    Ok(CommandKind::PumpSetValue(value))
                }
            };
        }
        if let Some((device, action)) = token.split_once(':') {
            let switch = match action {
                "on" => Switch::On,
                "off" => Switch::Off,
                _ => return Err(syntax()),
            };
            if device == "shock" {
                return Ok(CommandKind::Shock(switch));
            }
            if let Some(valve) = ValveKind::from_token(device) {
                return Ok(CommandKind::Valve(valve, switch));
            }
            return Err(syntax());
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "isi") {
            let secs = parse_seconds(rest).ok_or_else(syntax)?;
            if secs <= 0.0 {
                return Err(syntax());
            }
            return Ok(CommandKind::InterStimulusInterval(secs));
        }
        if let Some(rest) = token.strip_prefix('v') {
            if is_digits(rest) {
                let times: u32 = rest.parse().map_err(|_| syntax())?;
                return Ok(CommandKind::PlayVideoTimes(times));
            }
            return Err(syntax());
        }
        if let Some(rest) = token.strip_prefix('r') {
            let secs = parse_seconds(rest).ok_or_else(syntax)?;
            if secs <= 0.0 {
                return Err(syntax());
            }
            return Ok(CommandKind::LedTimed(secs));
        }
        Err(syntax())
    }

    fn set_attribute(&self, rest: &str) -> StimResult<CommandKind> {
        let compact: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
        let (name, raw) = compact
            .split_once('=')
            .ok_or_else(|| StimError::Syntax(format!("set:{rest}")))?;
        let spec = attributes::mutable(name)?;
        let value = spec.parse(raw)?;
        if spec.kind == AttrKind::Stimulus {
            if let AttrValue::Text(stimulus) = &value {
                self.check_stimulus(stimulus)?;
            }
        }
        Ok(CommandKind::SetAttribute {
            name: spec.name,
            raw: raw.to_string(),
            value,
        })
    }

    /// Fail unless the stimulus is loaded.
    pub fn check_stimulus(&self, name: &str) -> StimResult<()> {
        if self.stimuli.iter().any(|known| known == name) {
            Ok(())
        } else {
            Err(StimError::StimulusUnavailable {
                name: name.to_string(),
                available: self.stimuli.join(", "),
            })
        }
    }
}

fn help_topic(token: &str) -> Option<&str> {
    let rest = token.strip_prefix("help")?;
    let topic = rest.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    if topic.is_empty() || topic.len() == rest.len() {
        return None;
    }
    Some(topic)
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Non-negative decimal number made of digits and at most one dot.
fn parse_seconds(text: &str) -> Option<f64> {
    let valid = !text.is_empty()
        && text.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        && text.bytes().filter(|b| *b == b'.').count() <= 1
        && text != ".";
    if !valid {
        return None;
    }
    text.parse().ok()
}

fn strip_prefix_ignore_case<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}
