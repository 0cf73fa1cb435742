//! Interactive session: reads operator lines and drives the board.
//!
//! A line is one of
//! - a shortcut definition `name <- series`,
//! - a series (`>` or a repetition block), expanded and validated as a whole
//!   before anything runs,
//! - a single token, validated and run on its own.
//!
//! Everything that runs goes through the [`Scheduler`], with the controller as
//! its [`CommandExecutor`]. Only one line is processed at a time.

use crate::command::attributes::{self, AttrLookup, MIN_PULSE_WIDTH_MS};
use crate::command::grammar::Grammar;
use crate::command::series::is_series;
use crate::command::{Command, CommandKind, PulseSpec, SessionParams, Switch, ValveKind};
use crate::config::ControllerConfig;
use crate::device::{Actuator, DeviceSession};
use crate::error::{StimError, StimResult};
use crate::help;
use crate::interrupt::Interrupt;
use crate::operator::Operator;
use crate::protocol_log::{list_protocols, EventLog, ProtocolEntry, ProtocolLog};
use crate::scheduler::{CommandExecutor, Completion, Scheduler, ScheduledStep};
use crate::shortcuts::{parse_definition, ShortcutStore};
use crate::stimulus::{PlaybackRequest, StimulusLibrary, StimulusSink};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

const PROMPT: &str = "> ";
const RECOVERY_PROMPT: &str = "Continue (Y) or Terminate (n)? ";
const NO_SERIAL: &str = "serial communication unavailable";

/// What the input loop does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Read the next line
    Continue,
    /// Leave the session
    Quit,
}

/// Everything a [`Controller`] is built from.
#[derive(Debug)]
pub struct ControllerParts<S, O> {
    /// Loaded configuration
    pub config: ControllerConfig,
    /// Playable stimuli
    pub stimuli: StimulusLibrary,
    /// Shortcut store, already loaded
    pub shortcuts: ShortcutStore,
    /// Board session (possibly disconnected)
    pub session: DeviceSession,
    /// Stimulus playback
    pub sink: S,
    /// Operator I/O
    pub operator: O,
    /// Autosaved protocol, if enabled
    pub protocol: Option<ProtocolLog>,
    /// Event log, if enabled
    pub events: Option<EventLog>,
    /// Interrupt shared with the session and the signal listener
    pub interrupt: Interrupt,
}

/// The operator's session with the stimulus rig.
pub struct Controller<S, O> {
    config: ControllerConfig,
    params: SessionParams,
    stimuli: StimulusLibrary,
    shortcuts: ShortcutStore,
    session: DeviceSession,
    scheduler: Scheduler,
    sink: S,
    operator: O,
    protocol: Option<ProtocolLog>,
    events: Option<EventLog>,
    interrupt: Interrupt,
    in_series: bool,
}

impl<S: StimulusSink, O: Operator> Controller<S, O> {
    /// Assemble a controller. The event log, if any, is shared with the
    /// device session.
    pub fn new(parts: ControllerParts<S, O>) -> Self {
        let ControllerParts {
            config,
            stimuli,
            shortcuts,
            mut session,
            sink,
            operator,
            protocol,
            events,
            interrupt,
        } = parts;
        if let Some(events) = &events {
            session.set_event_log(events.clone());
        }
        Self {
            params: config.session.attributes.clone(),
            scheduler: Scheduler::new(config.session.scheduler()),
            config,
            stimuli,
            shortcuts,
            session,
            sink,
            operator,
            protocol,
            events,
            interrupt,
            in_series: false,
        }
    }

    /// Current parameter values.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// The board session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// The shortcut store.
    pub fn shortcuts(&self) -> &ShortcutStore {
        &self.shortcuts
    }

    /// The stimulus sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The operator.
    pub fn operator(&self) -> &O {
        &self.operator
    }

    /// Validator over the current session state.
    pub fn grammar(&self) -> Grammar<'_> {
        Grammar::new(
            &self.params,
            self.stimuli.names(),
            &self.config.session.stim_name,
        )
    }

    /// Read and run lines until the operator quits or input closes.
    pub async fn run_interactive(&mut self) {
        self.operator.say(&format!(
            "Ready: {} stimuli, {} shortcuts, board {}. Type 'h' for help.",
            self.stimuli.len(),
            self.shortcuts.len(),
            if self.session.is_connected() {
                "connected"
            } else {
                "not connected"
            }
        ));
        loop {
            let interrupt = self.interrupt.clone();
            let line = tokio::select! {
                biased;
                _ = interrupt.triggered() => None,
                line = self.operator.ask(PROMPT) => Some(line),
            };
            let control = match line {
                None => self.recover_from_interrupt().await,
                Some(None) => LoopControl::Quit,
                Some(Some(line)) => self.handle_line(&line).await,
            };
            if control == LoopControl::Quit {
                break;
            }
        }
        self.terminate().await;
    }

    /// Run one line and report any failure to the operator.
    pub async fn handle_line(&mut self, line: &str) -> LoopControl {
        match self.execute_line(line).await {
            Ok(control) => control,
            Err(StimError::Interrupted) => self.recover_from_interrupt().await,
            Err(err) => {
                if err.requires_resync() {
                    error!(error = %err, "Device state is uncertain");
                    self.operator
                        .say(&format!("{err}\nDevice state is uncertain; use 'stop' to reset it."));
                } else {
                    self.operator.say(&err.to_string());
                }
                LoopControl::Continue
            }
        }
    }

    /// Run one line, returning the first failure.
    pub async fn execute_line(&mut self, line: &str) -> StimResult<LoopControl> {
        if let Some(events) = &self.events {
            events.input(line);
        }

        if let Some((name, series)) = parse_definition(line) {
            let grammar = Grammar::new(
                &self.params,
                self.stimuli.names(),
                &self.config.session.stim_name,
            );
            self.shortcuts.define(name, series, &grammar)?;
            self.operator
                .say(&format!("Shortcut '{name}' saved: {series}"));
            return Ok(LoopControl::Continue);
        }

        if is_series(line) {
            let commands = self.shortcuts.compile(line, &self.grammar())?;
            return self.run_commands(&commands, true).await;
        }

        let command = self.grammar().validate(line, &self.shortcuts)?;
        if let CommandKind::ShortcutInvoke(name) = command.kind() {
            let commands = self.shortcuts.compile(name, &self.grammar())?;
            info!(shortcut = %name, commands = commands.len(), "Running shortcut");
            return self.run_commands(&commands, true).await;
        }
        self.run_commands(std::slice::from_ref(&command), false)
            .await
    }

    /// Switch everything off and release the board.
    pub async fn terminate(&mut self) {
        self.session.shutdown().await;
        if let Some(events) = &self.events {
            events.note("Session terminated");
        }
        info!("Session terminated");
    }

    async fn run_commands(
        &mut self,
        commands: &[Command],
        in_series: bool,
    ) -> StimResult<LoopControl> {
        self.in_series = in_series;
        let scheduler = self.scheduler;
        let mut outcome = scheduler.run(commands, self).await;
        self.in_series = false;

        if let Some(err) = outcome.error.take() {
            if in_series {
                self.operator.say(&format!(
                    "Series stopped: {} of {} commands ran",
                    outcome.completed(),
                    outcome.total
                ));
            }
            return Err(err);
        }
        if outcome.quit {
            return Ok(LoopControl::Quit);
        }
        Ok(LoopControl::Continue)
    }

    async fn recover_from_interrupt(&mut self) -> LoopControl {
        self.interrupt.clear();
        warn!("Interrupted by operator");
        if let Some(events) = &self.events {
            events.note("Interrupted by operator");
        }
        match self.session.stop_all().await {
            Ok(()) | Err(StimError::SerialUnavailable) => {}
            Err(err) => error!(error = %err, "Could not stop the board after interrupt"),
        }
        if let Some(protocol) = &mut self.protocol {
            protocol.mark();
        }
        match self.operator.ask(RECOVERY_PROMPT).await {
            Some(answer) if answer.trim().eq_ignore_ascii_case("n") => LoopControl::Quit,
            Some(_) => LoopControl::Continue,
            None => LoopControl::Quit,
        }
    }

    /// Map a missing board to a skipped step.
    fn degrade<T>(&mut self, result: StimResult<T>) -> StimResult<Completion> {
        match result {
            Ok(_) => Ok(Completion::Done),
            Err(StimError::SerialUnavailable) => {
                warn!("No board connected; command skipped");
                self.operator
                    .say("Serial communication unavailable; command skipped");
                Ok(Completion::Skipped(NO_SERIAL.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn play(&mut self, times: u32) -> StimResult<Completion> {
        if self.params.stimulus.is_empty() {
            self.operator.say("No stimulus selected");
            return Ok(Completion::Skipped("no stimulus selected".to_string()));
        }
        let request = PlaybackRequest {
            stimulus: self.params.stimulus.clone(),
            retention: Duration::from_millis(self.params.video_retention_ms),
        };
        for _ in 0..times {
            self.sink.play(&request, &self.interrupt).await?;
        }
        Ok(Completion::Done)
    }

    /// Ask for a value; an empty answer or closed input keeps `current`.
    async fn ask_value<T: std::str::FromStr + std::fmt::Display>(
        &mut self,
        label: &str,
        current: T,
    ) -> T {
        loop {
            let prompt = format!("{label} [{current}]: ");
            let Some(answer) = self.operator.ask(&prompt).await else {
                return current;
            };
            let answer = answer.trim();
            if answer.is_empty() {
                return current;
            }
            match answer.parse() {
                Ok(value) => return value,
                Err(_) => self.operator.say(&format!("'{answer}' is not a valid value")),
            }
        }
    }

    async fn pulse(&mut self, mut spec: PulseSpec) -> StimResult<Completion> {
        if !self.in_series && self.params.update_pulse {
            spec.span_s = self.ask_value("Pulse span (s)", spec.span_s).await;
            spec.freq_hz = self.ask_value("Pulse frequency (Hz)", spec.freq_hz).await;
            spec.width_ms = self.ask_value("Pulse width (ms)", spec.width_ms).await;
            if spec.span_s <= 0.0 || spec.freq_hz <= 0.0 {
                return Err(StimError::InvalidAttributeValue {
                    attribute: "pulse".to_string(),
                    value: format!("{} s / {} Hz", spec.span_s, spec.freq_hz),
                    reason: "span and frequency must be above 0".to_string(),
                });
            }
        }
        if spec.width_ms < MIN_PULSE_WIDTH_MS {
            warn!(width_ms = spec.width_ms, "Pulse width raised to the minimum");
            self.operator.say(&format!(
                "Pulse width {} ms is below the minimum; using {MIN_PULSE_WIDTH_MS} ms",
                spec.width_ms
            ));
            spec.width_ms = MIN_PULSE_WIDTH_MS;
        }
        self.params.pulse_span_s = spec.span_s;
        self.params.pulse_frequency_hz = spec.freq_hz;
        self.params.pulse_width_ms = spec.width_ms;
        let result = self.session.pulse(spec).await;
        self.degrade(result)
    }

    /// Video with the LED running `LED_retention` ms, offset by `timer_ms`.
    ///
    /// A positive timer starts the LED first and the video `timer_ms` later;
    /// a negative one starts the video first and the LED `|timer_ms|` later.
    async fn video_and_led(&mut self, mut timer_ms: i64) -> StimResult<Completion> {
        if !self.in_series && self.params.update_timer {
            let current = timer_ms as f64 / 1000.0;
            let seconds = self.ask_value("LED/video timer (s)", current).await;
            timer_ms = (seconds * 1000.0).round() as i64;
            self.params.video_led_timer_ms = timer_ms;
        }
        if self.session.state().led {
            return Err(StimError::LedBusy);
        }

        let retention = Duration::from_millis(self.params.led_retention_ms);
        let led_delay = Duration::from_millis(timer_ms.min(0).unsigned_abs());
        let video_delay = Duration::from_millis(timer_ms.max(0).unsigned_abs());
        let start = Instant::now();

        match self.session.led_timer(retention, led_delay, false).await {
            Ok(()) => {}
            Err(StimError::SerialUnavailable) => {
                warn!("No board connected; playing video without LED");
            }
            Err(err) => return Err(err),
        }
        self.interrupt.sleep(video_delay).await?;
        let played = self.play(1).await?;
        self.interrupt
            .sleep_until(start + led_delay + retention)
            .await?;
        Ok(played)
    }

    async fn show(&mut self, name: &str) -> StimResult<Completion> {
        let text = match attributes::lookup(name) {
            AttrLookup::Mutable(spec) => spec.describe(&self.params),
            AttrLookup::ReadOnly(name) => format!("{name} = {}", self.read_only_value(name)),
            AttrLookup::Unknown => return Err(StimError::UnknownAttribute(name.to_string())),
        };
        self.operator.say(&text);
        Ok(Completion::Done)
    }

    fn read_only_value(&self, name: &str) -> String {
        let state = self.session.state();
        let on_off = |on: bool| if on { "ON" } else { "OFF" }.to_string();
        let path_or_none = |path: Option<&std::path::Path>| {
            path.map_or_else(|| "none".to_string(), |p| p.display().to_string())
        };
        match name {
            "stim_name" => self.config.session.stim_name.clone(),
            "led_state" => on_off(state.led),
            "pump_state" => on_off(state.pump.on),
            "shock_state" => on_off(state.shock),
            "air_state" => on_off(state.valve(ValveKind::Air)),
            "odor_a_state" => on_off(state.valve(ValveKind::OdorA)),
            "odor_b_state" => on_off(state.valve(ValveKind::OdorB)),
            "serial_port" => match (&self.config.serial.port, self.session.is_connected()) {
                (_, false) => "not connected".to_string(),
                (Some(port), true) => port.clone(),
                (None, true) => format!("auto-detected {}", self.config.serial.board),
            },
            "baud_rate" => self.config.serial.baud_rate.to_string(),
            "shortcuts_file" => path_or_none(self.shortcuts.path()),
            "protocol_file" => path_or_none(self.protocol.as_ref().map(ProtocolLog::path)),
            "log_file" => path_or_none(self.events.as_ref().map(EventLog::path)),
            _ => String::new(),
        }
    }

    async fn select_stimulus(&mut self) -> StimResult<Completion> {
        if !self.stimuli.is_empty() {
            self.operator
                .say(&format!("Available: {}", self.stimuli.names().join(", ")));
        }
        let prompt = format!("Stimulus [{}]: ", self.params.stimulus);
        let answer = self.operator.ask(&prompt).await.unwrap_or_default();
        let name = answer.trim();
        if name.is_empty() {
            return Ok(Completion::Skipped("stimulus unchanged".to_string()));
        }
        self.grammar().check_stimulus(name)?;
        self.params.stimulus = name.to_string();
        info!(stimulus = name, "Stimulus selected");
        Ok(Completion::Done)
    }

    fn list_shortcuts(&mut self) -> StimResult<Completion> {
        let grammar = Grammar::new(
            &self.params,
            self.stimuli.names(),
            &self.config.session.stim_name,
        );
        let report = self.shortcuts.reload(&grammar)?;
        for (entry, reason) in &report.rejected {
            self.operator.say(&format!("Dropped '{entry}': {reason}"));
        }
        if self.shortcuts.is_empty() {
            self.operator.say("No shortcuts defined");
        }
        let lines: Vec<String> = self
            .shortcuts
            .list()
            .iter()
            .map(|s| format!("  {:<20} <- {}", s.name, s.series))
            .collect();
        for line in lines {
            self.operator.say(&line);
        }
        Ok(Completion::Done)
    }

    fn list_protocol_files(&mut self) -> StimResult<Completion> {
        let files = list_protocols(&self.config.paths.protocol_dir)?;
        if files.is_empty() {
            self.operator.say(&format!(
                "No protocols in {}",
                self.config.paths.protocol_dir.display()
            ));
        }
        for file in files {
            self.operator.say(&format!("  {}", file.display()));
        }
        Ok(Completion::Done)
    }

    async fn dispatch(&mut self, step: &ScheduledStep<'_>) -> StimResult<Completion> {
        match step.command.kind() {
            CommandKind::PlayVideoOnce => self.play(1).await,
            CommandKind::PlayVideoTimes(n) => self.play(*n).await,
            CommandKind::LedToggle => {
                let result = self.session.switch(Actuator::Led, Switch::Toggle).await;
                self.degrade(result)
            }
            CommandKind::LedTimed(seconds) => {
                let duration = Duration::from_secs_f64(seconds.max(0.0));
                let result = self.session.led_timer(duration, Duration::ZERO, true).await;
                self.degrade(result)
            }
            CommandKind::Pulse(spec) => self.pulse(*spec).await,
            CommandKind::VideoLedCoordinate(timer_ms) => self.video_and_led(*timer_ms).await,
            CommandKind::InterStimulusInterval(_) => {
                if let Some(wait) = step.wait() {
                    self.interrupt.sleep(wait).await?;
                }
                Ok(Completion::Done)
            }
            CommandKind::Trigger => {
                let result = self.session.trigger().await;
                self.degrade(result)
            }
            CommandKind::StopAll => {
                let result = self.session.stop_all().await;
                self.degrade(result)
            }
            CommandKind::Pump(switch) => {
                let result = self.session.switch(Actuator::Pump, *switch).await;
                self.degrade(result)
            }
            CommandKind::PumpSetValue(value) => {
                let result = self.session.set_pump_value(*value).await;
                if result.is_ok() {
                    self.params.pump_value = *value;
                }
                self.degrade(result)
            }
            CommandKind::Shock(switch) => {
                let result = self.session.switch(Actuator::Shock, *switch).await;
                self.degrade(result)
            }
            CommandKind::Valve(kind, switch) => {
                let result = self.session.switch(Actuator::Valve(*kind), *switch).await;
                self.degrade(result)
            }
            CommandKind::SetAttribute { name, value, .. } => {
                let spec = attributes::mutable(name)?;
                spec.apply(&mut self.params, value);
                info!(attribute = %name, value = %spec.format(&self.params), "Attribute set");
                if !self.in_series {
                    self.operator.say(&spec.describe(&self.params));
                }
                Ok(Completion::Done)
            }
            CommandKind::ShowAttribute(name) => self.show(name).await,
            CommandKind::ShortcutInvoke(name) => Ok(Completion::Skipped(format!(
                "shortcut {name} must be expanded before it runs"
            ))),
            CommandKind::Quit => {
                match self.session.stop_all().await {
                    Ok(()) | Err(StimError::SerialUnavailable) => {}
                    Err(err) => warn!(error = %err, "Could not stop the board before quitting"),
                }
                Ok(Completion::Quit)
            }
            CommandKind::Help(topic) => {
                let text = help::render(
                    topic.as_deref(),
                    &self.config.session.stim_name,
                    self.stimuli.names(),
                );
                self.operator.say(&text);
                Ok(Completion::Done)
            }
            CommandKind::ListShortcuts => self.list_shortcuts(),
            CommandKind::SayWell => {
                if self.params.well_times == 0 {
                    self.operator.say("Well done!");
                }
                for _ in 0..self.params.well_times {
                    self.operator.say("well");
                }
                Ok(Completion::Done)
            }
            CommandKind::ShowU => {
                self.operator.say("u");
                let pause = Duration::from_secs_f64(self.params.u_time_s.max(0.0));
                self.interrupt.sleep(pause).await?;
                Ok(Completion::Done)
            }
            CommandKind::Run => {
                self.operator.say("The game is on!");
                Ok(Completion::Done)
            }
            CommandKind::LoadProtocol => self.list_protocol_files(),
            CommandKind::SelectStimulus => self.select_stimulus().await,
        }
    }

    fn record(&mut self, command: &Command) {
        let Some(protocol) = &mut self.protocol else {
            return;
        };
        let state = self.session.state();
        let entry = ProtocolEntry::describe(
            command,
            &self.params,
            &state,
            &self.config.session.stim_name,
        );
        if let Some(entry) = entry {
            if let Err(err) = protocol.record(&entry, self.in_series) {
                warn!(error = %err, file = %protocol.path().display(), "Protocol write failed");
            }
        }
    }
}

#[async_trait]
impl<S: StimulusSink, O: Operator> CommandExecutor for Controller<S, O> {
    async fn execute(&mut self, step: &ScheduledStep<'_>) -> Result<Completion, StimError> {
        self.session.reconcile().await?;
        let completion = self.dispatch(step).await?;
        if completion == Completion::Done {
            self.record(step.command);
        }
        Ok(completion)
    }
}

impl<S, O> std::fmt::Debug for Controller<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("params", &self.params)
            .field("stimuli", &self.stimuli)
            .field("shortcuts", &self.shortcuts)
            .field("session", &self.session)
            .field("scheduler", &self.scheduler)
            .field("in_series", &self.in_series)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::ScriptedOperator;
    use crate::shortcuts::ExpansionLimits;
    use crate::stimulus::TimedStimulusSink;

    fn controller(answers: &[&str]) -> Controller<TimedStimulusSink, ScriptedOperator> {
        let interrupt = Interrupt::new();
        Controller::new(ControllerParts {
            config: ControllerConfig::default(),
            stimuli: StimulusLibrary::from_names(["looming", "grating"]),
            shortcuts: ShortcutStore::in_memory(ExpansionLimits::default()),
            session: DeviceSession::disconnected(interrupt.clone()),
            sink: TimedStimulusSink::new(Duration::from_millis(100)),
            operator: ScriptedOperator::new(answers.iter().copied()),
            protocol: None,
            events: None,
            interrupt,
        })
    }

    #[tokio::test]
    async fn set_then_show() {
        let mut ctl = controller(&[]);
        ctl.execute_line("set:pulse_span=7.5").await.unwrap();
        assert_eq!(ctl.params().pulse_span_s, 7.5);
        ctl.execute_line("show:pulse_span").await.unwrap();
        assert!(ctl.operator().transcript().contains("pulse_span = 7.5"));
    }

    #[tokio::test]
    async fn invalid_series_leaves_params_untouched() {
        let mut ctl = controller(&[]);
        let err = ctl
            .execute_line("set:pulse_span=9 > bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, StimError::SeriesValidationFailed { index: 1, .. }));
        assert_eq!(ctl.params().pulse_span_s, 5.0);
    }

    #[tokio::test]
    async fn hardware_without_board_is_skipped() {
        let mut ctl = controller(&[]);
        let control = ctl.execute_line("pump:on").await.unwrap();
        assert_eq!(control, LoopControl::Continue);
        assert!(ctl.operator().transcript().contains("unavailable"));
        assert!(!ctl.session().state().pump.on);
    }

    #[tokio::test]
    async fn valve_interlock_stops_series_without_board() {
        let mut ctl = controller(&[]);
        let err = ctl
            .execute_line("air:on > set:pulse_span=9")
            .await
            .unwrap_err();
        assert!(matches!(err, StimError::InterlockViolation(_)));
        assert_eq!(ctl.params().pulse_span_s, 5.0);
        assert!(ctl.operator().transcript().contains("0 of 2 commands ran"));
    }

    #[tokio::test(start_paused = true)]
    async fn select_and_play_stimulus() {
        let mut ctl = controller(&["looming"]);
        ctl.execute_line("r/v").await.unwrap();
        assert_eq!(ctl.params().stimulus, "looming");
        ctl.execute_line("v2").await.unwrap();
        assert_eq!(ctl.sink().played().len(), 2);
    }

    #[tokio::test]
    async fn unknown_stimulus_is_refused() {
        let mut ctl = controller(&["dark"]);
        let err = ctl.execute_line("stim").await.unwrap_err();
        assert!(matches!(err, StimError::StimulusUnavailable { .. }));
    }

    #[tokio::test]
    async fn well_and_run() {
        let mut ctl = controller(&[]);
        ctl.execute_line("set:well_times=0").await.unwrap();
        ctl.execute_line("well").await.unwrap();
        ctl.execute_line("run").await.unwrap();
        let transcript = ctl.operator().transcript();
        assert!(transcript.contains("Well done!"));
        assert!(transcript.contains("The game is on!"));
    }

    #[tokio::test]
    async fn quit_ends_the_loop() {
        let mut ctl = controller(&[]);
        assert_eq!(ctl.handle_line("q").await, LoopControl::Quit);
    }

    #[tokio::test]
    async fn shortcut_definition_and_invocation() {
        let mut ctl = controller(&[]);
        ctl.execute_line("slow <- set:pulse_span=8 > set:pulse_frequency=2")
            .await
            .unwrap();
        assert!(ctl.shortcuts().get("slow").is_some());
        ctl.execute_line("slow").await.unwrap();
        assert_eq!(ctl.params().pulse_span_s, 8.0);
        assert_eq!(ctl.params().pulse_frequency_hz, 2.0);
    }

    #[tokio::test]
    async fn errors_are_reported_and_loop_continues() {
        let mut ctl = controller(&[]);
        assert_eq!(ctl.handle_line("isi0").await, LoopControl::Continue);
        assert!(ctl.operator().transcript().contains("isi0"));
    }
}
