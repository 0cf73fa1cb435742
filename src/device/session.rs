//! Device session: the only owner of the serial link.
//!
//! Every hardware command follows the same handshake: check the believed
//! state, send one frame, then read lines until the expected acknowledgment
//! arrives, a refusal or protocol violation is seen, the deadline passes, or
//! the operator interrupts. Lines are read with `read_until`, which keeps
//! partial data in `pending` when a wait is cancelled.
//!
//! State updates are optimistic: the target state is written before the
//! acknowledgment arrives and restored if confirmation never comes.

use super::protocol::{self, Feedback, FeedbackKind, PUMP_OFF_WARNING, QUIT_FRAME, TRIGGER_FRAME};
use super::{Actuator, DeviceState};
use crate::command::{PulseSpec, Switch, ValveKind};
use crate::error::{StimError, StimResult};
use crate::interrupt::Interrupt;
use crate::protocol_log::EventLog;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Byte stream to the board (a real port or a test double).
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed serial stream.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Handshake deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Deadline for untimed commands
    pub ack: Duration,
    /// Added to the nominal duration of timed commands
    pub timed_grace: Duration,
    /// Silence that ends a buffer drain
    pub drain_idle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            ack: Duration::from_secs(5),
            timed_grace: Duration::from_secs(5),
            drain_idle: Duration::from_millis(10),
        }
    }
}

/// Result of a switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested state; nothing was sent
    Unchanged,
    /// Board confirmed the new state
    Switched {
        /// New state
        on: bool,
    },
}

/// Owner of the serial link and of the believed [`DeviceState`].
pub struct DeviceSession {
    port: Option<BufReader<DynSerial>>,
    pending: Vec<u8>,
    state: DeviceState,
    timeouts: SessionTimeouts,
    interrupt: Interrupt,
    events: Option<EventLog>,
    last_valve_attempted: Option<ValveKind>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("connected", &self.port.is_some())
            .field("state", &self.state)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Session over `port`; `None` runs disconnected.
    pub fn new(port: Option<DynSerial>, timeouts: SessionTimeouts, interrupt: Interrupt) -> Self {
        Self {
            port: port.map(BufReader::new),
            pending: Vec::new(),
            state: DeviceState::default(),
            timeouts,
            interrupt,
            events: None,
            last_valve_attempted: None,
        }
    }

    /// Session without a board; hardware commands fail with `SerialUnavailable`.
    pub fn disconnected(interrupt: Interrupt) -> Self {
        Self::new(None, SessionTimeouts::default(), interrupt)
    }

    /// Record frames and acknowledgments in `log`.
    pub fn set_event_log(&mut self, log: EventLog) {
        self.events = Some(log);
    }

    /// Whether a board is attached.
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Snapshot of the believed hardware state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Handshake deadlines in use.
    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    fn ensure_connected(&self) -> StimResult<()> {
        if self.port.is_some() {
            Ok(())
        } else {
            Err(StimError::SerialUnavailable)
        }
    }

    /// Switch an actuator.
    ///
    /// A request for the current state is a no-op. Opening a valve while the
    /// pump is off is refused before anything is sent.
    #[instrument(skip(self))]
    pub async fn switch(&mut self, actuator: Actuator, switch: Switch) -> StimResult<Transition> {
        let current = self.state.is_on(actuator);
        let target = switch.target(current);
        if let Actuator::Valve(kind) = actuator {
            if target && !current && !self.state.pump.on {
                return Err(StimError::InterlockViolation(kind.label().to_string()));
            }
        }
        self.ensure_connected()?;
        if target == current {
            debug!(%actuator, on = current, "Already in requested state");
            return Ok(Transition::Unchanged);
        }
        if let Actuator::Valve(kind) = actuator {
            self.last_valve_attempted = Some(kind);
        }

        let frame = protocol::switch_frame(actuator, target);
        self.send_frame(&frame).await?;
        self.state.set(actuator, target);

        let expected = FeedbackKind::for_switch(actuator, target);
        match self.await_acks(&frame, &[expected], self.timeouts.ack).await {
            Ok(()) => {
                info!("{} {}", actuator, if target { "ON" } else { "OFF" });
                Ok(Transition::Switched { on: target })
            }
            Err(err) => {
                self.state.set(actuator, current);
                Err(err)
            }
        }
    }

    /// Set the pump PWM value.
    #[instrument(skip(self))]
    pub async fn set_pump_value(&mut self, value: u8) -> StimResult<()> {
        self.ensure_connected()?;
        let frame = protocol::pump_value_frame(value);
        self.send_frame(&frame).await?;
        self.await_acks(&frame, &[FeedbackKind::PumpValueSet], self.timeouts.ack)
            .await?;
        self.state.pump.value = value;
        info!(value, "Pump value set");
        Ok(())
    }

    /// LED on for `duration`, starting after `delay`.
    ///
    /// With `wait = false` the acknowledgments are left in the buffer and
    /// picked up by the next [`reconcile`](Self::reconcile).
    #[instrument(skip(self))]
    pub async fn led_timer(
        &mut self,
        duration: Duration,
        delay: Duration,
        wait: bool,
    ) -> StimResult<()> {
        self.ensure_connected()?;
        if self.state.led {
            return Err(StimError::LedBusy);
        }
        let frame = protocol::led_timer_frame(duration, delay);
        self.send_frame(&frame).await?;
        if !wait {
            return Ok(());
        }
        let timeout = duration + delay + self.timeouts.timed_grace;
        self.await_acks(
            &frame,
            &[FeedbackKind::LightOn, FeedbackKind::LightOff],
            timeout,
        )
        .await?;
        info!(seconds = duration.as_secs_f64(), "LED timer finished");
        Ok(())
    }

    /// LED pulse train.
    #[instrument(skip(self))]
    pub async fn pulse(&mut self, spec: PulseSpec) -> StimResult<()> {
        self.ensure_connected()?;
        if self.state.led {
            return Err(StimError::LedBusy);
        }
        let frame = protocol::pulse_frame(&spec);
        self.send_frame(&frame).await?;
        let timeout = Duration::from_secs_f64(spec.span_s.max(0.0)) + self.timeouts.timed_grace;
        self.await_acks(
            &frame,
            &[FeedbackKind::PulsingOn, FeedbackKind::PulsingOff],
            timeout,
        )
        .await?;
        info!(
            span_s = spec.span_s,
            freq_hz = spec.freq_hz,
            width_ms = spec.width_ms,
            "Pulse train finished"
        );
        Ok(())
    }

    /// 100 ms pulse on the trigger pin.
    #[instrument(skip(self))]
    pub async fn trigger(&mut self) -> StimResult<()> {
        self.ensure_connected()?;
        self.send_frame(TRIGGER_FRAME).await?;
        self.await_acks(
            TRIGGER_FRAME,
            &[FeedbackKind::TriggerOn, FeedbackKind::TriggerOff],
            self.timeouts.ack,
        )
        .await
    }

    /// Terminate every operation on the board and zero the believed state.
    ///
    /// This is the recovery path after a timeout, unexpected feedback or an
    /// interrupt, so acknowledgments of the aborted command may still be in
    /// flight. Buffered lines are reconciled first, and any known report that
    /// arrives before `All operations terminated` is applied and skipped. The
    /// interrupt flag must be cleared before calling it.
    #[instrument(skip(self))]
    pub async fn stop_all(&mut self) -> StimResult<()> {
        self.ensure_connected()?;
        self.reconcile().await?;
        self.send_frame(QUIT_FRAME).await?;

        let timeout = self.timeouts.ack;
        let deadline = Instant::now() + timeout;
        loop {
            let Some(line) = self.next_line(deadline).await? else {
                error!(frame = QUIT_FRAME, ?timeout, "Board did not confirm termination");
                return Err(StimError::ProtocolTimeout {
                    frame: QUIT_FRAME.to_string(),
                    expected: FeedbackKind::AllTerminated.to_string(),
                    timeout,
                });
            };
            let feedback = Feedback::parse(&line);
            match (feedback.kind(), &feedback) {
                (Some(FeedbackKind::AllTerminated), _) => break,
                (Some(_), report) => {
                    self.state.apply(report);
                    debug!(line = %line, "Late report while terminating");
                }
                (None, Feedback::Warning(text)) => warn!(warning = %text, "Board warning"),
                (None, Feedback::Refused(text)) => {
                    return Err(StimError::DeviceRejected(text.clone()));
                }
                (None, _) => {
                    error!(line = %line, "Unexpected feedback while terminating");
                    return Err(StimError::UnexpectedFeedback {
                        frame: QUIT_FRAME.to_string(),
                        line,
                        expected: FeedbackKind::AllTerminated.to_string(),
                    });
                }
            }
        }
        self.state.reset();
        info!("All operations on the board terminated");
        Ok(())
    }

    /// Drain every buffered line and apply the state reports among them.
    ///
    /// Runs before each new command. Ends once the link has been silent for
    /// the drain window. Returns the number of lines consumed.
    pub async fn reconcile(&mut self) -> StimResult<usize> {
        if self.port.is_none() {
            return Ok(0);
        }
        let mut count = 0;
        while let Some(line) = self
            .next_line(Instant::now() + self.timeouts.drain_idle)
            .await?
        {
            count += 1;
            let feedback = Feedback::parse(&line);
            if self.state.apply(&feedback) {
                info!(line = %line, "Applied board report");
                continue;
            }
            match feedback {
                Feedback::Warning(text) => {
                    warn!(warning = %text, "Board warning");
                    if text.contains(PUMP_OFF_WARNING) {
                        if let Some(kind) = self.last_valve_attempted {
                            self.state.set(Actuator::Valve(kind), false);
                        }
                    }
                }
                other => debug!(line = ?other, "Discarded stale line"),
            }
        }
        Ok(count)
    }

    /// Best-effort shutdown: switch everything off, then release the port.
    pub async fn shutdown(&mut self) {
        if self.port.is_none() {
            return;
        }
        if let Err(err) = self.reconcile().await {
            warn!(error = %err, "Could not drain board before shutdown");
        }
        let mut targets = vec![Actuator::Led, Actuator::Shock];
        targets.extend(self.state.open_valves().into_iter().map(Actuator::Valve));
        targets.push(Actuator::Pump);
        for actuator in targets {
            if let Err(err) = self.switch(actuator, Switch::Off).await {
                warn!(%actuator, error = %err, "Could not switch off");
            }
        }
        self.port = None;
        info!("Serial session closed");
    }

    async fn send_frame(&mut self, frame: &str) -> StimResult<()> {
        let port = self.port.as_mut().ok_or(StimError::SerialUnavailable)?;
        let mut bytes = Vec::with_capacity(frame.len() + 1);
        bytes.extend_from_slice(frame.as_bytes());
        bytes.push(b'\n');
        port.get_mut().write_all(&bytes).await?;
        port.get_mut().flush().await?;
        debug!(frame, "Sent frame");
        if let Some(events) = &self.events {
            events.frame_sent(frame);
        }
        Ok(())
    }

    /// Wait for `expected` acknowledgments, in order, before one deadline.
    async fn await_acks(
        &mut self,
        frame: &str,
        expected: &[FeedbackKind],
        timeout: Duration,
    ) -> StimResult<()> {
        let deadline = Instant::now() + timeout;
        for want in expected {
            loop {
                let Some(line) = self.next_line(deadline).await? else {
                    error!(frame, expected = %want, ?timeout, "No acknowledgment from board");
                    return Err(StimError::ProtocolTimeout {
                        frame: frame.to_string(),
                        expected: want.to_string(),
                        timeout,
                    });
                };
                let feedback = Feedback::parse(&line);
                if feedback.kind() == Some(*want) {
                    self.state.apply(&feedback);
                    debug!(ack = %line, "Acknowledged");
                    break;
                }
                match &feedback {
                    Feedback::Warning(text) => {
                        warn!(warning = %text, frame, "Board warning");
                        if text.contains(PUMP_OFF_WARNING) {
                            return Err(StimError::DeviceRejected(text.clone()));
                        }
                    }
                    Feedback::Refused(text) => {
                        warn!(reply = %text, frame, "Board refused command");
                        return Err(StimError::DeviceRejected(text.clone()));
                    }
                    report if report.is_unsolicited_report() => {
                        self.state.apply(report);
                        info!(line = %line, "Applied board report");
                    }
                    _ => {
                        error!(frame, line = %line, expected = %want, "Unexpected feedback");
                        return Err(StimError::UnexpectedFeedback {
                            frame: frame.to_string(),
                            line,
                            expected: want.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Next non-empty line, or `None` once `deadline` passes.
    async fn next_line(&mut self, deadline: Instant) -> StimResult<Option<String>> {
        let interrupt = self.interrupt.clone();
        let port = self.port.as_mut().ok_or(StimError::SerialUnavailable)?;
        loop {
            let read = tokio::select! {
                biased;
                _ = interrupt.triggered() => return Err(StimError::Interrupted),
                read = port.read_until(b'\n', &mut self.pending) => read?,
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            };
            if read == 0 && self.pending.is_empty() {
                return Err(StimError::SerialUnexpectedEof);
            }
            let line = String::from_utf8_lossy(&self.pending)
                .trim_end_matches(['\r', '\n'])
                .trim()
                .to_string();
            self.pending.clear();
            if line.is_empty() {
                continue;
            }
            debug!(line = %line, "Received line");
            if let Some(events) = &self.events {
                events.feedback(&line);
            }
            return Ok(Some(line));
        }
    }
}
