//! Execution scheduler for command series.
//!
//! Commands run strictly one after another. Each step's wall time is compared
//! with its expected duration and the signed difference accumulates as drift.
//! Only interval waits (`isi<s>`) absorb the drift: a wait after a slow stretch
//! is shortened, one after a fast stretch lengthened, never below the
//! configured floor. Timed hardware commands always run at their nominal
//! duration.
//!
//! The commands handed to [`Scheduler::run`] have already been validated as a
//! whole (see [`ShortcutStore::compile`](crate::shortcuts::ShortcutStore::compile)),
//! so a series with a bad token never reaches this point.

use crate::command::{Command, CommandKind};
use crate::error::StimError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Drift below this is not reported.
const DRIFT_REPORT_THRESHOLD: f64 = 0.01;
/// Series faster than this are not summarised.
const SUMMARY_THRESHOLD: f64 = 1.0;

/// Timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Round trip assumed for an untimed hardware command
    pub hardware_overhead: Duration,
    /// Floor for an adjusted interval wait
    pub min_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hardware_overhead: Duration::from_millis(30),
            min_interval: Duration::from_millis(100),
        }
    }
}

/// One step handed to the executor.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledStep<'a> {
    /// Zero-based position in the series
    pub index: usize,
    /// Series length
    pub total: usize,
    /// The command as validated
    pub command: &'a Command,
    /// Drift-adjusted wait for interval commands after the first step
    pub interval: Option<Duration>,
}

impl ScheduledStep<'_> {
    /// Wait length to use for an interval command.
    pub fn wait(&self) -> Option<Duration> {
        match self.command.kind() {
            CommandKind::InterStimulusInterval(nominal) => Some(
                self.interval
                    .unwrap_or_else(|| Duration::from_secs_f64(nominal.max(0.0))),
            ),
            _ => None,
        }
    }
}

/// How a step ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Ran as requested
    Done,
    /// Did nothing, with the reason (for example no board attached)
    Skipped(String),
    /// The operator asked to leave the session
    Quit,
}

/// Runs individual commands for the scheduler.
#[async_trait]
pub trait CommandExecutor: Send {
    /// Execute one step.
    async fn execute(&mut self, step: &ScheduledStep<'_>) -> Result<Completion, StimError>;
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Position in the series
    pub index: usize,
    /// Command token
    pub command: String,
    /// What happened
    pub status: OutcomeStatus,
    /// Expected duration, seconds
    pub expected: f64,
    /// Measured duration, seconds
    pub actual: f64,
}

/// Status of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Completed
    Completed,
    /// Skipped, with reason
    Skipped(String),
    /// Quit requested
    Quit,
    /// Failed, with the error text
    Failed(String),
}

/// Per-run bookkeeping, discarded when the run ends.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    expected: Vec<f64>,
    accumulated_drift: f64,
    results: Vec<CommandOutcome>,
}

impl ExecutionContext {
    /// Context for a series with the given expected durations (seconds).
    pub fn new(expected: Vec<f64>) -> Self {
        Self {
            expected,
            accumulated_drift: 0.0,
            results: Vec::new(),
        }
    }

    /// Expected duration of step `index`, seconds.
    pub fn expected(&self, index: usize) -> f64 {
        self.expected.get(index).copied().unwrap_or(0.0)
    }

    /// Signed seconds ahead (positive) or behind (negative) schedule.
    pub fn accumulated_drift(&self) -> f64 {
        self.accumulated_drift
    }

    /// Record a finished step and update the drift.
    pub fn record(&mut self, outcome: CommandOutcome) {
        self.accumulated_drift += outcome.expected - outcome.actual;
        self.results.push(outcome);
    }

    /// Results so far.
    pub fn results(&self) -> &[CommandOutcome] {
        &self.results
    }
}

/// Result of running a series.
#[derive(Debug)]
pub struct SeriesOutcome {
    /// Commands in the series
    pub total: usize,
    /// Per-step results, up to and including the one that stopped the run
    pub results: Vec<CommandOutcome>,
    /// Wall time of the whole run
    pub elapsed: Duration,
    /// Sum of expected durations plus the residual overhead, seconds
    pub expected_total: f64,
    /// Error that stopped the run
    pub error: Option<StimError>,
    /// Whether a step asked to leave the session
    pub quit: bool,
}

impl SeriesOutcome {
    /// Steps that finished without error.
    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !matches!(r.status, OutcomeStatus::Failed(_)))
            .count()
    }

    /// True when every step ran and none failed.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.completed() == self.total
    }
}

/// Sequential executor with drift compensation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Scheduler with the given timing.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Timing in use.
    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Expected duration of one command, seconds.
    pub fn expected_duration(&self, command: &Command) -> f64 {
        match command.nominal_duration() {
            Some(duration) => duration.as_secs_f64(),
            None if command.touches_hardware() => self.config.hardware_overhead.as_secs_f64(),
            None => 0.0,
        }
    }

    /// Expected duration of every command, seconds.
    pub fn expected_durations(&self, series: &[Command]) -> Vec<f64> {
        series.iter().map(|c| self.expected_duration(c)).collect()
    }

    /// Communication overhead of the commands after the last interval wait.
    ///
    /// Overhead before an interval wait is absorbed by that wait's drift
    /// adjustment, so only the tail of the series counts. Every hardware
    /// command in that tail pays the overhead once in [`estimate`](Self::estimate):
    /// untimed ones (`trig`, `pump:on`, ...) through their expected duration,
    /// timed ones (`r<s>`, `p`) through this residual, since their expected
    /// duration is the nominal one. Local commands pay nothing.
    pub fn residual_overhead(&self, series: &[Command]) -> f64 {
        let start = series
            .iter()
            .rposition(Command::is_interval)
            .map_or(0, |last| last + 1);
        let timed = series[start..]
            .iter()
            .filter(|c| c.touches_hardware() && c.nominal_duration().is_some())
            .count();
        timed as f64 * self.config.hardware_overhead.as_secs_f64()
    }

    /// Planned duration of a series, seconds.
    pub fn estimate(&self, series: &[Command]) -> f64 {
        self.expected_durations(series).iter().sum::<f64>() + self.residual_overhead(series)
    }

    /// Interval wait corrected for drift, floored at the minimum interval.
    pub fn adjust_interval(&self, nominal: f64, drift: f64) -> Duration {
        let floor = self.config.min_interval.as_secs_f64();
        Duration::from_secs_f64((nominal + drift).max(floor))
    }

    /// Run a validated series to completion or to its first failure.
    ///
    /// Already applied hardware effects are not rolled back on failure.
    pub async fn run<E>(&self, series: &[Command], executor: &mut E) -> SeriesOutcome
    where
        E: CommandExecutor + ?Sized,
    {
        let total = series.len();
        let mut ctx = ExecutionContext::new(self.expected_durations(series));
        let expected_total = self.estimate(series);
        let intervals = series.iter().filter(|c| c.is_interval()).count();
        if intervals > 0 {
            info!(
                estimated_s = format_args!("{expected_total:.3}"),
                intervals, "Interval waits will be adjusted for drift"
            );
        }

        let started = Instant::now();
        let mut error = None;
        let mut quit = false;

        for (index, command) in series.iter().enumerate() {
            let interval = match command.kind() {
                CommandKind::InterStimulusInterval(nominal) if index > 0 => {
                    let drift = ctx.accumulated_drift();
                    let adjusted = self.adjust_interval(*nominal, drift);
                    if drift.abs() > DRIFT_REPORT_THRESHOLD {
                        info!(
                            drift_s = format_args!("{drift:+.3}"),
                            from_s = format_args!("{nominal:.3}"),
                            to_s = format_args!("{:.3}", adjusted.as_secs_f64()),
                            "Adjusting interval for timing drift"
                        );
                    }
                    Some(adjusted)
                }
                _ => None,
            };
            let step = ScheduledStep {
                index,
                total,
                command,
                interval,
            };

            info!(step = index + 1, total, command = %command, "Executing");
            let step_start = Instant::now();
            let result = executor.execute(&step).await;
            let actual = step_start.elapsed().as_secs_f64();
            let expected = ctx.expected(index);

            let status = match &result {
                Ok(Completion::Done) => OutcomeStatus::Completed,
                Ok(Completion::Skipped(reason)) => OutcomeStatus::Skipped(reason.clone()),
                Ok(Completion::Quit) => OutcomeStatus::Quit,
                Err(err) => OutcomeStatus::Failed(err.to_string()),
            };
            ctx.record(CommandOutcome {
                index,
                command: command.to_string(),
                status,
                expected,
                actual,
            });

            match result {
                Ok(Completion::Quit) => {
                    quit = true;
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(step = index + 1, total, command = %command, error = %err, "Series stopped");
                    error = Some(err);
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        let elapsed_s = elapsed.as_secs_f64();
        if elapsed_s > SUMMARY_THRESHOLD {
            let deviation = elapsed_s - expected_total;
            info!(
                elapsed_s = format_args!("{elapsed_s:.3}"),
                expected_s = format_args!("{expected_total:.3}"),
                deviation_s = format_args!("{deviation:+.3}"),
                "Command series finished"
            );
        }

        SeriesOutcome {
            total,
            results: ctx.results,
            elapsed,
            expected_total,
            error,
            quit,
        }
    }
}
