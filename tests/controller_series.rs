//! End-to-end tests: operator lines through the controller to a simulated board.

mod common;

use async_trait::async_trait;
use common::{mock_session, FirmwareHandle, MockFirmware};
use std::time::Duration;
use stim_controller::command::grammar::{Grammar, NoShortcuts};
use stim_controller::command::{CommandKind, SessionParams};
use stim_controller::config::ControllerConfig;
use stim_controller::controller::{Controller, ControllerParts, LoopControl};
use stim_controller::error::StimError;
use stim_controller::interrupt::Interrupt;
use stim_controller::operator::ScriptedOperator;
use stim_controller::protocol_log::ProtocolLog;
use stim_controller::scheduler::{CommandExecutor, Completion, ScheduledStep, Scheduler};
use stim_controller::shortcuts::{ExpansionLimits, ShortcutStore};
use stim_controller::stimulus::{StimulusLibrary, TimedStimulusSink};
use tokio::time::Instant;

type TestController = Controller<TimedStimulusSink, ScriptedOperator>;

struct Rig {
    controller: TestController,
    firmware: FirmwareHandle,
    interrupt: Interrupt,
}

fn rig_with(firmware: MockFirmware, answers: &[&str], protocol: Option<ProtocolLog>) -> Rig {
    let interrupt = Interrupt::new();
    let (session, harness) = mock_session(interrupt.clone());
    let firmware = firmware.spawn(harness);
    let mut config = ControllerConfig::default();
    config.session.attributes.stimulus = "looming".to_string();
    let controller = Controller::new(ControllerParts {
        config,
        stimuli: StimulusLibrary::from_names(["looming", "grating"]),
        shortcuts: ShortcutStore::in_memory(ExpansionLimits::default()),
        session,
        sink: TimedStimulusSink::new(Duration::from_secs(1)),
        operator: ScriptedOperator::new(answers.iter().copied()),
        protocol,
        events: None,
        interrupt: interrupt.clone(),
    });
    Rig {
        controller,
        firmware,
        interrupt,
    }
}

fn rig() -> Rig {
    rig_with(MockFirmware::new(), &[], None)
}

#[tokio::test(start_paused = true)]
async fn invalid_token_stops_series_before_anything_is_sent() {
    let mut rig = rig();

    let err = rig
        .controller
        .execute_line("r5 > bogus > p")
        .await
        .unwrap_err();

    match err {
        StimError::SeriesValidationFailed { token, index, .. } => {
            assert_eq!(token, "bogus");
            assert_eq!(index, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(rig.firmware.frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shortcut_runs_like_its_expansion() {
    let mut direct = rig();
    direct
        .controller
        .execute_line("pump:on > isi2 > pump:off")
        .await
        .unwrap();

    let mut stored = rig();
    stored
        .controller
        .execute_line("foo <- pump:on > isi2 > pump:off")
        .await
        .unwrap();
    assert!(stored.firmware.frames().is_empty());
    stored.controller.execute_line("foo").await.unwrap();

    assert_eq!(direct.firmware.frames(), vec!["pump:on", "pump:off"]);
    assert_eq!(stored.firmware.frames(), direct.firmware.frames());
}

#[tokio::test(start_paused = true)]
async fn repetition_blocks_expand_in_order() {
    let mut rig = rig();

    rig.controller
        .execute_line("trig > (pump:on > isi1 > pump:off) * 2")
        .await
        .unwrap();

    assert_eq!(
        rig.firmware.frames(),
        vec!["trigger", "pump:on", "pump:off", "pump:on", "pump:off"]
    );
}

#[tokio::test(start_paused = true)]
async fn pump_value_range_is_enforced() {
    let mut rig = rig();

    rig.controller
        .execute_line("set:pump_value=200")
        .await
        .unwrap();
    assert_eq!(rig.controller.params().pump_value, 200);

    let err = rig
        .controller
        .execute_line("set:pump_value=300")
        .await
        .unwrap_err();
    assert!(matches!(err, StimError::InvalidAttributeValue { .. }));
    assert_eq!(rig.controller.params().pump_value, 200);
}

#[tokio::test(start_paused = true)]
async fn pump_off_closes_valves_in_believed_state() {
    let mut rig = rig();

    rig.controller
        .execute_line("pump:on > air:on > odor_b:on > pump:off")
        .await
        .unwrap();
    rig.controller.execute_line("show:air_state").await.unwrap();

    let state = rig.controller.session().state();
    assert!(!state.pump.on);
    assert!(state.open_valves().is_empty());
    assert!(rig
        .controller
        .operator()
        .transcript()
        .contains("air_state = OFF"));
}

#[tokio::test(start_paused = true)]
async fn valve_without_pump_is_refused_locally() {
    let mut rig = rig();

    let control = rig.controller.handle_line("air:on").await;

    assert_eq!(control, LoopControl::Continue);
    assert!(rig.firmware.frames().is_empty());
    assert!(rig
        .controller
        .operator()
        .transcript()
        .contains("Cannot open air valve - Pump is OFF"));
}

#[tokio::test(start_paused = true)]
async fn timeout_stops_series_without_rollback() {
    let mut rig = rig_with(MockFirmware::new().ignore("shock:on"), &[], None);

    let err = rig
        .controller
        .execute_line("pump:on > shock:on > pump:off")
        .await
        .unwrap_err();

    assert!(matches!(err, StimError::ProtocolTimeout { .. }));
    assert_eq!(rig.firmware.frames(), vec!["pump:on", "shock:on"]);
    assert!(rig.controller.session().state().pump.on);
    assert!(!rig.controller.session().state().shock);
    assert!(rig
        .controller
        .operator()
        .transcript()
        .contains("1 of 3 commands ran"));
}

#[tokio::test(start_paused = true)]
async fn stop_recovers_after_timeout() {
    let mut rig = rig_with(MockFirmware::new().ignore("shock:on"), &[], None);
    rig.controller.handle_line("pump:on > shock:on").await;

    rig.controller.execute_line("stop").await.unwrap();

    assert_eq!(rig.firmware.frames().last().map(String::as_str), Some("quit"));
    assert!(!rig.controller.session().state().pump.on);
}

#[tokio::test(start_paused = true)]
async fn video_first_coordination() {
    let mut rig = rig();
    rig.controller
        .execute_line("set:LED_retention=500 > set:videoLED_timer=-200")
        .await
        .unwrap();
    let start = Instant::now();

    rig.controller.execute_line("t").await.unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1100));
    assert_eq!(rig.firmware.frames(), vec!["r500d200"]);
    assert_eq!(rig.controller.sink().played(), &["looming".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn led_first_coordination_waits_for_video() {
    let mut rig = rig();
    rig.controller
        .execute_line("set:LED_retention=2000 > set:videoLED_timer=300")
        .await
        .unwrap();
    let start = Instant::now();

    rig.controller.execute_line("t").await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(2000));
    assert_eq!(rig.firmware.frames(), vec!["r2000d0"]);

    // Light ON / Light OFF are reconciled before the next command.
    rig.controller.execute_line("r").await.unwrap();
    assert!(rig.controller.session().state().led);
    assert_eq!(rig.firmware.frames(), vec!["r2000d0", "on"]);
}

#[tokio::test(start_paused = true)]
async fn pulse_prompts_only_for_direct_commands() {
    let mut rig = rig_with(MockFirmware::new(), &["", "20", "1"], None);
    rig.controller
        .execute_line("set:update_pulse=true")
        .await
        .unwrap();

    rig.controller.execute_line("p").await.unwrap();
    assert_eq!(rig.firmware.frames(), vec!["p5000f20000w2"]);
    assert_eq!(rig.controller.params().pulse_width_ms, 2);

    rig.controller.execute_line("p > isi1").await.unwrap();
    assert_eq!(rig.controller.operator().prompts.len(), 3);
    assert_eq!(
        rig.firmware.frames(),
        vec!["p5000f20000w2", "p5000f20000w2"]
    );
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_wait_stops_board_and_asks() {
    let mut rig = rig_with(MockFirmware::new(), &["n"], None);
    rig.controller.execute_line("pump:on").await.unwrap();
    let trigger = rig.interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();
    });

    let control = rig.controller.handle_line("isi10").await;

    assert_eq!(control, LoopControl::Quit);
    assert!(!rig.interrupt.is_triggered());
    assert_eq!(rig.firmware.frames(), vec!["pump:on", "quit"]);
    assert!(!rig.controller.session().state().pump.on);
    assert_eq!(
        rig.controller.operator().prompts,
        vec!["Continue (Y) or Terminate (n)? "]
    );
}

fn interrupt_after(interrupt: &Interrupt, delay: Duration) {
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.trigger();
    });
}

#[tokio::test(start_paused = true)]
async fn interrupted_coordination_recovers_with_acks_still_buffered() {
    let mut rig = rig_with(MockFirmware::new(), &["y"], None);
    rig.controller.execute_line("pump:on").await.unwrap();
    interrupt_after(&rig.interrupt, Duration::from_millis(500));

    let control = rig.controller.handle_line("t").await;

    assert_eq!(control, LoopControl::Continue);
    let state = rig.controller.session().state();
    assert!(!state.pump.on);
    assert!(!state.led);
    assert_eq!(rig.firmware.frames(), vec!["pump:on", "r1000d0", "quit"]);
    assert!(rig.controller.sink().played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupted_timed_led_recovers() {
    let mut rig = rig_with(MockFirmware::new(), &["y"], None);
    rig.controller.execute_line("pump:on").await.unwrap();
    interrupt_after(&rig.interrupt, Duration::from_millis(500));

    let control = rig.controller.handle_line("r2").await;

    assert_eq!(control, LoopControl::Continue);
    let state = rig.controller.session().state();
    assert!(!state.pump.on && !state.led);
    assert_eq!(rig.firmware.frames(), vec!["pump:on", "r2000d0", "quit"]);

    rig.controller.execute_line("r").await.unwrap();
    assert!(rig.controller.session().state().led);
}

#[tokio::test(start_paused = true)]
async fn protocol_log_records_series_without_measured_intervals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protocol.txt");
    let mut rig = rig_with(MockFirmware::new(), &[], Some(ProtocolLog::at(&path)));

    rig.controller
        .execute_line("pump:on > isi2 > pump:off")
        .await
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let tokens: Vec<&str> = text
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .collect();
    assert_eq!(tokens, vec!["pump:on", "ISI 2.000", "pump:off"]);
}

#[tokio::test(start_paused = true)]
async fn direct_commands_log_measured_interval() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protocol.txt");
    let mut rig = rig_with(MockFirmware::new(), &[], Some(ProtocolLog::at(&path)));

    rig.controller.execute_line("pump:on").await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    rig.controller.execute_line("pump:off").await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("ISI 3.0"));
    assert!(text.find("pump:on") < text.find("ISI 3.0"));
}

/// Executor that takes a fixed extra time for every timed LED command.
struct SlowLed {
    overrun: Duration,
    waits: Vec<Duration>,
}

#[async_trait]
impl CommandExecutor for SlowLed {
    async fn execute(&mut self, step: &ScheduledStep<'_>) -> Result<Completion, StimError> {
        match step.command.kind() {
            CommandKind::LedTimed(seconds) => {
                tokio::time::sleep(Duration::from_secs_f64(*seconds) + self.overrun).await;
            }
            CommandKind::InterStimulusInterval(_) => {
                let wait = step.wait().unwrap_or_default();
                self.waits.push(wait);
                tokio::time::sleep(wait).await;
            }
            _ => {}
        }
        Ok(Completion::Done)
    }
}

#[tokio::test(start_paused = true)]
async fn interval_waits_absorb_drift() {
    let params = SessionParams::default();
    let stimuli: Vec<String> = Vec::new();
    let grammar = Grammar::new(&params, &stimuli, "r/v");
    let tokens: Vec<String> = ["r5", "isi5", "r5", "isi5", "isi5"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let series = grammar.compile_series(&tokens, &NoShortcuts).unwrap();
    let mut executor = SlowLed {
        overrun: Duration::from_millis(200),
        waits: Vec::new(),
    };

    let outcome = Scheduler::default().run(&series, &mut executor).await;

    assert!(outcome.is_success());
    let waits: Vec<f64> = executor.waits.iter().map(Duration::as_secs_f64).collect();
    assert!((waits[0] - 4.8).abs() < 0.01, "{waits:?}");
    assert!((waits[1] - 4.8).abs() < 0.01, "{waits:?}");
    assert!((waits[2] - 5.0).abs() < 0.01, "{waits:?}");
    assert!((outcome.elapsed.as_secs_f64() - 25.0).abs() < 0.05);
}
