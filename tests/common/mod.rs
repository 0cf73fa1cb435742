//! Shared test doubles: an in-memory serial port and a simulated board.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use stim_controller::device::{DeviceSession, DynSerial, SessionTimeouts};
use stim_controller::interrupt::Interrupt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Port handed to the session. Writes go to the board side, reads come from it.
#[derive(Debug)]
pub struct MockSerialPort {
    to_board: UnboundedSender<Vec<u8>>,
    from_board: UnboundedReceiver<Vec<u8>>,
    unread: VecDeque<u8>,
}

/// Board side of a [`MockSerialPort`].
#[derive(Debug)]
pub struct MockDeviceHarness {
    from_session: UnboundedReceiver<Vec<u8>>,
    to_session: UnboundedSender<Vec<u8>>,
    partial: Vec<u8>,
}

pub fn new_mock_serial() -> (MockSerialPort, MockDeviceHarness) {
    let (to_board, from_session) = mpsc::unbounded_channel();
    let (to_session, from_board) = mpsc::unbounded_channel();
    (
        MockSerialPort {
            to_board,
            from_board,
            unread: VecDeque::new(),
        },
        MockDeviceHarness {
            from_session,
            to_session,
            partial: Vec::new(),
        },
    )
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.unread.is_empty() {
            match self.from_board.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.unread.extend(chunk),
                // board gone: report EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = buf.remaining().min(self.unread.len());
        let chunk: Vec<u8> = self.unread.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let sent = self.to_board.send(buf.to_vec());
        Poll::Ready(
            sent.map(|()| buf.len())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "board side dropped")),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Queue one line for the session, as the board prints it.
    ///
    /// Lines sent after the session dropped its port are discarded.
    pub fn send_line(&self, line: &str) {
        let _ = self.to_session.send(format!("{line}\r\n").into_bytes());
    }

    /// Frames written so far, without waiting.
    pub fn frames(&mut self) -> Vec<String> {
        while let Ok(chunk) = self.from_session.try_recv() {
            self.partial.extend_from_slice(&chunk);
        }
        self.take_frames()
    }

    /// Wait for the next frame; `None` once the session dropped the port.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Some(frame);
            }
            let chunk = self.from_session.recv().await?;
            self.partial.extend_from_slice(&chunk);
        }
    }

    fn take_frame(&mut self) -> Option<String> {
        let end = self.partial.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.partial.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn take_frames(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.take_frame()).collect()
    }
}

/// Session over a fresh mock port with default timeouts.
pub fn mock_session(interrupt: Interrupt) -> (DeviceSession, MockDeviceHarness) {
    let (port, harness) = new_mock_serial();
    let port: DynSerial = Box::new(port);
    let session = DeviceSession::new(Some(port), SessionTimeouts::default(), interrupt);
    (session, harness)
}

/// Board that answers frames the way the controller firmware does.
#[derive(Debug, Default)]
pub struct MockFirmware {
    ignored: HashSet<String>,
}

/// Handle to a running [`MockFirmware`].
#[derive(Debug)]
pub struct FirmwareHandle {
    frames: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FirmwareHandle {
    /// Frames received so far.
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().expect("frame log poisoned").clone()
    }
}

impl Drop for FirmwareHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Default)]
struct BoardState {
    pump: bool,
    valves: [bool; 3],
}

const VALVES: [(&str, &str); 3] = [("air", "Air"), ("odor_a", "Odor_A"), ("odor_b", "Odor_B")];

impl MockFirmware {
    /// Firmware that answers every frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Never answer `frame`.
    pub fn ignore(mut self, frame: &str) -> Self {
        self.ignored.insert(frame.to_string());
        self
    }

    /// Run the firmware on `harness` until the session drops its port.
    pub fn spawn(self, mut harness: MockDeviceHarness) -> FirmwareHandle {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let log = frames.clone();
        let task = tokio::spawn(async move {
            let mut board = BoardState::default();
            while let Some(frame) = harness.next_frame().await {
                log.lock().expect("frame log poisoned").push(frame.clone());
                if self.ignored.contains(&frame) {
                    continue;
                }
                answer(&mut board, &harness, &frame).await;
            }
        });
        FirmwareHandle { frames, task }
    }
}

async fn answer(board: &mut BoardState, harness: &MockDeviceHarness, frame: &str) {
    let sleep_ms = |ms: u64| tokio::time::sleep(Duration::from_millis(ms));
    match frame {
        "on" => harness.send_line("Light ON"),
        "off" => harness.send_line("Light OFF"),
        "trigger" => {
            harness.send_line("Trigger ON");
            sleep_ms(100).await;
            harness.send_line("Trigger OFF");
        }
        "pump:on" => {
            board.pump = true;
            harness.send_line("Pump ON");
        }
        "pump:off" => {
            board.pump = false;
            harness.send_line("Pump OFF - closing valves");
            if board.valves.iter().any(|open| *open) {
                board.valves = [false; 3];
                harness.send_line("All valves CLOSED");
            }
        }
        "shock:on" => harness.send_line("Shock pulses ON"),
        "shock:off" => harness.send_line("Shock pulses OFF"),
        "quit" => {
            *board = BoardState::default();
            harness.send_line("All operations terminated");
        }
        _ => {
            if let Some(value) = frame.strip_prefix("pump:value:") {
                match value.parse::<u8>() {
                    Ok(v) => harness.send_line(&format!("Pump value set to {v}")),
                    Err(_) => harness.send_line("Invalid pump value"),
                }
            } else if let Some((on_ms, delay_ms)) = parse_led_timer(frame) {
                sleep_ms(delay_ms).await;
                harness.send_line("Light ON");
                sleep_ms(on_ms).await;
                harness.send_line("Light OFF");
            } else if let Some(span_ms) = parse_pulse_span(frame) {
                harness.send_line("Pulsing ON");
                sleep_ms(span_ms).await;
                harness.send_line("Pulsing OFF");
            } else if let Some((index, open)) = parse_valve(frame) {
                let label = VALVES[index].1;
                if open && !board.pump {
                    harness.send_line("Warning: Cannot open valve - Pump is OFF");
                } else {
                    board.valves[index] = open;
                    let word = if open { "OPEN" } else { "CLOSED" };
                    harness.send_line(&format!("{label} valve {word}"));
                }
            } else {
                harness.send_line(&format!("Unknown command: {frame}"));
            }
        }
    }
}

fn parse_led_timer(frame: &str) -> Option<(u64, u64)> {
    let (on, delay) = frame.strip_prefix('r')?.split_once('d')?;
    Some((on.parse().ok()?, delay.parse().ok()?))
}

fn parse_pulse_span(frame: &str) -> Option<u64> {
    let (span, _) = frame.strip_prefix('p')?.split_once('f')?;
    span.parse().ok()
}

fn parse_valve(frame: &str) -> Option<(usize, bool)> {
    let (name, action) = frame.split_once(':')?;
    let index = VALVES.iter().position(|(token, _)| *token == name)?;
    match action {
        "on" => Some((index, true)),
        "off" => Some((index, false)),
        _ => None,
    }
}
