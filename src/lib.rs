//! # Stimulus Controller Library
//!
//! Text-command controller for a behavioural stimulation rig: an LED, an air
//! pump with three valves, a shock generator and a trigger line driven by a
//! microcontroller over a serial link, plus video stimuli.
//!
//! ## Crate Structure
//!
//! - **`command`**: the command language. `Grammar::validate` turns one text
//!   token into a typed `Command`; `series` splits `a > (b > c) * 3` chains;
//!   `attributes` is the table behind `set:` and `show:`.
//! - **`shortcuts`**: named series persisted to a text file, with recursive
//!   expansion, cycle detection and size caps.
//! - **`scheduler`**: runs a validated series in order and compensates
//!   interval waits for accumulated timing drift.
//! - **`device`**: the serial session with the board. Frames, acknowledgments,
//!   the believed `DeviceState`, interlocks and port discovery.
//! - **`controller`**: the interactive loop tying the pieces together.
//! - **`stimulus`**: the stimulus library and the `StimulusSink` boundary.
//! - **`protocol_log`**: autosaved protocol and timestamped event log.
//! - **`operator`**: prompts and messages for the person at the keyboard.
//! - **`interrupt`**: Ctrl+C handling shared by every cancellable wait.
//! - **`config`**, **`logging`**, **`error`**: configuration, tracing setup and
//!   the shared error type.

pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod help;
pub mod interrupt;
pub mod logging;
pub mod operator;
pub mod protocol_log;
pub mod scheduler;
pub mod shortcuts;
pub mod stimulus;

pub use error::{StimError, StimResult};
