//! Opening the board's serial port, with USB auto-detection.

use super::session::DynSerial;
use crate::config::SerialConfig;
use crate::error::{StimError, StimResult};
use serialport::SerialPortType;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

/// Whether a USB description matches the configured board name.
pub fn describes_board(manufacturer: Option<&str>, product: Option<&str>, board: &str) -> bool {
    let board = board.to_lowercase();
    [manufacturer, product]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&board))
}

/// Ports whose USB description mentions `board`.
pub fn find_boards(board: &str) -> StimResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    Ok(ports
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                describes_board(usb.manufacturer.as_deref(), usb.product.as_deref(), board)
            }
            _ => false,
        })
        .map(|info| info.port_name)
        .collect())
}

/// Resolve which port to open.
///
/// An explicit `port` wins. Otherwise exactly one matching USB port must be
/// present; none means the session runs without a board.
pub fn resolve_port(config: &SerialConfig) -> StimResult<Option<String>> {
    if let Some(port) = &config.port {
        return Ok(Some(port.clone()));
    }
    let mut found = find_boards(&config.board)?;
    match found.len() {
        0 => {
            warn!(board = %config.board, "No board found; serial communication is unavailable");
            Ok(None)
        }
        1 => Ok(found.pop()),
        _ => Err(StimError::Configuration(format!(
            "More than one {} connected ({}); set serial.port",
            config.board,
            found.join(", ")
        ))),
    }
}

/// Open the configured port (8N1, no flow control) and wait for the board
/// to finish its reset.
pub async fn open(config: &SerialConfig) -> StimResult<Option<DynSerial>> {
    let Some(path) = resolve_port(config)? else {
        return Ok(None);
    };
    let baud_rate = config.baud_rate;
    let port_path = path.clone();

    let port = spawn_blocking(move || {
        tokio_serial::new(&port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(std::io::Error::other)?
    .map_err(std::io::Error::from)?;

    info!(port = %path, baud_rate, "Serial port opened");
    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    let port: DynSerial = Box::new(port);
    Ok(Some(port))
}
