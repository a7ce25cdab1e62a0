use crate::transport::Transport;
use crate::Result;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// The board chain's UART, 8N1 without flow control.
#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub const DEFAULT_BAUD_RATE: u32 = 230_400;

    pub fn new(port: &str, baud_rate: u32) -> Result<Self> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()
            .inspect_err(|e| log::error!("Cannot open serial port '{port}': {e}"))?;
        log::debug!("Opened serial port '{port}' at {baud_rate} baud");
        Ok(Self { serial })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        log::trace!("write bytes: {bytes:02X?}");
        self.serial.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn read_exactly(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut rx_buffer = vec![0; n];
        let mut filled = 0;
        while filled < n {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.serial.set_timeout(remaining)?;
            match self.serial.read(&mut rx_buffer[filled..]) {
                Ok(0) => break,
                Ok(received) => filled += received,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        rx_buffer.truncate(filled);
        log::trace!("receive_bytes: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    fn clear_input_buffer(&mut self) -> Result<()> {
        let pending = self.serial.bytes_to_read()?;
        if pending > 0 {
            log::trace!("Dropping {pending} pending bytes");
        }
        self.serial.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
