// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, FlowControl, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the MB128 transfer engines
pub trait SerialPort: Send {
    /// Write the whole buffer and flush. Used for the command byte.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Read whatever is available within `timeout`. `Ok(0)` or a `TimedOut`
    /// error means no data arrived inside the window.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Write as much of `buf` as the channel accepts within `timeout`,
    /// returning the accepted count. `Ok(0)` or `TimedOut` means backpressure.
    fn write_timeout(&mut self, buf: &[u8], timeout: Duration) -> std::io::Result<usize>;

    /// Block until all accepted bytes have left the host.
    fn flush(&mut self) -> std::io::Result<()>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    /// Open `port_name` at `baud_rate`, configured 8-N-1 with no flow
    /// control as the MB128 link expects.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }

    fn write_timeout(&mut self, buf: &[u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// One scripted response to a read request
#[cfg(test)]
pub enum ReadStep {
    /// Bytes that arrive within the read window
    Chunk(Vec<u8>),
    /// Window expires with nothing available
    Timeout,
    /// Hard transport fault
    Fault(std::io::ErrorKind),
}

/// One scripted response to a write request
#[cfg(test)]
pub enum WriteStep {
    /// Channel accepts up to this many bytes
    Accept(usize),
    /// Window expires with nothing accepted
    Timeout,
    /// Hard transport fault
    Fault(std::io::ErrorKind),
}

#[cfg(test)]
pub struct MockSerialPort {
    // Scripted responses for read/write calls
    reads: Vec<ReadStep>,
    read_pos: usize,
    writes: Vec<WriteStep>,
    write_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(reads: Vec<ReadStep>, writes: Vec<WriteStep>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            reads,
            read_pos: 0,
            writes,
            write_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        // Command byte path, always accepted in full
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.reads.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock read timeout"
            ));
        }

        let step = &self.reads[self.read_pos];
        self.read_pos += 1;

        match step {
            ReadStep::Chunk(chunk) => {
                assert!(
                    chunk.len() <= buf.len(),
                    "Mock chunk of {} bytes does not fit a {} byte read request",
                    chunk.len(),
                    buf.len()
                );
                buf[..chunk.len()].copy_from_slice(chunk);
                Ok(chunk.len())
            }
            ReadStep::Timeout => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock read timeout"
            )),
            ReadStep::Fault(kind) => Err(std::io::Error::new(*kind, "Mock read fault")),
        }
    }

    fn write_timeout(&mut self, buf: &[u8], _timeout: Duration) -> std::io::Result<usize> {
        if self.write_pos >= self.writes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock write timeout"
            ));
        }

        let step = &self.writes[self.write_pos];
        self.write_pos += 1;

        match step {
            WriteStep::Accept(quota) => {
                let accepted = buf.len().min(*quota);
                self.write_log.extend_from_slice(&buf[..accepted]);
                Ok(accepted)
            }
            WriteStep::Timeout => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock write timeout"
            )),
            WriteStep::Fault(kind) => Err(std::io::Error::new(*kind, "Mock write fault")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockSerialPort dropped with {} unconsumed read steps",
            self.reads.len() - self.read_pos
        );

        assert_eq!(
            self.write_pos,
            self.writes.len(),
            "MockSerialPort dropped with {} unconsumed write steps",
            self.writes.len() - self.write_pos
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes\nGot {} bytes",
            self.expected_writes.len(),
            self.write_log.len()
        );
    }
}
