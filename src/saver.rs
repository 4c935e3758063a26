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

use std::marker::PhantomData;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use log::{debug, info};
use thiserror::Error;
use crate::serial::SerialPort;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SaverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device stopped producing data before the full image arrived.
    /// The destination file retains the bytes received so far.
    #[error("transfer stalled after receiving {received} of 131072 bytes")]
    Stalled { received: usize },

    #[error("transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct SendCommand;
pub struct Transferring;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SaverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    destination: PathBuf,
    file: Option<File>,
    buffer: Vec<u8>,
    remaining: usize,
    retries: u8,
    read_timeout: Duration,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SaverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SaverState>, SaverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SaverFsm<S> {
    fn transition<T>(self) -> Box<SaverFsm<T>> {
        Box::new(SaverFsm {
            state: PhantomData,
            serial: self.serial,
            destination: self.destination,
            file: self.file,
            buffer: self.buffer,
            remaining: self.remaining,
            retries: self.retries,
            read_timeout: self.read_timeout,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SaverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SaverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SaverState for SaverFsm<SendCommand> {
    fn step(self: Box<Self>) -> Result<Box<dyn SaverState>, SaverError> {
        let mut fsm = *self;
        // The destination exists before the command byte goes out; a stalled
        // session leaves whatever partial bytes arrived.
        fsm.file = Some(File::create(&fsm.destination)?);
        fsm.serial.write_all(&[CMD_SAVE])?;
        debug!("Sent save command");
        let next = fsm.transition::<Transferring>();
        Ok(next as Box<dyn SaverState>)
    }
}

impl SaverState for SaverFsm<Transferring> {
    fn step(self: Box<Self>) -> Result<Box<dyn SaverState>, SaverError> {
        let mut fsm = *self;

        if fsm.remaining == 0 {
            if let Some(ref mut file) = fsm.file {
                file.flush()?;
            }
            info!("Received all {} bytes from device", IMAGE_SIZE);
            return Err(SaverError::TransferComplete);
        }

        let request = fsm.remaining;
        let received = match fsm.serial.read_timeout(&mut fsm.buffer[..request], fsm.read_timeout) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(fsm.io_error(e)),
        };

        if received == 0 {
            fsm.retries -= 1;
            debug!("No data within read window, {} retries left", fsm.retries);
            if fsm.retries == 0 {
                return Err(SaverError::Stalled {
                    received: IMAGE_SIZE - fsm.remaining,
                });
            }
        } else {
            if let Some(ref mut file) = fsm.file {
                file.write_all(&fsm.buffer[..received])?;
            }
            fsm.remaining -= received;
            fsm.retries = MAX_STALLS;
            debug!("Received {} bytes, {} remaining", received, fsm.remaining);
        }

        Ok(Box::new(fsm) as Box<dyn SaverState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SaverFsm<SendCommand> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        destination: PathBuf,
        read_timeout: Duration,
    ) -> Box<dyn SaverState> {
        Box::new(SaverFsm {
            state: PhantomData::<SendCommand>,
            serial,
            destination,
            file: None,
            buffer: vec![0; IMAGE_SIZE],
            remaining: IMAGE_SIZE,
            retries: MAX_STALLS,
            read_timeout,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{MockSerialPort, ReadStep, WriteStep};

    fn run_saver(mut fsm: Box<dyn SaverState>) -> Result<(), SaverError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SaverError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn image_pattern() -> Vec<u8> {
        (0..IMAGE_SIZE).map(|i| (i % 251) as u8).collect()
    }

    fn saver_with_reads(reads: Vec<ReadStep>, destination: PathBuf) -> Box<dyn SaverState> {
        let mock = MockSerialPort::new(reads, Vec::<WriteStep>::new(), vec![CMD_SAVE]);
        SaverFsm::new(Box::new(mock), destination, Duration::from_millis(10))
    }

    #[test]
    fn test_save_single_read() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        let image = image_pattern();
        let fsm = saver_with_reads(vec![ReadStep::Chunk(image.clone())], dest.clone());

        run_saver(fsm).expect("Transfer failed");

        assert_eq!(std::fs::read(&dest).unwrap(), image);
    }

    #[test]
    fn test_save_four_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        let image = image_pattern();
        let reads = image
            .chunks(32768)
            .map(|c| ReadStep::Chunk(c.to_vec()))
            .collect();
        let fsm = saver_with_reads(reads, dest.clone());

        run_saver(fsm).expect("Transfer failed");

        assert_eq!(std::fs::read(&dest).unwrap(), image);
    }

    #[test]
    fn test_save_stall_without_progress() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        let reads = vec![ReadStep::Timeout, ReadStep::Timeout, ReadStep::Timeout];
        let fsm = saver_with_reads(reads, dest.clone());

        match run_saver(fsm) {
            Err(SaverError::Stalled { received }) => assert_eq!(received, 0),
            other => panic!("Expected stall, got {:?}", other),
        }

        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[test]
    fn test_save_progress_resets_retries() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        // Two strikes, progress, two more strikes, rest of the image.
        // Succeeds only if progress resets the counter.
        let image = image_pattern();
        let reads = vec![
            ReadStep::Timeout,
            ReadStep::Timeout,
            ReadStep::Chunk(image[..65536].to_vec()),
            ReadStep::Timeout,
            ReadStep::Timeout,
            ReadStep::Chunk(image[65536..].to_vec()),
        ];
        let fsm = saver_with_reads(reads, dest.clone());

        run_saver(fsm).expect("Transfer failed");

        assert_eq!(std::fs::read(&dest).unwrap(), image);
    }

    #[test]
    fn test_save_partial_then_stall_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        let image = image_pattern();
        let reads = vec![
            ReadStep::Chunk(image[..1000].to_vec()),
            ReadStep::Timeout,
            ReadStep::Timeout,
            ReadStep::Timeout,
        ];
        let fsm = saver_with_reads(reads, dest.clone());

        match run_saver(fsm) {
            Err(SaverError::Stalled { received }) => assert_eq!(received, 1000),
            other => panic!("Expected stall, got {:?}", other),
        }

        assert_eq!(std::fs::read(&dest).unwrap(), &image[..1000]);
    }

    #[test]
    fn test_save_fresh_session_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        // No engine state persists: a failed session followed by a fresh one
        // over a clean channel produces a full image.
        let reads = vec![ReadStep::Timeout, ReadStep::Timeout, ReadStep::Timeout];
        let fsm = saver_with_reads(reads, dest.clone());
        assert!(run_saver(fsm).is_err());

        let image = image_pattern();
        let fsm = saver_with_reads(vec![ReadStep::Chunk(image.clone())], dest.clone());
        run_saver(fsm).expect("Transfer failed");

        assert_eq!(std::fs::read(&dest).unwrap(), image);
    }

    #[test]
    fn test_save_hard_fault_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image.sav");

        let reads = vec![ReadStep::Fault(std::io::ErrorKind::BrokenPipe)];
        let fsm = saver_with_reads(reads, dest.clone());

        match run_saver(fsm) {
            Err(SaverError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("Expected I/O fault, got {:?}", other),
        }
    }
}
