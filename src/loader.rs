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
use std::io::Read;
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
pub enum LoaderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source file is too small to fill the device image. Nothing is
    /// sent to the channel in this case, not even the command byte.
    #[error("source image is {len} bytes, expected at least 131072")]
    ShortSource { len: u64 },

    /// The channel stopped accepting data before the full image went out.
    #[error("transfer stalled after sending {sent} of 131072 bytes")]
    Stalled { sent: usize },

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

pub struct LoaderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    source: PathBuf,
    buffer: Vec<u8>,
    sent: usize,
    retries: u8,
    write_timeout: Duration,
}

// ============================================================================
// Trait
// ============================================================================

pub trait LoaderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> LoaderFsm<S> {
    fn transition<T>(self) -> Box<LoaderFsm<T>> {
        Box::new(LoaderFsm {
            state: PhantomData,
            serial: self.serial,
            source: self.source,
            buffer: self.buffer,
            sent: self.sent,
            retries: self.retries,
            write_timeout: self.write_timeout,
        })
    }

    fn io_error(&self, e: std::io::Error) -> LoaderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        LoaderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl LoaderState for LoaderFsm<SendCommand> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;

        // A short source fails before anything touches the wire
        let mut file = File::open(&fsm.source)?;
        let len = file.metadata()?.len();
        if len < IMAGE_SIZE as u64 {
            return Err(LoaderError::ShortSource { len });
        }

        // Bytes beyond the image size are ignored
        file.read_exact(&mut fsm.buffer)?;
        debug!("Read {} bytes from {:?}", IMAGE_SIZE, fsm.source);

        fsm.serial.write_all(&[CMD_LOAD])?;
        debug!("Sent load command");
        let next = fsm.transition::<Transferring>();
        Ok(next as Box<dyn LoaderState>)
    }
}

impl LoaderState for LoaderFsm<Transferring> {
    fn step(self: Box<Self>) -> Result<Box<dyn LoaderState>, LoaderError> {
        let mut fsm = *self;

        if fsm.sent == IMAGE_SIZE {
            fsm.serial.flush()?;
            info!("Sent all {} bytes to device", IMAGE_SIZE);
            return Err(LoaderError::TransferComplete);
        }

        let accepted = match fsm.serial.write_timeout(&fsm.buffer[fsm.sent..], fsm.write_timeout) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(fsm.io_error(e)),
        };

        if accepted == 0 {
            fsm.retries -= 1;
            debug!("Channel accepted nothing within write window, {} retries left", fsm.retries);
            if fsm.retries == 0 {
                return Err(LoaderError::Stalled { sent: fsm.sent });
            }
        } else {
            fsm.sent += accepted;
            fsm.retries = MAX_STALLS;
            debug!("Sent {} bytes, {} remaining", accepted, IMAGE_SIZE - fsm.sent);
        }

        Ok(Box::new(fsm) as Box<dyn LoaderState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl LoaderFsm<SendCommand> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        source: PathBuf,
        write_timeout: Duration,
    ) -> Box<dyn LoaderState> {
        Box::new(LoaderFsm {
            state: PhantomData::<SendCommand>,
            serial,
            source,
            buffer: vec![0; IMAGE_SIZE],
            sent: 0,
            retries: MAX_STALLS,
            write_timeout,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
