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

// MB128 image transfer tool
mod protocol;
mod serial;
mod saver;
mod loader;

use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;
use serial::RealSerialPort;

#[derive(Parser)]
#[command(name = "mb128link")]
#[command(about = "Transfer the 128 KiB storage image of an MB128 adapter over a serial link", long_about = None)]
#[command(group(ArgGroup::new("direction").required(true).args(["save", "load"])))]
struct Cli {
    /// Serial port the MB128 adapter is attached to (e.g., /dev/ttyUSB0 or COM12)
    port: String,

    /// Local image file (raw 131072-byte binary blob)
    filename: PathBuf,

    /// Save the device image into FILENAME
    #[arg(short, long)]
    save: bool,

    /// Load FILENAME into the device
    #[arg(short, long)]
    load: bool,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Timeout in milliseconds for each read while saving
    #[arg(long, default_value = "500", value_name = "MS")]
    read_timeout: u64,

    /// Timeout in milliseconds for each write while loading
    #[arg(long, default_value = "500", value_name = "MS")]
    write_timeout: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

fn parse_timeout(ms: u64) -> Result<Duration, String> {
    // Stall detection needs a nonzero I/O window
    if ms == 0 {
        return Err("Timeout must be nonzero".to_string());
    }
    Ok(Duration::from_millis(ms))
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let read_timeout = match parse_timeout(cli.read_timeout) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: invalid read timeout: {}", e);
            std::process::exit(1);
        }
    };

    let write_timeout = match parse_timeout(cli.write_timeout) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: invalid write timeout: {}", e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, 8-N-1", cli.baud);

    let serial_port = match RealSerialPort::open(&cli.port, cli.baud) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    if cli.save {
        println!("\nSaving device image to: {}", cli.filename.display());
        if let Err(e) = save_image(serial_port, cli.filename, read_timeout) {
            eprintln!("Save failed: {}", e);
            std::process::exit(1);
        }
        println!("\nImage saved successfully!");
    } else {
        println!("\nLoading device image from: {}", cli.filename.display());
        if let Err(e) = load_image(serial_port, cli.filename, write_timeout) {
            eprintln!("Load failed: {}", e);
            std::process::exit(1);
        }
        println!("\nImage loaded successfully!");
    }
}

fn save_image(
    serial_port: RealSerialPort,
    destination: PathBuf,
    read_timeout: Duration,
) -> Result<(), saver::SaverError> {
    use saver::{SaverFsm, SendCommand};

    let mut state = SaverFsm::<SendCommand>::new(Box::new(serial_port), destination, read_timeout);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(saver::SaverError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn load_image(
    serial_port: RealSerialPort,
    source: PathBuf,
    write_timeout: Duration,
) -> Result<(), loader::LoaderError> {
    use loader::{LoaderFsm, SendCommand};

    if !source.exists() {
        return Err(loader::LoaderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", source.display()),
        )));
    }

    let mut state = LoaderFsm::<SendCommand>::new(Box::new(serial_port), source, write_timeout);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(loader::LoaderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
