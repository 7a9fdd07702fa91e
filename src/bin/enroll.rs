// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Operator tool: write an authorization token onto an attached device.
//!
//! Holds the enrollment pause marker while running so the daemon does not
//! eject the device being enrolled.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing::{error, info, warn};

use usb_sentinel::authority::{fingerprint, AuthorityService, SharedSecret};
use usb_sentinel::config::DaemonConfig;
use usb_sentinel::error::TokenWriteError;
use usb_sentinel::logging;
use usb_sentinel::models::DeviceDescriptor;
use usb_sentinel::platform::DeviceEnumerator;
use usb_sentinel::storage::{FsTokenStore, PauseGuard, StoragePaths, TokenStore};

fn main() -> ExitCode {
    logging::init();

    let config = match DaemonConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let secret = match SharedSecret::load(&config.secret_file) {
        Ok(secret) => secret,
        Err(e) => {
            error!(error = %e, "Failed to load shared secret");
            return ExitCode::FAILURE;
        }
    };
    let authority = AuthorityService::new(&secret);

    let paths = StoragePaths::new(&config.data_dir);
    let _pause = match PauseGuard::acquire(&paths) {
        Ok(guard) => guard,
        Err(e) => {
            error!(marker = %paths.enrollment_pause_marker().display(), error = %e, "Failed to pause enforcement");
            return ExitCode::FAILURE;
        }
    };

    println!("\nUSB Sentinel device enrollment");
    println!("Ejection is paused while this tool runs.");
    println!("Detecting USB drives...\n");

    let devices = match enumerate() {
        Ok(devices) => devices,
        Err(message) => {
            error!(error = %message, "Device enumeration failed");
            return ExitCode::FAILURE;
        }
    };
    if devices.is_empty() {
        println!("No USB drives found. Please insert a USB drive and try again.");
        return ExitCode::SUCCESS;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let stdin = io::stdin();
    let mut input = stdin.lock();

    let selection = write_table(&mut out, &devices)
        .and_then(|()| prompt_selection(&mut input, &mut out, devices.len()));
    let index = match selection {
        Ok(Some(index)) => index,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Failed to read selection");
            return ExitCode::FAILURE;
        }
    };

    let device = &devices[index];
    println!("\nSelected: {} ({})", device.volume_id, device.display_name());
    match enroll(&authority, &FsTokenStore, device) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
fn enumerate() -> Result<Vec<DeviceDescriptor>, String> {
    usb_sentinel::platform::linux::LsblkEnumerator
        .list()
        .map_err(|e| e.to_string())
}

#[cfg(not(target_os = "linux"))]
fn enumerate() -> Result<Vec<DeviceDescriptor>, String> {
    Err("device enumeration is not supported on this platform".to_string())
}

/// Why enrollment of the selected device failed.
#[derive(Debug, thiserror::Error)]
enum EnrollError {
    #[error("No valid USB serial number detected; this device cannot be enrolled")]
    NoFingerprint,

    #[error("Permission denied writing {0}; re-run with write access to the device")]
    PermissionDenied(std::path::PathBuf),

    #[error("Failed to save token: {0}")]
    Write(TokenWriteError),
}

fn enroll(
    authority: &AuthorityService,
    store: &dyn TokenStore,
    device: &DeviceDescriptor,
) -> Result<(), EnrollError> {
    let Some(fp) = fingerprint(device) else {
        warn!(volume = %device.volume_id, "Refusing to enroll device without a serial");
        return Err(EnrollError::NoFingerprint);
    };
    let token = authority
        .issue(Some(&fp))
        .map_err(|_| EnrollError::NoFingerprint)?;

    store.write(device, &token).map_err(|e| match e {
        TokenWriteError::PermissionDenied(path) => EnrollError::PermissionDenied(path),
        other => EnrollError::Write(other),
    })?;

    let path = StoragePaths::token_artifact(device.root());
    info!(
        volume = %device.volume_id,
        label = %device.display_name(),
        fingerprint = %fp,
        "Token issued"
    );
    println!("Token generated for USB: {}", device.display_name());
    println!("Saved at: {}", path.display());
    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}

fn write_table(out: &mut impl Write, devices: &[DeviceDescriptor]) -> io::Result<()> {
    writeln!(out, "Available USB Drives:")?;
    writeln!(out, "{:<5}{:<30}{:<20}{:<20}", "ID", "Volume", "Volume Name", "Serial Number")?;
    writeln!(out, "{}", "-".repeat(75))?;
    for (idx, device) in devices.iter().enumerate() {
        writeln!(
            out,
            "{:<5}{:<30}{:<20}{:<20}",
            idx,
            truncate(&device.volume_id, 28),
            truncate(&device.label, 15),
            truncate(&device.raw_serial, 15),
        )?;
    }
    Ok(())
}

/// Prompt until a valid index or `q`. `None` means quit (or end of input).
fn prompt_selection(
    input: &mut impl BufRead,
    out: &mut impl Write,
    count: usize,
) -> io::Result<Option<usize>> {
    loop {
        write!(out, "\nEnter device ID (0-{} or 'q' to quit): ", count - 1)?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match line.parse::<usize>() {
            Ok(index) if index < count => return Ok(Some(index)),
            Ok(_) => writeln!(out, "Invalid ID. Please try again.")?,
            Err(_) => writeln!(out, "Please enter a valid number or 'q' to quit.")?,
        }
    }
}
