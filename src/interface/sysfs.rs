// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scalar sysfs attribute I/O.
//!
//! Every call opens the attribute, transfers one value and closes it again,
//! which is how sysfs attributes are meant to be used: the kernel formats a
//! fresh value on every open.

use crate::{Error, Result};
use log::trace;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
};

/// Largest string attribute the HAL reads
const STR_BUF_LEN: usize = 64;
/// Largest numeric attribute the HAL reads
const NUM_BUF_LEN: usize = 32;

fn read_raw(path: &Path, limit: usize) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut buf = vec![0u8; limit];
    let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
    if n == 0 {
        return Err(Error::ShortIo(path.to_path_buf()));
    }
    buf.truncate(n);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_raw(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    let n = file.write(text.as_bytes()).map_err(|e| Error::io(path, e))?;
    if n == 0 {
        return Err(Error::ShortIo(path.to_path_buf()));
    }
    Ok(())
}

/// Leading integer of a string, the way `atoi` sees it.
fn leading_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    text[..end].parse().ok()
}

/// Read a string attribute with trailing whitespace removed.
pub fn read_str(path: &Path) -> Result<String> {
    let value = read_raw(path, STR_BUF_LEN)?;
    let value = value
        .trim_end_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string();
    trace!("{} = {}", path.display(), value);
    Ok(value)
}

/// Read an integer attribute.
pub fn read_int(path: &Path) -> Result<i32> {
    let text = read_raw(path, NUM_BUF_LEN)?;
    let value = leading_int(&text)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| Error::Parse {
            path: path.to_path_buf(),
            value: text.trim().to_string(),
        })?;
    trace!("{} = {}", path.display(), value);
    Ok(value)
}

/// Read a floating point attribute.
pub fn read_float(path: &Path) -> Result<f32> {
    let text = read_raw(path, NUM_BUF_LEN)?;
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    let value = trimmed
        .parse::<f32>()
        .ok()
        .or_else(|| leading_int(trimmed).map(|v| v as f32))
        .ok_or_else(|| Error::Parse {
            path: path.to_path_buf(),
            value: trimmed.to_string(),
        })?;
    trace!("{} = {}", path.display(), value);
    Ok(value)
}

pub fn write_int(path: &Path, value: i32) -> Result<()> {
    trace!("{} -> {}", value, path.display());
    write_raw(path, &value.to_string())
}

/// Write a float formatted like `%f`.
pub fn write_float(path: &Path, value: f32) -> Result<()> {
    trace!("{} -> {}", value, path.display());
    write_raw(path, &format!("{:.6}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int("10000\n"), Some(10000));
        assert_eq!(leading_int("  -42abc"), Some(-42));
        assert_eq!(leading_int("2500.000000"), Some(2500));
        assert_eq!(leading_int("x1"), None);
        assert_eq!(leading_int(""), None);
    }

    #[test]
    fn test_scalar_round_trip_through_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("in_accel_scale");
        fs::write(&path, "0.000598\n").expect("seed");

        let v = read_float(&path).expect("read float");
        assert!((v - 0.000598).abs() < 1e-9, "got {}", v);

        write_float(&path, 1.0).expect("write float");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "1.000000");

        write_int(&path, 7).expect("write int");
        assert_eq!(read_int(&path).expect("read int"), 7);
    }

    #[test]
    fn test_missing_and_empty_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(matches!(read_float(&missing), Err(Error::Io { .. })));
        assert!(matches!(write_int(&missing, 1), Err(Error::Io { .. })));
        assert!(!missing.exists(), "writes must not create attributes");

        let empty = dir.path().join("empty");
        fs::write(&empty, "").expect("seed");
        assert!(matches!(read_int(&empty), Err(Error::ShortIo(_))));
    }

    #[test]
    fn test_read_str_trims() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("part");
        fs::write(&path, "mpu6500\n").expect("seed");
        assert_eq!(read_str(&path).expect("read"), "mpu6500");
    }
}
