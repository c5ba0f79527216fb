/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! No-alloc `fmt::Write` adapter for formatting into a caller-supplied buffer.
//!
//! Needed before the heap exists (early boot diagnostics) and anywhere a
//! bounded-size message must not allocate (panic path).

use core::{cmp::min, fmt};

pub struct WriteTo<'a> {
    buffer: &'a mut [u8],
    used: usize,
}

impl<'a> WriteTo<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        WriteTo { buffer, used: 0 }
    }

    pub fn into_str(self) -> Option<&'a str> {
        if self.used <= self.buffer.len() {
            Some(unsafe { core::str::from_utf8_unchecked(&self.buffer[..self.used]) })
        } else {
            None
        }
    }
}

impl fmt::Write for WriteTo<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.used > self.buffer.len() {
            return Err(fmt::Error);
        }
        let remaining_buf = &mut self.buffer[self.used..];
        let raw_s = s.as_bytes();
        let write_num = min(raw_s.len(), remaining_buf.len());
        remaining_buf[..write_num].copy_from_slice(&raw_s[..write_num]);
        self.used += raw_s.len();
        if write_num < raw_s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

pub fn show<'a>(buffer: &'a mut [u8], args: fmt::Arguments) -> Result<&'a str, fmt::Error> {
    let mut w = WriteTo::new(buffer);
    fmt::write(&mut w, args)?;
    w.into_str().ok_or(fmt::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_works() {
        let mut buf = [0u8; 64];
        let s: &str = show(
            &mut buf,
            format_args!("write some stuff {:?}: {}", "foo", 42),
        )
        .unwrap();
        assert_eq!(s, "write some stuff \"foo\": 42");
        assert_eq!(s.as_ptr(), buf.as_ptr());
    }

    #[test]
    fn write_to_reports_overflow() {
        let mut buf = [0u8; 4];
        assert!(show(&mut buf, format_args!("too long")).is_err());
    }
}
