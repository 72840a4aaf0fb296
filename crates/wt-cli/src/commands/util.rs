//! Shared utilities for CLI commands.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

/// Formats whole seconds as `H:MM:SS`. Negative input renders as zero.
pub fn format_hms(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hms_pads_minutes_and_seconds() {
        assert_eq!(format_hms(0), "0:00:00");
        assert_eq!(format_hms(220), "0:03:40");
        assert_eq!(format_hms(36_061), "10:01:01");
        assert_eq!(format_hms(-5), "0:00:00");
    }
}
