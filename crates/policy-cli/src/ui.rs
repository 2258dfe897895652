//! User-facing output.
//!
//! Write failures (a closed pipe, usually) are ignored: output never stops a
//! command that has already done its work.

use std::fmt::Display;
use std::io::{self, Write};

use serde::Serialize;

/// Output sink for messages, tables and JSON documents.
#[derive(Debug)]
pub struct Ui<W = io::Stdout> {
    out: W,
}

impl Ui {
    /// Sink writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Ui<W> {
    /// Sink writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes one line.
    pub fn message(&mut self, message: impl Display) {
        let _ = writeln!(self.out, "{message}");
    }

    /// Writes a table with left-aligned, space-padded columns.
    pub fn table(&mut self, headers: &[&str], rows: &[Vec<String>]) {
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let header: Vec<String> = headers.iter().map(ToString::to_string).collect();
        for row in std::iter::once(&header).chain(rows) {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join("  ");
            let _ = writeln!(self.out, "{}", line.trim_end());
        }
    }

    /// Writes `value` as pretty-printed JSON.
    pub fn json<T: Serialize>(&mut self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => {
                let _ = writeln!(self.out, "{json}");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to render JSON output"),
        }
    }

    /// Returns the underlying writer.
    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Formats a byte count for listings.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut Ui<Vec<u8>>)) -> String {
        let mut ui = Ui::new(Vec::new());
        f(&mut ui);
        String::from_utf8(ui.into_inner()).unwrap()
    }

    #[test]
    fn test_table_aligns_columns() {
        let out = render(|ui| {
            ui.table(
                &["REFERENCE", "SIZE"],
                &[
                    vec!["opcr.io/acme/policy:1.0.0".to_string(), "10 B".to_string()],
                    vec!["opcr.io/a:b".to_string(), "1.5 KiB".to_string()],
                ],
            );
        });
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "REFERENCE                  SIZE");
        assert_eq!(lines[2], "opcr.io/a:b                1.5 KiB");
    }

    #[test]
    fn test_json_is_pretty() {
        let out = render(|ui| ui.json(&serde_json::json!({ "a": 1 })));
        assert_eq!(out, "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
