//! Line-oriented transfer progress.
//!
//! Collaborators (CLI, desktop bridge) parse these lines, so the grammar is
//! stable: `[send name] p% (sent/total) rate/s ETA Ns` and the terminal lines
//! `[send] done: ...`, `[receive] saved ...`, `[error] ...`.

use std::sync::Arc;
use std::time::Instant;

use crate::constants::{PROGRESS_MIN_DELTA, PROGRESS_MIN_INTERVAL};

/// Destination for progress and outcome lines.
pub type ProgressSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink that prints to stdout.
pub fn stdout_sink() -> ProgressSink {
    Arc::new(|line| println!("{line}"))
}

/// Sink that discards everything.
pub fn null_sink() -> ProgressSink {
    Arc::new(|_| {})
}

/// Format bytes in human-readable form.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Throttled per-file progress reporter.
///
/// Lines are emitted when at least [`PROGRESS_MIN_INTERVAL`] has passed since
/// the previous line or the completed fraction advanced by at least
/// [`PROGRESS_MIN_DELTA`].
pub struct ProgressReporter {
    sink: ProgressSink,
    label: String,
    total: u64,
    start_offset: u64,
    current: u64,
    started: Instant,
    last_emit: Option<Instant>,
    last_fraction: f64,
}

impl ProgressReporter {
    /// Create a reporter for one file. `direction` is `send` or `recv`;
    /// `start_offset` is the resume offset already on disk.
    pub fn new(sink: ProgressSink, direction: &str, name: &str, total: u64, start_offset: u64) -> Self {
        Self {
            sink,
            label: format!("[{direction} {name}]"),
            total,
            start_offset,
            current: start_offset,
            started: Instant::now(),
            last_emit: None,
            last_fraction: fraction(start_offset, total),
        }
    }

    /// Record the absolute byte position and emit a line if due.
    pub fn update(&mut self, current: u64) {
        self.current = current;
        let now = Instant::now();
        let f = fraction(current, self.total);

        let interval_due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= PROGRESS_MIN_INTERVAL,
        };
        let delta_due = f - self.last_fraction >= PROGRESS_MIN_DELTA;

        if interval_due || delta_due {
            self.emit(now, f);
        }
    }

    /// Emit the final 100% line regardless of throttling.
    pub fn finish(&mut self) {
        self.current = self.total;
        self.emit(Instant::now(), 1.0);
    }

    fn emit(&mut self, now: Instant, f: f64) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let moved = self.current.saturating_sub(self.start_offset);
        let rate = if elapsed > 0.0 { moved as f64 / elapsed } else { 0.0 };
        let eta = if rate > 0.0 && self.current < self.total {
            format!("{:.0}s", (self.total - self.current) as f64 / rate)
        } else if self.current >= self.total {
            "0s".to_string()
        } else {
            "--".to_string()
        };

        let line = format!(
            "{} {:.1}% ({}/{}) {}/s ETA {eta}",
            self.label,
            f * 100.0,
            format_bytes(self.current),
            format_bytes(self.total),
            format_bytes(rate as u64),
        );
        (self.sink)(&line);
        self.last_emit = Some(now);
        self.last_fraction = f;
    }
}

fn fraction(current: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        current as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (ProgressSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines_clone = Arc::clone(&lines);
        let sink: ProgressSink = Arc::new(move |line: &str| {
            lines_clone.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(999), "999 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn first_update_emits_parseable_line() {
        let (sink, lines) = capture();
        let mut reporter = ProgressReporter::new(sink, "send", "a.txt", 1000, 0);
        reporter.update(500);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[send a.txt] 50.0% ("));
        assert!(lines[0].contains("ETA"));
    }

    #[test]
    fn tiny_updates_are_throttled() {
        let (sink, lines) = capture();
        let mut reporter = ProgressReporter::new(sink, "recv", "big.bin", 10_000_000, 0);
        reporter.update(1);
        // 0.0001% more: below the delta threshold, within the interval.
        reporter.update(11);
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn large_delta_bypasses_interval() {
        let (sink, lines) = capture();
        let mut reporter = ProgressReporter::new(sink, "recv", "big.bin", 1000, 0);
        reporter.update(1);
        reporter.update(500);
        assert_eq!(lines.lock().unwrap().len(), 2);
    }

    #[test]
    fn finish_reports_full_for_zero_byte_file() {
        let (sink, lines) = capture();
        let mut reporter = ProgressReporter::new(sink, "send", "empty", 0, 0);
        reporter.finish();
        let lines = lines.lock().unwrap();
        assert!(lines[0].contains("100.0%"));
        assert!(lines[0].contains("ETA 0s"));
    }
}
