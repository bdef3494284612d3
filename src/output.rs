/// Leveled, timestamped, optionally colored lines for the sync reconciler.
///
/// `[2026-01-31 14:02:11] INFO    Checking branch feature-x`
use std::io::Write;

const RED: &str = "\x1b[0;31m";
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[0;33m";
const BLUE: &str = "\x1b[0;34m";
const NC: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Info => BLUE,
            Level::Warn => YELLOW,
            Level::Error => RED,
            Level::Success => GREEN,
        }
    }
}

pub struct Reporter<W> {
    out: W,
    color: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn line(&mut self, level: Level, message: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let label = level.label();
        // Write errors (closed pipe etc.) must not change the outcome.
        let _ = if self.color {
            writeln!(
                self.out,
                "{}[{timestamp}] {label:<7}{NC} {message}",
                level.color()
            )
        } else {
            writeln!(self.out, "[{timestamp}] {label:<7} {message}")
        };
    }

    pub fn info(&mut self, message: &str) {
        self.line(Level::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.line(Level::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.line(Level::Error, message);
    }

    pub fn success(&mut self, message: &str) {
        self.line(Level::Success, message);
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
