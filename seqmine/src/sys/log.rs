//! Leveled log sink with alert support.
//!
//! One global instance; the mining loop and the managers log through it.
//! Alerts are log entries that an external transport (chat webhook) may
//! forward; the sink itself only formats and prints them.

use std::fmt;

use chrono::Local;
use colored::Colorize;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.write_str(s)
    }
}

pub struct Log {
    pub level: Level,
}

static LOG: Lazy<Mutex<Log>> = Lazy::new(|| Mutex::new(Log { level: Level::Info }));

pub fn set_level(level: Level) {
    LOG.lock().level = level;
}

pub fn get_level() -> Level {
    LOG.lock().level
}

fn emit(level: Level, message: &str) {
    if level < get_level() {
        return;
    }
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let tag = match level {
        Level::Debug => "DEBUG".dimmed(),
        Level::Info => "INFO ".green(),
        Level::Warn => "WARN ".yellow(),
        Level::Error => "ERROR".red().bold(),
    };
    eprintln!("{} {} {}", timestamp, tag, message);
}

pub fn debug(message: &str) {
    emit(Level::Debug, message);
}

pub fn info(message: &str) {
    emit(Level::Info, message);
}

pub fn warn(message: &str) {
    emit(Level::Warn, message);
}

pub fn error(message: &str) {
    emit(Level::Error, message);
}

/// An error that ends the process.
pub fn fatal(message: &str) -> ! {
    emit(Level::Error, message);
    std::process::exit(1);
}

/// Highlighted notification, e.g. for found or updated programs.
pub fn alert(title: &str, text: &str) {
    emit(Level::Info, &format!("{} {}", title.bold(), text));
}
