use chrono::{DateTime, Utc};
use colored::*;
use log::{Level, Metadata, Record};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::KioskConfig;
use crate::error::{KioskError, Result};

static KIOSK_LOGGER: Lazy<KioskLogger> = Lazy::new(KioskLogger::new);

pub fn init() -> Result<()> {
    init_with_config(LoggerConfig::default())
}

/// Installs the process-wide logger. Can only succeed once per process.
pub fn init_with_config(config: LoggerConfig) -> Result<()> {
    let level = config.min_level;
    KIOSK_LOGGER.update_config(config)?;

    log::set_logger(&*KIOSK_LOGGER)
        .map_err(|e| KioskError::ConfigError(format!("Failed to set logger: {}", e)))?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn color(&self) -> Color {
        match self {
            LogLevel::Trace => Color::Cyan,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn to_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::Trace,
            LogLevel::Debug => Level::Debug,
            LogLevel::Info => Level::Info,
            LogLevel::Warn => Level::Warn,
            LogLevel::Error => Level::Error,
        }
    }

    pub fn to_level_filter(&self) -> log::LevelFilter {
        self.to_level().to_level_filter()
    }

    pub fn from_level(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(KioskError::ConfigError(format!(
                "Unknown log level '{}'",
                other
            ))),
        }
    }
}

/// One line of the JSON log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    /// Time since the logger was created.
    pub uptime_ms: u64,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            target: target.to_string(),
            message,
            file: String::new(),
            line: 0,
            uptime_ms: 0,
        }
    }

    pub fn with_location(mut self, file: &str, line: u32) -> Self {
        self.file = file.to_string();
        self.line = line;
        self
    }

    pub fn with_uptime(mut self, uptime: Duration) -> Self {
        self.uptime_ms = uptime.as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub show_colors: bool,
    pub show_file_location: bool,
    pub include_timestamp: bool,
    pub timestamp_format: String,
    /// Print JSON entries on stdout instead of formatted lines.
    pub output_json: bool,
    /// JSON lines are appended here when set.
    pub log_file: Option<PathBuf>,
    /// Dependency targets only shown at warn or above (HTTP stack chatter).
    pub quiet_targets: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: true,
            show_file_location: false,
            include_timestamp: true,
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            output_json: false,
            log_file: None,
            quiet_targets: vec!["hyper".to_string(), "reqwest".to_string()],
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.show_colors = enabled;
        self
    }

    pub fn with_file_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_json_output(mut self, enabled: bool) -> Self {
        self.output_json = enabled;
        self
    }

    /// Unattended installation: plain console plus a JSON trail on disk.
    pub fn kiosk() -> Self {
        Self {
            min_level: LogLevel::Info,
            show_colors: false,
            log_file: Some(PathBuf::from("logs/notyou.log")),
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            min_level: LogLevel::Debug,
            show_colors: true,
            show_file_location: true,
            ..Default::default()
        }
    }

    fn is_quiet(&self, target: &str) -> bool {
        self.quiet_targets
            .iter()
            .any(|quiet| target == quiet || target.starts_with(&format!("{}::", quiet)))
    }
}

pub struct KioskLogger {
    config: Mutex<LoggerConfig>,
    log_file: Mutex<Option<File>>,
    start_time: Instant,
}

impl KioskLogger {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(LoggerConfig::default()),
            log_file: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn update_config(&self, new_config: LoggerConfig) -> Result<()> {
        let file = match &new_config.log_file {
            Some(path) => Some(open_log_file(path)?),
            None => None,
        };
        if let Ok(mut log_file) = self.log_file.lock() {
            *log_file = file;
        }
        if let Ok(mut config) = self.config.lock() {
            *config = new_config;
        }
        Ok(())
    }

    fn format_line(&self, entry: &LogEntry, config: &LoggerConfig) -> String {
        let mut output = String::new();

        if config.include_timestamp {
            let timestamp = entry.timestamp.format(&config.timestamp_format).to_string();
            if config.show_colors {
                output.push_str(&format!("{} ", timestamp.bright_black()));
            } else {
                output.push_str(&format!("{} ", timestamp));
            }
        }

        let level = format!("{:<5}", entry.level.as_str());
        if config.show_colors {
            output.push_str(&format!(
                "[{}] {} ",
                level.color(entry.level.color()).bold(),
                entry.target.bright_blue()
            ));
            output.push_str(&entry.message.white().to_string());
        } else {
            output.push_str(&format!("[{}] {} {}", level, entry.target, entry.message));
        }

        if config.show_file_location && !entry.file.is_empty() {
            let location = format!("{}:{}", entry.file, entry.line);
            if config.show_colors {
                output.push_str(&format!(" ({})", location.bright_black()));
            } else {
                output.push_str(&format!(" ({})", location));
            }
        }

        output
    }

    fn write_to_file(&self, entry: &LogEntry) {
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                if let Ok(line) = serde_json::to_string(entry) {
                    let _ = writeln!(file, "{}", line);
                }
            }
        }
    }

    fn create_entry(&self, record: &Record) -> LogEntry {
        LogEntry::new(
            LogLevel::from_level(record.level()),
            record.target(),
            record.args().to_string(),
        )
        .with_location(record.file().unwrap_or("unknown"), record.line().unwrap_or(0))
        .with_uptime(self.start_time.elapsed())
    }
}

impl Default for KioskLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for KioskLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        match self.config.lock() {
            Ok(config) => {
                let floor = if config.is_quiet(metadata.target()) {
                    config.min_level.max(LogLevel::Warn)
                } else {
                    config.min_level
                };
                metadata.level() <= floor.to_level()
            }
            Err(_) => true,
        }
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = self.create_entry(record);

        let Ok(config) = self.config.lock() else {
            return;
        };
        if config.output_json {
            println!("{}", serde_json::to_string(&entry).unwrap_or_default());
        } else {
            println!("{}", self.format_line(&entry, &config));
        }
        if config.log_file.is_some() {
            self.write_to_file(&entry);
        }
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        if let Ok(mut guard) = self.log_file.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| {
            KioskError::ConfigError(format!("Cannot create log directory {}: {}", dir.display(), e))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            KioskError::ConfigError(format!("Cannot open log file {}: {}", path.display(), e))
        })
}

/// Measures one generation attempt. Logs when finished, or when dropped
/// unfinished because the attempt was cancelled.
pub struct Timer {
    start: Instant,
    name: String,
    finished: bool,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::debug!("Starting {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
            finished: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self, outcome: &str) -> Duration {
        self.finished = true;
        let duration = self.elapsed();
        log::info!("{} {} in {}ms", self.name, outcome, duration.as_millis());
        duration
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!(
                "{} abandoned after {}ms",
                self.name,
                self.elapsed().as_millis()
            );
        }
    }
}

pub fn log_startup_info(app_name: &str, version: &str) {
    log::info!("Starting {} v{}", app_name, version);
    log::info!("Logger initialized");
}

/// Logs the effective configuration. Credentials are never printed.
pub fn log_config_info(config: &KioskConfig) {
    log::info!("Configuration loaded:");
    log::info!("   API: {}", config.api.base_url);
    log::info!(
        "   Credentials: {}",
        if config.api.username.is_some() { "set" } else { "missing" }
    );
    log::info!(
        "   Generation: {} steps, {}x{}, {} (cfg {})",
        config.generation.steps,
        config.generation.width,
        config.generation.height,
        config.generation.sampler,
        config.generation.cfg_scale
    );
    log::info!(
        "   Timeout: {}s, retries: {}, cancel superseded: {}",
        config.request_timeout.as_secs(),
        config.retry.max_retries,
        config.cancel_superseded
    );
    log::info!(
        "   Prompt order: {}",
        config
            .prompt
            .category_order
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
}
