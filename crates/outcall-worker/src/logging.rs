//! Logging initialization and the domain event helpers.
//!
//! Initialized once before any job runs. Development gets colorized,
//! source-located console lines; every other environment gets plain
//! structured lines. A log file can be appended in addition; failure to
//! open it degrades to console-only logging with a warning.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// DEBUG/INFO/WARNING/ERROR/CRITICAL, or a full tracing filter
    /// directive.
    pub level: String,
    /// Optional file to append structured lines to.
    pub file: Option<PathBuf>,
    /// `development` switches the console format.
    pub environment: String,
}

impl From<&Settings> for LogOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            level: settings.log_level.clone(),
            file: settings.log_file.clone(),
            environment: settings.environment.clone(),
        }
    }
}

/// Maps conventional level names onto tracing filter directives.
fn level_directive(level: &str) -> String {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug".into(),
        "INFO" => "info".into(),
        "WARNING" => "warn".into(),
        "ERROR" => "error".into(),
        "CRITICAL" => "error".into(),
        _ => level.to_ascii_lowercase(),
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber. Call exactly once, before any job runs.
pub fn init(options: &LogOptions) {
    let filter = EnvFilter::try_new(level_directive(&options.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let development = options.environment == "development";

    let console = fmt::layer()
        .with_ansi(development)
        .with_file(development)
        .with_line_number(development);

    let (file_layer, file_failure) = match &options.file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (
                Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file))),
                None,
            ),
            Err(e) => (None, Some((path.clone(), e))),
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    info!(
        level = options.level.as_str(),
        environment = options.environment.as_str(),
        "logging initialized"
    );
    match (&options.file, file_failure) {
        (Some(path), None) => info!(path = %path.display(), "file logging enabled"),
        (_, Some((path, e))) => warn!(
            path = %path.display(),
            "failed to open log file, continuing with console only: {e}"
        ),
        _ => {}
    }
}

/// Formats a call lifecycle event line.
pub fn format_call_event(
    event: &str,
    phone_number: Option<&str>,
    duration: Option<u64>,
    room_name: Option<&str>,
) -> String {
    let mut parts = vec![event.to_string()];
    if let Some(number) = phone_number {
        parts.push(format!("Number: {number}"));
    }
    if let Some(duration) = duration {
        parts.push(format!("Duration: {duration}s"));
    }
    if let Some(room) = room_name {
        parts.push(format!("Room: {room}"));
    }
    parts.join(" | ")
}

/// Logs a call lifecycle event with consistent formatting.
pub fn log_call_event(
    event: &str,
    phone_number: Option<&str>,
    duration: Option<u64>,
    room_name: Option<&str>,
) {
    info!(
        target: "outcall::call",
        "{}",
        format_call_event(event, phone_number, duration, room_name)
    );
}

/// Formats a webhook event line.
pub fn format_webhook_event(
    event: &str,
    url: &str,
    status: Option<u16>,
    room_name: Option<&str>,
) -> String {
    let mut parts = vec![event.to_string()];
    if let Some(room) = room_name {
        parts.push(format!("Room: {room}"));
    }
    parts.push(format!("URL: {url}"));
    if let Some(status) = status {
        parts.push(format!("Status: {status}"));
    }
    parts.join(" | ")
}

/// Logs a webhook event; non-2xx statuses log at error level.
pub fn log_webhook_event(event: &str, url: &str, status: Option<u16>, room_name: Option<&str>) {
    let line = format_webhook_event(event, url, status, room_name);
    match status {
        Some(code) if !(200..300).contains(&code) => error!(target: "outcall::webhook", "{line}"),
        _ => info!(target: "outcall::webhook", "{line}"),
    }
}

/// Formats a cost event line.
pub fn format_cost_event(
    event: &str,
    total_cost: Option<f64>,
    currency: &str,
    room_name: Option<&str>,
) -> String {
    let mut parts = vec![event.to_string()];
    if let Some(room) = room_name {
        parts.push(format!("Room: {room}"));
    }
    if let Some(total) = total_cost {
        parts.push(format!("Total: {currency}{total:.2}"));
    }
    parts.join(" | ")
}

/// Logs a cost event with consistent formatting.
pub fn log_cost_event(event: &str, total_cost: Option<f64>, currency: &str, room_name: Option<&str>) {
    info!(
        target: "outcall::cost",
        "{}",
        format_cost_event(event, total_cost, currency, room_name)
    );
}

/// Formats a provider detection event line.
pub fn format_provider_event(event: &str, providers: &[(&str, &str)]) -> String {
    let mut parts = vec![event.to_string()];
    if !providers.is_empty() {
        let list: Vec<String> = providers
            .iter()
            .map(|(kind, name)| format!("{}={}", kind.to_ascii_uppercase(), name))
            .collect();
        parts.push(list.join(" | "));
    }
    parts.join(" | ")
}

/// Logs a provider detection event with consistent formatting.
pub fn log_provider_event(event: &str, providers: &[(&str, &str)]) {
    info!(
        target: "outcall::provider",
        "{}",
        format_provider_event(event, providers)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_event_includes_all_known_fields() {
        let line = format_call_event(
            "CALL COMPLETED",
            Some("+15551234567"),
            Some(42),
            Some("call-1"),
        );
        assert_eq!(
            line,
            "CALL COMPLETED | Number: +15551234567 | Duration: 42s | Room: call-1"
        );
    }

    #[test]
    fn call_event_omits_absent_fields() {
        let line = format_call_event("CALL DIALING", Some("+15551234567"), None, None);
        assert_eq!(line, "CALL DIALING | Number: +15551234567");
    }

    #[test]
    fn webhook_event_orders_room_before_url() {
        let line = format_webhook_event(
            "CALL STATUS",
            "https://hooks.example.com/call",
            Some(200),
            Some("call-1"),
        );
        assert_eq!(
            line,
            "CALL STATUS | Room: call-1 | URL: https://hooks.example.com/call | Status: 200"
        );
    }

    #[test]
    fn cost_event_formats_two_decimals() {
        let line = format_cost_event("CALL COST", Some(12.5), "NGN", None);
        assert_eq!(line, "CALL COST | Total: NGN12.50");
    }

    #[test]
    fn provider_event_uppercases_kinds() {
        let line = format_provider_event(
            "PROVIDERS CONFIGURED",
            &[("stt", "deepgram"), ("tts", "elevenlabs")],
        );
        assert_eq!(line, "PROVIDERS CONFIGURED | STT=deepgram | TTS=elevenlabs");
    }

    #[test]
    fn conventional_levels_map_to_directives() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("CRITICAL"), "error");
        assert_eq!(level_directive("outcall_worker=debug"), "outcall_worker=debug");
    }
}
