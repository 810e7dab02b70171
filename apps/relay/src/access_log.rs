//! One line per completed request

use dev_tunnel_common::{HttpSummary, constants::NON_HTTP_STATUS};
use http::StatusCode;
use owo_colors::OwoColorize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub protocol: String,
    pub method: String,
    pub path: String,
    pub source_ip: String,
    pub status: u16,
    pub duration: Duration,
}

impl AccessRecord {
    pub fn new(http: HttpSummary, status: u16, duration: Duration) -> Self {
        Self {
            protocol: http.protocol,
            method: http.method,
            path: http.path,
            source_ip: http.source_ip,
            status,
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    /// The reply was not an HTTP response
    NonHttp,
    Other,
}

impl StatusClass {
    pub fn of(status: u16) -> Self {
        if status == NON_HTTP_STATUS {
            return Self::NonHttp;
        }
        match StatusCode::from_u16(status) {
            Ok(code) if code.is_success() => Self::Success,
            Ok(code) if code.is_redirection() => Self::Redirect,
            Ok(code) if code.is_client_error() => Self::ClientError,
            Ok(code) if code.is_server_error() => Self::ServerError,
            _ => Self::Other,
        }
    }
}

pub trait AccessLog: Send + Sync {
    fn log(&self, record: &AccessRecord);
}

/// Colored access line on stdout
pub struct ConsoleAccessLog {
    color: bool,
}

impl ConsoleAccessLog {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn render(&self, record: &AccessRecord) -> String {
        let status = match StatusClass::of(record.status) {
            StatusClass::NonHttp => "-".to_string(),
            _ => record.status.to_string(),
        };
        let status = if self.color {
            match StatusClass::of(record.status) {
                StatusClass::Success => status.green().to_string(),
                StatusClass::ClientError => status.yellow().to_string(),
                StatusClass::ServerError => status.red().to_string(),
                StatusClass::NonHttp => status.dimmed().to_string(),
                StatusClass::Redirect | StatusClass::Other => status,
            }
        } else {
            status
        };

        format!(
            "{} {} {} {} {} {}ms",
            field(&record.source_ip),
            field(&record.protocol),
            field(&record.method),
            field(&record.path),
            status,
            record.duration.as_millis()
        )
    }
}

impl AccessLog for ConsoleAccessLog {
    fn log(&self, record: &AccessRecord) {
        println!("{}", self.render(record));
    }
}

/// Access records as structured `tracing` events
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn log(&self, record: &AccessRecord) {
        info!(
            protocol = field(&record.protocol),
            method = field(&record.method),
            path = field(&record.path),
            source_ip = field(&record.source_ip),
            status = record.status,
            duration_ms = record.duration.as_millis() as u64,
            "request completed"
        );
    }
}

fn field(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: u16) -> AccessRecord {
        AccessRecord {
            protocol: "HTTP/1.1".to_string(),
            method: "GET".to_string(),
            path: "/x".to_string(),
            source_ip: "203.0.113.9".to_string(),
            status,
            duration: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_status_class() {
        assert_eq!(StatusClass::of(200), StatusClass::Success);
        assert_eq!(StatusClass::of(204), StatusClass::Success);
        assert_eq!(StatusClass::of(302), StatusClass::Redirect);
        assert_eq!(StatusClass::of(404), StatusClass::ClientError);
        assert_eq!(StatusClass::of(418), StatusClass::NonHttp);
        assert_eq!(StatusClass::of(503), StatusClass::ServerError);
        assert_eq!(StatusClass::of(99), StatusClass::Other);
    }

    #[test]
    fn test_render_plain() {
        let log = ConsoleAccessLog::new(false);
        assert_eq!(
            log.render(&record(200)),
            "203.0.113.9 HTTP/1.1 GET /x 200 42ms"
        );
    }

    #[test]
    fn test_render_non_http_sentinel() {
        let log = ConsoleAccessLog::new(false);
        assert_eq!(log.render(&record(418)), "203.0.113.9 HTTP/1.1 GET /x - 42ms");
    }

    #[test]
    fn test_render_missing_fields() {
        let log = ConsoleAccessLog::new(false);
        let record = AccessRecord::new(HttpSummary::default(), 500, Duration::from_millis(3));
        assert_eq!(log.render(&record), "- - - - 500 3ms");
    }

    #[test]
    fn test_render_colors_by_class() {
        let log = ConsoleAccessLog::new(true);
        assert!(log.render(&record(200)).contains(&"200".green().to_string()));
        assert!(log.render(&record(404)).contains(&"404".yellow().to_string()));
        assert!(log.render(&record(500)).contains(&"500".red().to_string()));
        assert!(log.render(&record(418)).contains(&"-".dimmed().to_string()));
    }
}
