use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attr::Attributes;

pub const DEFAULT_LEVEL: &str = "INFO";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub level: String,
    pub message: String,
    pub attributes: Attributes,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

/// Severity text for an OTLP severity number (1..=24), following the
/// TRACE/DEBUG/INFO/WARN/ERROR/FATAL bands.
pub fn level_for_severity_number(number: i32) -> Option<&'static str> {
    match number {
        1..=4 => Some("TRACE"),
        5..=8 => Some("DEBUG"),
        9..=12 => Some("INFO"),
        13..=16 => Some("WARN"),
        17..=20 => Some("ERROR"),
        21..=24 => Some("FATAL"),
        _ => None,
    }
}

/// Normalized level: upper-cased severity text, then the number band, then INFO.
pub fn normalize_level(severity_text: &str, severity_number: i32) -> String {
    let text = severity_text.trim();
    if !text.is_empty() {
        return text.to_ascii_uppercase();
    }
    level_for_severity_number(severity_number)
        .unwrap_or(DEFAULT_LEVEL)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_upper_cased() {
        assert_eq!(normalize_level("warn", 0), "WARN");
        assert_eq!(normalize_level(" Error ", 9), "ERROR");
    }

    #[test]
    fn falls_back_to_number_then_info() {
        assert_eq!(normalize_level("", 17), "ERROR");
        assert_eq!(normalize_level("", 3), "TRACE");
        assert_eq!(normalize_level("", 0), "INFO");
        assert_eq!(normalize_level("", 99), "INFO");
    }
}
