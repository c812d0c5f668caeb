//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `PULSE_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `PULSE_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Umgebungsvariablen haben Vorrang vor den uebergebenen Werten
//! (die typischerweise aus der `[logging]`-Sektion der Konfiguration stammen).

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Level
pub const ENV_LOG_LEVEL: &str = "PULSE_LOG_LEVEL";
/// Umgebungsvariable fuer das Log-Format
pub const ENV_LOG_FORMAT: &str = "PULSE_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Gibt `false` zurueck, wenn bereits ein globaler Subscriber gesetzt war
/// (z.B. wenn eine einbettende Anwendung selbst loggt).
pub fn logging_initialisieren(level: &str, format: &str) -> bool {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.is_ok()
}

/// Gibt den konfigurierten Log-Level aus der Umgebung zurueck.
/// Fallback: "info"
pub fn log_level_aus_env() -> String {
    wert_oder(std::env::var(ENV_LOG_LEVEL).ok(), "info")
}

/// Gibt das konfigurierte Log-Format aus der Umgebung zurueck.
/// Fallback: "text"
pub fn log_format_aus_env() -> String {
    wert_oder(std::env::var(ENV_LOG_FORMAT).ok(), "text")
}

fn wert_oder(wert: Option<String>, standard: &str) -> String {
    match wert {
        Some(w) if !w.trim().is_empty() => w,
        _ => standard.to_string(),
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level), "{level} sollte gueltig sein");
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert!(!log_format_gueltig("JSON"));
    }

    #[test]
    fn fallback_bei_fehlendem_oder_leerem_wert() {
        assert_eq!(wert_oder(None, "info"), "info");
        assert_eq!(wert_oder(Some("  ".into()), "text"), "text");
        assert_eq!(wert_oder(Some("debug".into()), "info"), "debug");
    }

    #[test]
    fn log_level_aus_env_gesetzt() {
        std::env::set_var(ENV_LOG_LEVEL, "debug");
        assert_eq!(log_level_aus_env(), "debug");
        std::env::remove_var(ENV_LOG_LEVEL);
    }

    #[test]
    fn log_format_aus_env_json() {
        std::env::set_var(ENV_LOG_FORMAT, "json");
        assert_eq!(log_format_aus_env(), "json");
        std::env::remove_var(ENV_LOG_FORMAT);
    }
}
