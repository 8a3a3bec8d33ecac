//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfigurationsdatei):
//! - `FF_LOG_LEVEL`: Filter-Direktive (`info`, `feldfunk_voice=debug`, ...), Standard: info
//! - `FF_LOG_FORMAT`: Format (text/json), Standard: text

use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Filter
pub const ENV_LEVEL: &str = "FF_LOG_LEVEL";

/// Umgebungsvariable fuer das Log-Format
pub const ENV_FORMAT: &str = "FF_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration und werden von
/// `FF_LOG_LEVEL` / `FF_LOG_FORMAT` ueberschrieben. Ein zweiter Aufruf im
/// selben Prozess ist wirkungslos (Tests, mehrere Knoten pro Prozess).
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = std::env::var(ENV_FORMAT).unwrap_or_else(|_| format.to_string());

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging bereits initialisiert");
    }
}

/// Log-Filter aus der Umgebung, sonst `standard`
pub fn log_level_aus_env(standard: &str) -> String {
    std::env::var(ENV_LEVEL).unwrap_or_else(|_| standard.to_string())
}

/// Log-Format aus der Umgebung, sonst `standard`
pub fn log_format_aus_env(standard: &str) -> String {
    std::env::var(ENV_FORMAT).unwrap_or_else(|_| standard.to_string())
}

/// Ist `level` eine gueltige Filter-Direktive?
pub fn log_level_gueltig(level: &str) -> bool {
    !level.is_empty() && EnvFilter::try_new(level).is_ok()
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
            assert!(log_level_gueltig(level), "{level}");
        }
        assert!(log_level_gueltig("feldfunk_voice=debug,info"));
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig(""));
        assert!(!log_level_gueltig("feldfunk_voice=laut"));
    }

    #[test]
    fn log_format_werte() {
        assert!(log_format_gueltig("text"));
        assert!(log_format_gueltig("json"));
        assert!(!log_format_gueltig("xml"));
        assert!(!log_format_gueltig("JSON")); // Gross-/Kleinschreibung
    }

    // Ein einziger Test fasst die Umgebung an, parallele Tests wuerden sich
    // gegenseitig die Variablen ueberschreiben
    #[test]
    fn umgebung_ueberschreibt_standard() {
        std::env::remove_var(ENV_LEVEL);
        std::env::remove_var(ENV_FORMAT);
        assert_eq!(log_level_aus_env("info"), "info");
        assert_eq!(log_format_aus_env("text"), "text");

        std::env::set_var(ENV_LEVEL, "debug");
        std::env::set_var(ENV_FORMAT, "json");
        assert_eq!(log_level_aus_env("info"), "debug");
        assert_eq!(log_format_aus_env("text"), "json");

        std::env::remove_var(ENV_LEVEL);
        std::env::remove_var(ENV_FORMAT);
    }

    #[test]
    fn doppelte_initialisierung_ist_harmlos() {
        logging_initialisieren("warn", "text");
        logging_initialisieren("debug", "json");
    }
}
