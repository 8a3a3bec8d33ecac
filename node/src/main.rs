//! Feldfunk Demo-Knoten – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet die
//! Simulation.

use anyhow::Result;
use feldfunk_node::{config::NodeConfig, Simulation};
use feldfunk_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("FELDFUNK_CONFIG").unwrap_or_else(|_| "feldfunk.toml".into());

    let config = NodeConfig::laden(&config_pfad)?;
    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Feldfunk-Knoten wird initialisiert"
    );

    Simulation::neu(config)?.starten().await?;

    tracing::info!("Simulation beendet");
    Ok(())
}
