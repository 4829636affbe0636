use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

mod cli;
mod config;
mod engine;
mod incidents;
mod storage;
#[cfg(test)]
mod tests;
mod upload;
mod web;

use config::Config;
use engine::IncidentService;

/// Data directory: $INCIDENT_ASSIST_HOME, or ~/.incident-assist.
fn base_path() -> anyhow::Result<String> {
    if let Ok(path) = std::env::var("INCIDENT_ASSIST_HOME") {
        return Ok(path);
    }

    let home = homedir::my_home()?
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))?;
    Ok(home.join(".incident-assist").to_string_lossy().to_string())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)?;
    let service = Arc::new(IncidentService::new(
        config.engine.clone(),
        PathBuf::from(&base_path),
    ));

    match args.command {
        cli::Command::Daemon {} => {
            web::start_daemon(service, config.listen_addr.clone());
            Ok(())
        }

        cli::Command::Upload { file } => {
            let data = std::fs::read(&file)?;
            let rows = upload::parse_csv(&data)?;
            let results = service.ingest_batch(rows)?;

            println!("{}", serde_json::to_string_pretty(&results).unwrap());
            Ok(())
        }

        cli::Command::Search {
            query,
            k,
            threshold,
        } => {
            let response = service.search_one(&query, k, threshold)?;

            println!("{}", serde_json::to_string_pretty(&response).unwrap());
            Ok(())
        }

        cli::Command::Embed { text } => {
            let vector = service.debug_embed(&text)?;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "dimension": vector.len(),
                    "vector": vector,
                }))
                .unwrap()
            );
            Ok(())
        }
    }
}
