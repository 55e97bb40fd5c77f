//! edgectl - inspect and drive the edge dispatch pipeline.
//!
//! Usage: edgectl [--config-id <id>] <send|drain|store|hint|queue> ...

mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use edge_core::{init_logging_at, Config, Paths};
use edge_dispatch::{
    ConsentStatus, DispatchConfig, EdgeEvent, EdgePipeline, InMemorySharedState, PipelineBackends,
    SharedState,
};
use edge_store::Database;
use output::PrintDispatcher;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line control for the edge dispatch pipeline.
#[derive(Parser, Debug)]
#[command(name = "edgectl")]
#[command(about = "Queue, send and inspect Edge Network hits")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Datastream configuration id.
    #[arg(long, env = "EDGE_CONFIG_ID", global = true)]
    config_id: Option<String>,

    /// Edge environment (prod, pre-prod, int).
    #[arg(long, env = "EDGE_ENVIRONMENT", default_value = "prod", global = true)]
    environment: String,

    /// Custom Edge domain.
    #[arg(long, env = "EDGE_DOMAIN", global = true)]
    domain: Option<String>,

    /// Collect consent to apply before running (y, n, p).
    #[arg(long, global = true)]
    consent: Option<String>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files. Defaults to ~/.edge-dispatch
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue an experience event
    Send {
        /// XDM body as JSON.
        #[arg(long, default_value = "{}")]
        xdm: String,

        /// Free-form data as JSON.
        #[arg(long)]
        data: Option<String>,

        /// Dataset override.
        #[arg(long)]
        dataset_id: Option<String>,

        /// Queue only; do not drain.
        #[arg(long)]
        no_drain: bool,
    },
    /// Send every queued hit
    Drain,
    /// Persisted store payloads
    Store {
        #[command(subcommand)]
        action: ListOrClear,
    },
    /// Location hint
    Hint {
        #[command(subcommand)]
        action: ShowOrClear,
    },
    /// Durable hit queue
    Queue {
        #[command(subcommand)]
        action: CountOrClear,
    },
}

#[derive(Subcommand, Debug)]
enum ListOrClear {
    List,
    Clear,
}

#[derive(Subcommand, Debug)]
enum ShowOrClear {
    Show,
    Clear,
}

#[derive(Subcommand, Debug)]
enum CountOrClear {
    Count,
    Clear,
}

fn parse_object(raw: &str, what: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", what))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must be a JSON object", what),
    }
}

fn shared_state(cli: &Cli) -> InMemorySharedState {
    let registry = InMemorySharedState::new();
    if let Some(config_id) = &cli.config_id {
        let mut configuration = json!({
            "edge.configId": config_id,
            "edge.environment": cli.environment,
        });
        if let Some(domain) = &cli.domain {
            configuration["edge.domain"] = json!(domain);
        }
        registry.set_configuration(SharedState::Set(configuration));
    }
    if let Some(consent) = &cli.consent {
        let status = ConsentStatus::from_value(consent);
        registry.set_consent(SharedState::Set(
            json!({"consents": {"collect": {"val": status.as_str()}}}),
        ));
    }
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    init_logging_at(
        "edgectl",
        cli.log_level.as_deref().unwrap_or(&config.log_level),
        &paths,
    );
    paths.ensure_dirs()?;

    let db = Arc::new(Database::open(&paths.database_file())?);
    let dispatch_config = DispatchConfig::from(&config);
    let backends = PipelineBackends::sqlite(
        db,
        &dispatch_config,
        Arc::new(shared_state(&cli)),
        Arc::new(PrintDispatcher),
    )?;
    let pipeline = EdgePipeline::new(dispatch_config, backends);

    info!(database = %paths.database_file().display(), "edgectl ready");

    match cli.command {
        Commands::Send {
            xdm,
            data,
            dataset_id,
            no_drain,
        } => {
            if cli.config_id.is_none() {
                bail!("--config-id (or EDGE_CONFIG_ID) is required to send events");
            }
            let mut event = EdgeEvent::experience(Value::Object(parse_object(&xdm, "--xdm")?));
            if let Some(data) = data {
                event
                    .data
                    .insert("data".to_string(), Value::Object(parse_object(&data, "--data")?));
            }
            if let Some(dataset_id) = dataset_id {
                event.data.insert("datasetId".to_string(), json!(dataset_id));
            }

            let event_id = event.id.clone();
            pipeline.send_event(
                event,
                Some(Box::new(move |handles| {
                    println!("event {} completed with {} handle(s)", event_id, handles.len());
                })),
            );
            if !no_drain {
                let sent = pipeline.drain().await;
                println!("sent {} hit(s), {} still queued", sent, pipeline.queue_len());
            }
        }
        Commands::Drain => {
            let sent = pipeline.drain().await;
            println!("sent {} hit(s), {} still queued", sent, pipeline.queue_len());
        }
        Commands::Store { action } => match action {
            ListOrClear::List => {
                for (key, stored) in pipeline.store_payloads().get_active() {
                    println!(
                        "{}\t{}\texpires {}",
                        key,
                        stored.payload.value,
                        stored.expiry_date.to_rfc3339()
                    );
                }
            }
            ListOrClear::Clear => {
                let removed = pipeline.store_payloads().delete_all()?;
                println!("removed {} payload(s)", removed);
            }
        },
        Commands::Hint { action } => match action {
            ShowOrClear::Show => match pipeline.location_hint() {
                Some(hint) => println!("{}", hint),
                None => println!("(none)"),
            },
            ShowOrClear::Clear => {
                pipeline.handle_event(EdgeEvent::update_location_hint(None, None));
                println!("location hint cleared");
            }
        },
        Commands::Queue { action } => match action {
            CountOrClear::Count => println!("{}", pipeline.queue_len()),
            CountOrClear::Clear => {
                let removed = pipeline.clear_queue()?;
                println!("removed {} hit(s)", removed);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use edge_dispatch::SharedStateRegistry;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_object() {
        assert_eq!(parse_object(r#"{"a":1}"#, "x").unwrap()["a"], 1);
        assert!(parse_object("[1]", "x").is_err());
        assert!(parse_object("nope", "x").is_err());
    }

    #[test]
    fn test_shared_state_from_flags() {
        let cli = Cli::parse_from([
            "edgectl",
            "--config-id",
            "cfg",
            "--domain",
            "edge.example.com",
            "--consent",
            "n",
            "drain",
        ]);
        let registry = shared_state(&cli);
        let configuration = registry.configuration().into_value().unwrap();
        assert_eq!(configuration["edge.configId"], "cfg");
        assert_eq!(configuration["edge.environment"], "prod");
        assert_eq!(configuration["edge.domain"], "edge.example.com");

        let consent = registry.consent().into_value().unwrap();
        assert_eq!(
            ConsentStatus::from_preferences(&consent),
            ConsentStatus::No
        );
    }
}
