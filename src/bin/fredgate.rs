//! fredgate: operator CLI for the FRED access layer
//!
//! Loads configuration, wires the limiter, cache and client, and runs a
//! single command against the upstream API.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fredgate::{Config, FetchRequest, FredgateBuilder, QueryParams, RemoteSpec, RequestOptions};

/// Fredgate CLI
#[derive(Parser)]
#[command(name = "fredgate")]
#[command(version = fredgate::PKG_VERSION)]
#[command(about = "Rate-limited, caching FRED API client")]
struct Args {
    /// Config file (default: ~/.fredgate/config.toml, then /etc/fredgate/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one endpoint and print the JSON payload
    Fetch {
        /// Endpoint path, e.g. "series/search"
        endpoint: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Cache namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// TTL override in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Also cache error payloads
        #[arg(long)]
        cache_errors: bool,
    },

    /// Fetch observations for several series concurrently
    Batch {
        /// Series as KEY=SERIES_ID or SERIES_ID
        series: Vec<String>,
        /// observation_start (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// observation_end (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Print full payloads instead of a summary
        #[arg(long)]
        full: bool,
    },

    /// Drop every cached entry of a namespace
    Invalidate {
        namespace: String,
    },

    /// Print limiter, cache and client diagnostics
    Health,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let gateway = FredgateBuilder::from_config(&config).build()?;

    match args.command {
        Command::Fetch {
            endpoint,
            params,
            namespace,
            ttl,
            cache_errors,
        } => {
            let params: QueryParams = params.into_iter().collect();
            let mut options = RequestOptions::new(namespace).cache_errors(cache_errors);
            if let Some(secs) = ttl {
                options = options.ttl(Duration::from_secs(secs));
            }
            let response = gateway.fetch(&endpoint, &params, &options).await?;
            if response.from_cache {
                eprintln!("(from cache)");
            }
            println!("{}", serde_json::to_string_pretty(&response.payload)?);
        }

        Command::Batch {
            series,
            start,
            end,
            full,
        } => {
            let requests = series
                .iter()
                .map(|entry| {
                    let (key, id) = entry.split_once('=').unwrap_or((entry.as_str(), entry.as_str()));
                    let mut spec = RemoteSpec::observations(id);
                    if let Some(start) = &start {
                        spec = spec.observation_start(start);
                    }
                    if let Some(end) = &end {
                        spec = spec.observation_end(end);
                    }
                    FetchRequest::new(key, spec)
                })
                .collect();
            let result = gateway.fetch_all(requests).await;

            if full {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for (key, response) in &result.fetched {
                    let count = response
                        .payload
                        .get("observations")
                        .and_then(|o| o.as_array())
                        .map_or(0, Vec::len);
                    let cached = if response.from_cache { " (cached)" } else { "" };
                    println!("ok       {key}: {count} observations{cached}");
                }
                for key in &result.missing_keys {
                    println!("missing  {key}");
                }
                for failure in &result.errors {
                    println!(
                        "error    {} ({}): {}",
                        failure.key, failure.remote_id, failure.message
                    );
                }
            }
        }

        Command::Invalidate { namespace } => {
            gateway.invalidate_namespace(&namespace).await;
            println!("invalidated namespace '{namespace}'");
        }

        Command::Health => {
            let report = gateway.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
