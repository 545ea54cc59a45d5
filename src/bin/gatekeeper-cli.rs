use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde_json::Value;

use gatekeeper::config::{load_config, FirewallConfig, KvConfig};
use gatekeeper::kv::ConsulKv;
use gatekeeper::security::signature::{SIGN_PARAM, TIMESTAMP_PARAM};
use gatekeeper::security::{FirewallRecord, Signer};

#[derive(Parser)]
#[command(name = "gatekeeper-cli")]
#[command(about = "Operator CLI for the gatekeeper firewall", long_about = None)]
struct Cli {
    /// Service config; signing salts and KV settings are read from it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a signed query string for the given parameters
    Sign {
        /// Query parameters as key=value
        #[arg(value_parser = parse_pair)]
        params: Vec<(String, String)>,
    },
    /// Write the live firewall record to Consul
    PushConfig {
        /// Addresses to block (repeatable)
        #[arg(long = "block-ip")]
        block_ip: Vec<String>,
        /// Per-second request threshold
        #[arg(long, default_value_t = 10)]
        max_req_second: u32,
    },
    /// Query a running instance's health endpoint
    Health {
        #[arg(short, long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (kv, firewall) = match &cli.config {
        Some(path) => {
            let config = load_config(path)?;
            (config.kv, config.firewall)
        }
        None => (KvConfig::default(), FirewallConfig::default()),
    };

    match cli.command {
        Commands::Sign { params } => {
            println!("{}", signed_query(&firewall, params));
        }
        Commands::PushConfig {
            block_ip,
            max_req_second,
        } => {
            let record = FirewallRecord {
                block_ip,
                max_req_second,
            };
            let store = ConsulKv::new(&kv.address, Duration::from_secs(kv.request_timeout_secs))?;
            let key = format!("{}/{}", kv.namespace.trim_matches('/'), firewall.config_key);
            store.put(&key, serde_json::to_vec(&record)?).await?;
            println!("Wrote {} to {}", serde_json::to_string(&record)?, key);
        }
        Commands::Health { url } => {
            let res = reqwest::get(format!("{}/health", url.trim_end_matches('/'))).await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

/// Encode `params` plus a fresh `_timestamp` (unless given) and `_sign`.
fn signed_query(config: &FirewallConfig, params: Vec<(String, String)>) -> String {
    let signer = Signer::new(
        config.signed_fields.clone(),
        config.default_salt.clone(),
        config.salts.clone(),
    );

    let mut query: HashMap<String, String> = params.into_iter().collect();
    query.entry(TIMESTAMP_PARAM.to_string()).or_insert_with(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    });
    let sign = signer.sign(&query);

    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for key in keys {
        out.append_pair(key, &query[key]);
    }
    out.append_pair(SIGN_PARAM, &sign);
    out.finish()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
