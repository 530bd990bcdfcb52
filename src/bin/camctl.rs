//! Management CLI for a running camera server. Talks to the HTTP API only,
//! so it works against a server on any host.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder, Response};

#[derive(Parser, Debug)]
#[command(name = "camctl", about = "Manage a running camera server")]
struct Args {
    /// Base URL of the camera server API
    #[arg(long, env = "RPICAM_BASE_URL", default_value = "http://127.0.0.1:8000")]
    base_url: String,

    /// Credentials as user:password for endpoints that require them
    #[arg(long, env = "RPICAM_AUTH")]
    auth: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List camera devices visible to the server
    Devices {
        /// Upper bound on how many devices to report
        #[arg(long)]
        max: Option<u32>,
        /// Probe device indices directly when no device nodes are visible
        #[arg(long)]
        probe: bool,
    },
    /// Show per-camera health
    Health,
    /// Show the active configuration
    Config,
    /// Replace the configuration from a JSON file
    Set {
        /// Path to the configuration document to upload
        file: PathBuf,
    },
    /// Save one JPEG snapshot from a camera
    Snapshot {
        id: String,
        /// Output file; defaults to <id>.jpg
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stop and reopen a camera
    Restart { id: String },
    /// Remove a camera from the configuration
    Delete { id: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();

    match args.command {
        Command::Devices { max, probe } => {
            let mut url = format!("{}/api/devices", args.base_url);
            let mut query = Vec::new();
            if let Some(max) = max {
                query.push(format!("max={}", max));
            }
            if probe {
                query.push("probe_missing=true".to_string());
            }
            if !query.is_empty() {
                url = format!("{}?{}", url, query.join("&"));
            }
            print_json(check(client.get(url).send()?)?)
        }
        Command::Health => print_json(check(
            client.get(format!("{}/health", args.base_url)).send()?,
        )?),
        Command::Config => print_json(check(
            client.get(format!("{}/api/cameras", args.base_url)).send()?,
        )?),
        Command::Set { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            // Parse locally first so a malformed file fails before upload.
            let document: serde_json::Value =
                serde_json::from_str(&body).with_context(|| format!("parsing {}", file.display()))?;
            let request = client
                .post(format!("{}/api/cameras", args.base_url))
                .json(&document);
            print_json(check(with_auth(request, &args.auth).send()?)?)
        }
        Command::Snapshot { id, output } => {
            let response = check(
                client
                    .get(format!("{}/cam/{}/snapshot", args.base_url, id))
                    .send()?,
            )?;
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{}.jpg", id)));
            let bytes = response.bytes()?;
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            file.write_all(&bytes)?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
            Ok(())
        }
        Command::Restart { id } => {
            let request = client.post(format!("{}/api/cameras/{}/restart", args.base_url, id));
            print_json(check(with_auth(request, &args.auth).send()?)?)
        }
        Command::Delete { id } => {
            let request = client.delete(format!("{}/api/cameras/{}", args.base_url, id));
            print_json(check(with_auth(request, &args.auth).send()?)?)
        }
    }
}

fn with_auth(request: RequestBuilder, auth: &Option<String>) -> RequestBuilder {
    match auth.as_deref().and_then(|a| a.split_once(':')) {
        Some((user, password)) => request.basic_auth(user, Some(password)),
        None => request,
    }
}

fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    bail!("Server returned {}: {}", status, body.trim());
}

fn print_json(response: Response) -> Result<()> {
    let value: serde_json::Value = response.json()?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
