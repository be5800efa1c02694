use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

// `#[zbus::proxy]` generates both `MienProxy` (async) and
// `MienProxyBlocking`. Only the async variant is used here.
#[zbus::proxy(
    interface = "org.freedesktop.Mien1",
    default_service = "org.freedesktop.Mien1",
    default_path = "/org/freedesktop/Mien1"
)]
trait Mien {
    async fn start_enrollment(&self, query: &str, force: bool) -> zbus::Result<String>;
    async fn offer_sample(&self, payload: &str) -> zbus::Result<String>;
    async fn cancel_enrollment(&self) -> zbus::Result<bool>;
    async fn recognize(
        &self,
        payload: &str,
        by_similarity: bool,
        mark_present: bool,
    ) -> zbus::Result<String>;
    async fn add_identity(&self, id: &str, name: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn remove_identity(&self, id: &str) -> zbus::Result<bool>;
    async fn set_present(&self, id: &str, present: bool) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "mien", about = "Mien face-identity CLI")]
struct Cli {
    /// Connect to the system bus instead of the session bus
    #[arg(long)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an un-enrolled identity
    Add {
        /// Display name
        name: String,
        /// Stable identifier (a UUID is assigned when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// List the roster
    List,
    /// Enroll an identity from captured sample payloads
    Enroll {
        /// Identity id or name (substring match)
        query: String,
        /// Embedding payload files (JSON arrays), one per capture
        #[arg(required = true)]
        samples: Vec<PathBuf>,
        /// Overwrite an existing enrollment
        #[arg(long)]
        force: bool,
    },
    /// Match a probe payload against the roster
    Recognize {
        /// Embedding payload file (JSON array)
        sample: PathBuf,
        /// Rank by cosine similarity instead of euclidean distance
        #[arg(long)]
        similarity: bool,
        /// Mark the recognized identity present
        #[arg(long)]
        mark_present: bool,
    },
    /// Abandon the active enrollment session
    Cancel,
    /// Remove an identity and its enrollment
    Remove {
        /// Identity id
        id: String,
    },
    /// Set or clear the presence flag
    Present {
        /// Identity id
        id: String,
        #[arg(long)]
        absent: bool,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus — is miend running?")?;
    let proxy = MienProxy::new(&conn).await?;
    tracing::debug!(system_bus = cli.system, "connected");

    match cli.command {
        Commands::Add { name, id } => {
            let reply = proxy
                .add_identity(id.as_deref().unwrap_or(""), &name)
                .await?;
            println!("{}", pretty(&reply)?);
        }
        Commands::List => {
            let listing: serde_json::Value =
                serde_json::from_str(&proxy.list_identities().await?)?;
            let entries = listing.as_array().map(Vec::as_slice).unwrap_or(&[]);
            if entries.is_empty() {
                println!("roster is empty");
            }
            for entry in entries {
                let marker = if entry["enrolled"].as_bool().unwrap_or(false) {
                    "enrolled"
                } else {
                    "no-embedding"
                };
                let present = match entry["present"].as_bool() {
                    Some(true) => "  present",
                    _ => "",
                };
                println!(
                    "{}  {}  [{marker}]{present}",
                    entry["id"].as_str().unwrap_or("?"),
                    entry["name"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Enroll {
            query,
            samples,
            force,
        } => enroll(&proxy, &query, &samples, force).await?,
        Commands::Recognize {
            sample,
            similarity,
            mark_present,
        } => {
            let payload = read_sample(&sample)?;
            let result: serde_json::Value = serde_json::from_str(
                &proxy.recognize(&payload, similarity, mark_present).await?,
            )?;
            report_recognition(&result);
        }
        Commands::Cancel => {
            if proxy.cancel_enrollment().await? {
                println!("enrollment cancelled");
            } else {
                println!("no active enrollment");
            }
        }
        Commands::Remove { id } => {
            proxy.remove_identity(&id).await?;
            println!("removed {id}");
        }
        Commands::Present { id, absent } => {
            proxy.set_present(&id, !absent).await?;
            println!("{id} marked {}", if absent { "absent" } else { "present" });
        }
        Commands::Status => {
            println!("{}", pretty(&proxy.status().await?)?);
        }
    }

    Ok(())
}

/// Feed sample payloads to the daemon until the session commits or a gate
/// rejection comes back. The daemon enforces capture spacing, so "too
/// soon" replies are waited out and retried.
async fn enroll(proxy: &MienProxy<'_>, query: &str, samples: &[PathBuf], force: bool) -> Result<()> {
    let started: serde_json::Value =
        serde_json::from_str(&proxy.start_enrollment(query, force).await?)?;
    println!(
        "Enrolling {} ({}) — {} samples required",
        started["identity_name"].as_str().unwrap_or("?"),
        started["identity_id"].as_str().unwrap_or("?"),
        started["samples_required"],
    );

    for path in samples {
        let payload = read_sample(path)?;
        let mut waits = 0;
        loop {
            let outcome: serde_json::Value =
                serde_json::from_str(&proxy.offer_sample(&payload).await?)?;
            match outcome["outcome"].as_str() {
                Some("captured") => {
                    println!("Captured {}/{}", outcome["count"], outcome["required"]);
                    break;
                }
                Some("committed") => {
                    println!(
                        "Enrollment saved for {}",
                        outcome["identity_id"].as_str().unwrap_or("?")
                    );
                    return Ok(());
                }
                Some("duplicate_of_other") => {
                    bail!(
                        "face already enrolled as {} ({})",
                        outcome["identity_name"].as_str().unwrap_or("?"),
                        outcome["identity_id"].as_str().unwrap_or("?"),
                    );
                }
                Some("already_enrolled") => {
                    bail!("this identity is already enrolled (use --force to overwrite)");
                }
                Some("dropped") => {
                    eprintln!(
                        "sample {} dropped: {}",
                        path.display(),
                        outcome["reason"].as_str().unwrap_or("?")
                    );
                    break;
                }
                Some("ignored") => {
                    let reason = outcome["reason"].as_str().unwrap_or("");
                    if !reason.contains("interval") {
                        bail!("sample ignored: {reason}");
                    }
                    waits += 1;
                    if waits > 40 {
                        bail!("gave up waiting for the capture interval");
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                _ => bail!("unexpected reply: {outcome}"),
            }
        }
    }

    bail!("ran out of samples before the session committed — capture more and retry")
}

fn report_recognition(result: &serde_json::Value) {
    let similarity = result["similarity"].as_f64().unwrap_or(0.0);
    let distance = result["distance"].as_f64().unwrap_or(0.0);
    if result["accepted"].as_bool().unwrap_or(false) {
        println!(
            "Recognized: {} ({})  similarity={similarity:.3} distance={distance:.3}",
            result["identity_name"].as_str().unwrap_or("?"),
            result["identity_id"].as_str().unwrap_or("?"),
        );
    } else if result["scanned"].as_u64() == Some(0) {
        println!("No enrolled identities");
    } else {
        println!("Unknown face  similarity={similarity:.3} distance={distance:.3}");
    }
}

fn read_sample(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sample {}", path.display()))
}

fn pretty(reply: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(reply)?;
    Ok(serde_json::to_string_pretty(&value)?)
}
