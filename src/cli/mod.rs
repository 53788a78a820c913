//! Command-line interface for the asset dev tool.
//!
//! Provides commands for running processing requests end to end, submitting
//! without waiting, fetching worker logs, and managing source files in the
//! configured storage container.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config;
use crate::domain::{ProcessingRequest, RenditionRecord};
use crate::error::DevToolError;
use crate::service::DevTool;

/// asset-devtool - submit asset-processing requests and collect the results
#[derive(Parser, Debug)]
#[command(name = "asset-devtool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a source file and wait for renditions and worker logs
    Process {
        /// Source file name in the source folder (omit for source-less workers)
        #[arg(short, long)]
        source: Option<String>,

        /// JSON file with `{"renditions": [...]}` (reads stdin if not provided)
        #[arg(short, long)]
        renditions: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit a request without waiting for the full result
    Submit {
        /// Source file name in the source folder
        #[arg(short, long)]
        source: Option<String>,

        /// JSON file with `{"renditions": [...]}` (reads stdin if not provided)
        #[arg(short, long)]
        renditions: Option<PathBuf>,

        /// Wait for the completion events and print them
        #[arg(short, long)]
        wait: bool,
    },

    /// Fetch worker logs of a finished activation
    Logs {
        /// Top-level activation id
        activation_id: String,
    },

    /// List source files in the storage container
    Sources,

    /// Upload a local file to the source folder
    Upload {
        /// File to upload
        file: PathBuf,
    },

    /// Print a download link for a stored object
    Presign {
        /// Object path in the container
        key: String,
    },

    /// Show the compute service endpoint
    Endpoint,

    /// Show web action URLs of the app in the working directory
    ActionUrls,

    /// Show the event journal URL and readiness
    Journal,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?.clone();
        let tool = DevTool::new(cfg);

        match self.command {
            Commands::Process {
                source,
                renditions,
                json,
            } => process(&tool, source, renditions, json).await,
            Commands::Submit {
                source,
                renditions,
                wait,
            } => submit(&tool, source, renditions, wait).await,
            Commands::Logs { activation_id } => {
                let logs = tool.fetch_logs(&activation_id, &[]).await;
                println!("{}", crate::domain::merge_logs(&logs));
                Ok(())
            }
            Commands::Sources => {
                let sources = tool
                    .list_sources()
                    .await
                    .context("Error listing objects from Cloud Storage Container")?;
                print_sources(&sources);
                Ok(())
            }
            Commands::Upload { file } => {
                let sources = tool
                    .upload_source_file(&file)
                    .await
                    .with_context(|| format!("Error uploading {} to Cloud Storage Container", file.display()))?;
                println!("Uploaded {}", file.display());
                print_sources(&sources);
                Ok(())
            }
            Commands::Presign { key } => {
                let url = tool.presign_download(&key).await.with_context(|| {
                    format!("Error getting Presigned Get url for file {}. Check cloud storage credentials", key)
                })?;
                println!("{}", url);
                Ok(())
            }
            Commands::Endpoint => {
                println!("{}", tool.endpoint());
                Ok(())
            }
            Commands::ActionUrls => {
                let urls = tool.action_urls();
                if urls.is_empty() {
                    println!("No actions found (not an app directory?)");
                }
                for (action, url) in urls {
                    println!("{:<30} {}", action, url);
                }
                Ok(())
            }
            Commands::Journal => {
                let url = tool
                    .journal_url()
                    .await
                    .context("Error setting up devtool - journal url")?;
                let ready = tool
                    .is_journal_ready()
                    .await
                    .context("Error checking journal ready")?;
                println!("Journal: {}", url.unwrap_or_else(|| "(none)".to_string()));
                println!("Ready:   {}", ready);
                Ok(())
            }
            Commands::Config => show_config(&tool),
        }
    }
}

/// Read the rendition list from a file or stdin
fn read_request(source: Option<String>, renditions: Option<PathBuf>) -> Result<ProcessingRequest> {
    let json = if let Some(path) = renditions {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read renditions file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        bail!("No renditions provided. Use --renditions <file> or pipe JSON to stdin");
    };

    let request = ProcessingRequest::from_json(source, &json).context("Invalid renditions JSON")?;
    if request.renditions.is_empty() {
        bail!("At least one rendition is required");
    }
    Ok(request)
}

/// Run a full request; Ctrl-C aborts it
async fn process(
    tool: &DevTool,
    source: Option<String>,
    renditions: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let request = read_request(source, renditions)?;

    let run = tool.run(request);
    tokio::pin!(run);
    let mut aborted = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c(), if !aborted => {
                eprintln!("Aborting (waiting for in-flight calls to finish)...");
                tool.abort();
                aborted = true;
            }
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) if e.is_aborted() => {
            println!("Processing has been aborted");
            return Ok(());
        }
        Err(e) => return Err(explain(e)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Request ID:    {}", result.request_id);
    println!("Activation ID: {}", result.activation_id);
    println!();
    println!("{:<24} {:<8} {}", "RENDITION", "FMT", "RESULT");
    println!("{}", "-".repeat(80));
    for record in &result.renditions {
        match record {
            RenditionRecord::Created { name, fmt, url } => println!(
                "{:<24} {:<8} {}",
                name.as_deref().unwrap_or("-"),
                fmt.as_deref().unwrap_or("-"),
                url
            ),
            RenditionRecord::Failed {
                name,
                fmt,
                error_reason,
                error_message,
            } => println!(
                "{:<24} {:<8} FAILED {}: {}",
                name.as_deref().unwrap_or("-"),
                fmt.as_deref().unwrap_or("-"),
                error_reason.as_deref().unwrap_or("unknown"),
                error_message.as_deref().unwrap_or("")
            ),
        }
    }

    if !result.logs.is_empty() {
        println!();
        println!("{}", result.log_text());
    }
    Ok(())
}

async fn submit(
    tool: &DevTool,
    source: Option<String>,
    renditions: Option<PathBuf>,
    wait: bool,
) -> Result<()> {
    let request = read_request(source, renditions)?;
    let submitted = tool
        .submit(request.source, request.renditions)
        .await
        .map_err(explain)?;
    println!("{}", serde_json::to_string_pretty(&submitted)?);

    if wait {
        let events = tool
            .await_completion(&submitted.request_id)
            .await
            .with_context(|| format!("Error getting events for requestId: {}", submitted.request_id))?;
        println!("{}", serde_json::to_string_pretty(&events)?);
    }
    Ok(())
}

/// Point configuration failures at the `config` command
fn explain(error: DevToolError) -> anyhow::Error {
    if error.is_config() {
        anyhow::Error::new(error)
            .context("Configuration incomplete; run `asset-devtool config` to inspect it")
    } else {
        error.into()
    }
}

fn print_sources(sources: &[String]) {
    if sources.is_empty() {
        println!("No source files found");
        return;
    }
    for name in sources {
        println!("  {}", name);
    }
}

/// Show resolved configuration
fn show_config(tool: &DevTool) -> Result<()> {
    let cfg = tool.config();

    println!("Asset Dev Tool Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Endpoint:    {}", cfg.endpoint);
    println!(
        "Integration: {}",
        cfg.integration_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("Port:        {}", cfg.port);
    println!("Development: {}", cfg.development);
    println!();
    println!("Storage:");
    match cfg.storage_backend() {
        Ok(config::StorageBackendConfig::Azure(azure)) => {
            println!("  Azure account {} container {}", azure.account, azure.container)
        }
        Ok(config::StorageBackendConfig::S3(s3)) => {
            println!("  S3 bucket {} ({})", s3.bucket, s3.region)
        }
        Err(e) => println!("  {}", e),
    }
    println!();
    println!("Activation logs:");
    match cfg.runtime_credentials() {
        Ok(runtime) => println!("  {} namespace {}", runtime.apihost, runtime.namespace),
        Err(e) => println!("  {}", e),
    }
    println!();
    let p = &cfg.processing;
    println!("Processing:");
    println!("  Presign TTL:        {}s", p.presign_ttl.as_secs());
    println!("  Activation wait:    {}s", p.activation_wait.as_secs());
    println!("  Journal poll:       {}ms", p.journal_poll_interval.as_millis());
    println!("  Rendition estimate: {} bytes in {} parts", p.rendition_estimated_bytes, p.rendition_part_count);
    println!("  Download TTL:       {}s", p.download_ttl.as_secs());
    println!("  Handle TTL:         {}s", p.handle_ttl.as_secs());
    println!("  Source folder:      {}", p.source_prefix);

    Ok(())
}
