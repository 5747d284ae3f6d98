//! `tiplockd`: run the tiplock node, or talk to a running one.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::Engine;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tiplock_app::{AppBuilder, AppError, AppType, Node, NodeConfig, SERVICE};
use tiplock_ipc::IpcClient;
use tiplock_logging::LogLevel;
use tiplock_settings::{ProcessEnv, Settings};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "tiplockd", version, about = "Anonymous tip intake: evidence to IPFS, reports to the ledger")]
struct Cli {
    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node on the local socket
    Serve {
        /// Ledger key file, used when WALLET_PRIVATEKEY is unset
        #[arg(long)]
        key: Option<PathBuf>,
        /// Keep evidence in memory and skip the ledger
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit a report to the running node
    Submit {
        #[arg(long)]
        text: String,
        /// Evidence file to attach
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Attachment MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,
    },
    /// Review cases on the running node
    Case {
        #[command(subcommand)]
        action: CaseCommand,
    },
    /// Print the ledger signing address
    Address {
        #[arg(long)]
        key: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CaseCommand {
    Get { id: String },
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        blacklisted: bool,
    },
    Confirm { id: String, reward: u64 },
    Reject { id: String },
    Blacklist {
        id: String,
        /// Lift the blacklist instead
        #[arg(long)]
        off: bool,
    },
    Categorize { id: String, category: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "tiplockd failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let Cli {
        config,
        verbose,
        json_logs,
        command,
    } = cli;
    match command {
        Command::Serve { key, dry_run } => {
            let mut builder = AppBuilder::<NodeConfig>::new(SERVICE)
                .app_type(AppType::Daemon)
                .verbose(verbose)
                .json_logs(json_logs);
            if let Some(path) = &config {
                builder = builder.config_path(path);
            }
            if let Some(path) = &key {
                builder = builder.key_path(path);
            }
            let app = builder.build()?;

            let mut node_config = app.settings.config;
            node_config.dry_run |= dry_run;
            let node = Node::from_config(node_config, app.keypair).await?;
            node.serve_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Address { key } => {
            let mut builder = AppBuilder::<NodeConfig>::new(SERVICE)
                .app_type(AppType::Cli)
                .log_level(cli_level(verbose))
                .skip_banner();
            if let Some(path) = &config {
                builder = builder.config_path(path);
            }
            if let Some(path) = &key {
                builder = builder.key_path(path);
            }
            let app = builder.build()?;
            println!("{}", app.keypair.address().to_checksum());
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit { text, photo, mime } => {
            let client = client(config.as_deref(), verbose)?;
            let mut params = json!({ "text": text });
            if let Some(path) = photo {
                let bytes = tokio::fs::read(&path).await?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                params["attachment"] = json!({
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                    "filename": filename,
                    "mimeType": mime.unwrap_or_else(|| mime_for_path(&path).to_string()),
                });
            }
            let response = client.send_request("report.submit", Some(params)).await?;
            print_json(&response);
            if response["success"] == true {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Case { action } => {
            let client = client(config.as_deref(), verbose)?;
            let (method, params) = case_request(&action);
            let result = client.send_request(method, Some(params)).await?;
            print_json(&result);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Client for the node named in the settings file.
fn client(config: Option<&Path>, verbose: bool) -> Result<IpcClient, AppError> {
    let _ = tiplock_logging::try_init(cli_level(verbose));
    let settings: Settings<NodeConfig> = Settings::load_with_env(SERVICE, config, &ProcessEnv)?;
    Ok(IpcClient::new(&settings.config.socket_path))
}

/// Client commands stay quiet unless asked.
fn cli_level(verbose: bool) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    }
}

fn case_request(action: &CaseCommand) -> (&'static str, Value) {
    match action {
        CaseCommand::Get { id } => ("case.get", json!({ "id": id })),
        CaseCommand::List { status, blacklisted } => {
            let mut params = json!({});
            if let Some(status) = status {
                params["status"] = json!(status);
            }
            if *blacklisted {
                params["blacklisted"] = json!(true);
            }
            ("case.list", params)
        }
        CaseCommand::Confirm { id, reward } => {
            ("case.confirm", json!({ "id": id, "rewardAmount": reward }))
        }
        CaseCommand::Reject { id } => ("case.reject", json!({ "id": id })),
        CaseCommand::Blacklist { id, off } => {
            ("case.blacklist", json!({ "id": id, "blacklisted": !off }))
        }
        CaseCommand::Categorize { id, category } => {
            ("case.categorize", json!({ "id": id, "category": category }))
        }
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
