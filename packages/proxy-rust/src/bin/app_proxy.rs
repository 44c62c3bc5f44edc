//! Command-line front end: loads a fixture and runs one search or write.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use app_proxy::service::{build_proxy_pipeline, BridgeCall};
use app_proxy::{fixture, AppProxy};
use app_proxy_core::UnknownFieldPolicy;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tower::ServiceExt;

#[derive(Parser)]
#[command(name = "app-proxy")]
#[command(
    about = "Run search and write requests against a fixture-backed store",
    long_about = None
)]
struct Args {
    /// Fixture file with entity schemas and seed records.
    #[arg(long, env = "APP_PROXY_FIXTURE")]
    fixture: PathBuf,
    /// Fail writes that name non-writable attributes instead of dropping them.
    #[arg(long, env = "APP_PROXY_REJECT_UNKNOWN_FIELDS")]
    reject_unknown_fields: bool,
    /// Maximum entity-type groups processed at once per request.
    #[arg(long, env = "APP_PROXY_MAX_CONCURRENT_GROUPS")]
    max_concurrent_groups: Option<usize>,
    /// Call timeout in milliseconds.
    #[arg(long, env = "APP_PROXY_CALL_TIMEOUT_MS")]
    call_timeout_ms: Option<u64>,
    /// Timeout for write calls in milliseconds; defaults to the call timeout.
    #[arg(long, env = "APP_PROXY_WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a search request. Reads the request from stdin when omitted.
    Search { request: Option<String> },
    /// Run a write request. Reads the request from stdin when omitted.
    Write { request: Option<String> },
}

async fn request_text(inline: Option<String>) -> anyhow::Result<String> {
    if let Some(text) = inline {
        return Ok(text);
    }
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("failed to read request from stdin")?;
    Ok(text)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let (store, mut config) = fixture::load_fixture(&args.fixture).await?;
    if args.reject_unknown_fields {
        config.unknown_field_policy = UnknownFieldPolicy::Reject;
    }
    if let Some(groups) = args.max_concurrent_groups {
        config.max_concurrent_groups = groups;
    }
    if let Some(timeout_ms) = args.call_timeout_ms {
        config.call_timeout_ms = timeout_ms;
    }
    if args.write_timeout_ms.is_some() {
        config.write_timeout_ms = args.write_timeout_ms;
    }

    let call = match args.command {
        Command::Search { request } => BridgeCall::Search(request_text(request).await?),
        Command::Write { request } => BridgeCall::Write(request_text(request).await?),
    };
    let proxy = Arc::new(AppProxy::new(Arc::new(store), config));
    let reply = build_proxy_pipeline(proxy).oneshot(call).await?;
    println!("{}", reply.into_text());
    Ok(())
}
