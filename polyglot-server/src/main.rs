use anyhow::Result;
use clap::Parser;
use polyglot_server::{run_server, ProviderKind, ServerArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "polyglot-server")]
#[command(about = "Run code in many languages over HTTP and WebSocket")]
pub struct Args {
    /// Configuration file (defaults to ./polyglot.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8889
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Runtime provider (docker, host)
    #[arg(long, value_parser = ["docker", "host"])]
    pub provider: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let provider = args
        .provider
        .as_deref()
        .map(str::parse::<ProviderKind>)
        .transpose()?;

    run_server(ServerArgs {
        config: args.config,
        bind: args.bind,
        provider,
        verbose: args.verbose,
    })
    .await
}
