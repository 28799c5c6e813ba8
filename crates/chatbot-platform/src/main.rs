#[cfg(feature = "cli")]
use chatbot_platform::{config::Config, run_thread_server};
#[cfg(feature = "cli")]
use clap::Parser;

/// Session-oriented chat backend
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to bind, overrides API_HOST
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides API_PORT
    #[arg(long)]
    port: Option<u16>,

    /// SQLite file, or ":memory:" for a volatile store
    #[arg(long)]
    database: Option<String>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = Config::from_env()?;

    if let Some(host) = args.host {
        cfg.api_host = host;
    }
    if let Some(port) = args.port {
        cfg.api_port = port;
    }
    if let Some(database) = args.database {
        cfg.database_path = database;
    }

    run_thread_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
