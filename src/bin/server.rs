use std::env::set_current_dir;

use anyhow::Result;
use clap::Parser;
use tokio::{select, signal};
use tracing::{error, info};

use catalogserver::config::{init_config, Role, CONFIG, DEFAULT_CONFIG_FILE};
use catalogserver::format::{create_lock_file, Formatter};
use catalogserver::gateway::TcpServer;
use catalogserver::node::CatalogNode;

fn format_dir(dir: &str) -> Result<()> {
    let f =
        Formatter::new(dir).inspect_err(|e| error!("failed to create new formatter, err: {e}"))?;
    f.format()
        .inspect_err(|e| error!("failed to format {dir}, err: {e}"))?;

    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_CONFIG_FILE.to_string())]
    config: String,
    #[arg(short, long, default_value_t = false)]
    format: bool,
    #[arg(long)]
    format_dir: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    role: Option<Role>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.format {
        let Some(dir) = args.format_dir.as_ref() else {
            error!("--format requires --format-dir");
            std::process::exit(1);
        };
        format_dir(dir)?;
        std::process::exit(0);
    }

    info!("starting catalogserver...");
    init_config(&args.config)
        .inspect_err(|e| error!("failed to initialize configuration, err: {e}"))?;

    if let Some(name) = args.name {
        info!("overriding name from command line argument: {}", name);
        CONFIG.write().name = name;
    }
    if let Some(role) = args.role {
        info!("overriding role from command line argument: {:?}", role);
        CONFIG.write().role = role;
    }

    let config = CONFIG.read().clone();
    let work_dir = config.work_dir.clone().unwrap_or_default();
    set_current_dir(&work_dir)?;
    info!("change working directory to {work_dir}/");

    // released on every return from here on
    let _lock = create_lock_file(&work_dir)
        .inspect_err(|e| error!("failed to create lock file, err: {e}"))?;

    let node = CatalogNode::open(&config)
        .inspect_err(|e| error!("failed to open {:?} node, err: {e}", config.role))?;
    node.start_background_tasks(&config)?;

    let rpc_server_addr = config.rpc_server_addr.clone().unwrap_or_default();
    let server = TcpServer::bind(&rpc_server_addr, node.gateway()).await?;
    let handle = server.start()?;
    info!(
        "{} serving as {:?} on {}",
        config.name,
        config.role,
        handle.local_addr()
    );

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    select! {
        _ = signal::ctrl_c() => {
            info!("ctrl-c pressed");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM received");
        },
    };

    handle
        .stop()
        .await
        .inspect_err(|e| error!("failed to stop admin server, err: {e}"))?;
    node.stop_background_tasks();

    Ok(())
}
