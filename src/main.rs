mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use devdock::{Error as DockError, Registry, Store};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(dock_error) = e.downcast_ref::<DockError>() {
            eprintln!("Error: {}", dock_error);
            if let Some(suggestion) = dock_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let store = match &cli.data_dir {
        Some(dir) => Store::open(dir)?,
        None => Store::open_default()?,
    };
    let registry = Arc::new(Registry::open(store)?);
    let out = output::CliOutput;

    match cli.command {
        Commands::Add {
            path,
            name,
            frontend,
            frontend_port,
            backend,
            backend_port,
        } => commands::run_add(
            &registry,
            path,
            name,
            frontend,
            frontend_port,
            backend,
            backend_port,
            &out,
        ),
        Commands::Edit {
            project,
            name,
            frontend,
            frontend_port,
            backend,
            backend_port,
        } => commands::run_edit(
            &registry,
            &project,
            name,
            frontend,
            frontend_port,
            backend,
            backend_port,
            &out,
        ),
        Commands::Remove { project } => commands::run_remove(&registry, &project, &out).await,
        Commands::Start {
            project,
            service,
            detach,
        } => commands::run_start(&registry, &project, service, detach, &out).await,
        Commands::Stop { project, service } => {
            commands::run_stop(&registry, &project, service, &out).await
        }
        Commands::Status { project } => commands::run_status(&registry, project, &out).await,
        Commands::Logs {
            project,
            service,
            tail,
        } => commands::run_logs(&registry, &project, service, tail, &out),
        Commands::Ports(ref ports_cmd) => commands::run_ports(&registry, ports_cmd, &out),
        Commands::Scan => commands::run_scan(&registry, &out).await,
        Commands::Adopt { pid } => commands::run_adopt(&registry, pid, &out).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
