use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devdock")]
#[command(about = "Manage local dev projects: services, ports, and logs")]
pub struct Cli {
    /// Data directory (defaults to ~/.devdock)
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which service of a project a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Frontend,
    Backend,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a project
    Add {
        /// Project root directory
        path: PathBuf,

        /// Display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Frontend service command
        #[arg(long, value_name = "CMD")]
        frontend: Option<String>,

        /// Frontend port (auto-suggested from the command when omitted)
        #[arg(long, value_name = "PORT")]
        frontend_port: Option<u16>,

        /// Backend service command
        #[arg(long, value_name = "CMD")]
        backend: Option<String>,

        /// Backend port (auto-suggested from the command when omitted)
        #[arg(long, value_name = "PORT")]
        backend_port: Option<u16>,
    },
    /// Change a registered project
    Edit {
        /// Project name or id
        project: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, value_name = "CMD")]
        frontend: Option<String>,

        #[arg(long, value_name = "PORT")]
        frontend_port: Option<u16>,

        #[arg(long, value_name = "CMD")]
        backend: Option<String>,

        #[arg(long, value_name = "PORT")]
        backend_port: Option<u16>,
    },
    /// Remove a project (stops its services first)
    Remove {
        /// Project name or id
        project: String,
    },
    /// Start a project's services and stay attached
    Start {
        /// Project name or id
        project: String,

        /// Only this service
        #[arg(value_enum)]
        service: Option<KindArg>,

        /// Exit after starting, leaving the processes running
        #[arg(short, long)]
        detach: bool,
    },
    /// Stop running services (re-attaches to detached processes first)
    Stop {
        /// Project name or id
        project: String,

        /// Only this service
        #[arg(value_enum)]
        service: Option<KindArg>,
    },
    /// Show project and service status
    Status {
        /// Limit to one project
        project: Option<String>,
    },
    /// Show captured service logs
    Logs {
        /// Project name or id
        project: String,

        /// Which service (all of them when omitted)
        #[arg(value_enum)]
        service: Option<KindArg>,

        /// Number of lines to show
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },
    /// Port bindings and suggestions
    #[command(subcommand)]
    Ports(PortsCommands),
    /// Scan the process table for project-related processes
    Scan,
    /// Attach an externally-started process to its matching service
    Adopt {
        /// PID reported by `devdock scan`
        pid: u32,
    },
}

#[derive(Subcommand)]
pub enum PortsCommands {
    /// List current port claims
    List,
    /// Suggest a free port for a service command
    Suggest {
        /// The command the service would run
        command: String,

        /// Working directory used for stack detection
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}
