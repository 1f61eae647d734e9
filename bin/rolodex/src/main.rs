mod api;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Context;

#[derive(Parser)]
#[command(name = "rolodex")]
#[command(about = "A personnel and contact directory service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.rolodex/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides config and ROLODEX_DB
    #[arg(long, global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the session sweeper
    Serve {
        /// Port to listen on (overrides config server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to (overrides config server.host)
        #[arg(long)]
        bind: Option<String>,

        /// Directory with static files (overrides config server.publicDir)
        #[arg(long)]
        public: Option<PathBuf>,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Measure password hash parameters for this host
    Calibrate,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        /// Login name
        login: String,
        /// Initial password
        #[arg(long)]
        password: String,
        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// List all users
    List,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctx = Context::load(cli.config, cli.database)?;

    // Setup tracing
    let filter = if cli.verbose || ctx.config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, bind, public } => {
            commands::serve::run(ctx, bind, port, public).await?;
        }
        Commands::User { command } => match command {
            UserCommands::Add { login, password, admin } => {
                commands::user::add(&ctx, &login, &password, admin).await?;
            }
            UserCommands::List => {
                commands::user::list(&ctx).await?;
            }
        },
        Commands::Calibrate => {
            commands::calibrate::run(&ctx).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(&ctx).await?;
            }
        },
    }

    Ok(())
}
