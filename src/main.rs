use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reviewhub")]
#[command(version, about = "Pull request reviewer assignment service")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = reviewhub::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Raise the default log filter to debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Enable permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Create the database schema and exit
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            let overrides = reviewhub::config::CliOverrides {
                host: host.clone(),
                port: *port,
                db_path: db_path.clone(),
                dev_mode: *dev,
            };
            cmd::cmd_serve(&cli, overrides).await?;
        }
        Commands::InitDb { db_path } => {
            let overrides = reviewhub::config::CliOverrides {
                db_path: db_path.clone(),
                ..Default::default()
            };
            cmd::cmd_init_db(&cli, overrides)?;
        }
    }

    Ok(())
}
