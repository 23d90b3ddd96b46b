//! Server and database commands: `reviewhub serve`, `reviewhub init-db`.

use anyhow::{Context, Result};

use reviewhub::config::{CliOverrides, ReviewhubToml};
use reviewhub::logging::init_logging;
use reviewhub::review::server;

use crate::Cli;

/// Resolve configuration from file, `.env` and environment, then CLI.
fn resolve_config(cli: &Cli, overrides: CliOverrides) -> Result<ReviewhubToml> {
    match dotenvy::dotenv() {
        Ok(_) => {}
        // A missing .env is normal.
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context("Failed to load .env"),
    }

    let mut config = ReviewhubToml::load_or_default(&cli.config)?;
    config
        .apply_env()
        .context("Failed to apply REVIEWHUB_* environment")?;
    config.apply_cli(overrides);
    Ok(config)
}

pub async fn cmd_serve(cli: &Cli, overrides: CliOverrides) -> Result<()> {
    let config = resolve_config(cli, overrides)?;
    init_logging(&config.logging, cli.verbose)?;
    server::start_server(&config).await
}

pub fn cmd_init_db(cli: &Cli, overrides: CliOverrides) -> Result<()> {
    let config = resolve_config(cli, overrides)?;
    let db = server::open_database(&config)?;
    println!(
        "Database initialized at {} (schema version {})",
        config.database.path.display(),
        db.schema_version()?
    );
    Ok(())
}
