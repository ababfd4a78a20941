//! iSmart CLI - Command-line tool for the SAIC iSmart cloud API
//!
//! Signs in and issues raw API calls, following event-id polling when asked.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ismart_client::IsmartClient;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::CallArgs;
use crate::config::{Config, CredentialArgs};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ismart-cli")]
#[command(author, version, about = "SAIC iSmart API CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Gateway base URI
    #[arg(long, env = "ISMART_BASE_URI")]
    base_uri: Option<String>,

    /// Account e-mail or phone number
    #[arg(short, long, env = "ISMART_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(short, long, env = "ISMART_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Country calling code, for phone number logins
    #[arg(long, env = "ISMART_COUNTRY_CODE")]
    country_code: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "ISMART_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and show the session expiration
    Login,

    /// Run an authenticated API call and print its data
    Call {
        /// HTTP method (GET, POST, PUT, DELETE)
        method: String,

        /// Endpoint path, relative to the base URI
        path: String,

        /// Request body as a JSON object
        #[arg(long)]
        body: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,

        /// Request header as name=value (repeatable)
        #[arg(long = "header", value_name = "NAME=VALUE")]
        header: Vec<String>,

        /// Follow event-id polling until the server answers
        #[arg(long)]
        poll: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let args = CredentialArgs {
        base_uri: cli.base_uri.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        country_code: cli.country_code.clone(),
    };
    let merged = config.merge_with_args(&args, cli.no_color)?;

    // Create output context
    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);

    let client = IsmartClient::new(merged.api).context("Failed to create iSmart client")?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    // Execute command
    let result = match cli.command {
        Commands::Login => commands::login(&client, &ctx).await,

        Commands::Call {
            method,
            path,
            body,
            query,
            header,
            poll,
        } => {
            let args = CallArgs {
                method,
                path,
                body,
                query,
                headers: header,
                poll,
            };
            commands::call(&client, &args, &cancel, &ctx).await
        }
    };

    if let Err(e) = result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

/// Cancel `cancel` on the first Ctrl-C
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}
