//! kiln CLI - on-demand TypeScript module gateway.

mod check;
mod clean;
mod colors;
mod config;
mod prewarm;
mod serve;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Serve TypeScript and npm packages to the browser, compiled on demand")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Where the gateway configuration comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to kiln.toml (default: ./kiln.toml when present)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the source root
    #[arg(long)]
    root: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Directory served for requests outside the gateway
        #[arg(long)]
        static_dir: Option<String>,
    },

    /// Build the configured prewarm packages into the vendor cache
    Prewarm {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Delete the vendor cache
    Clean {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show the resolved configuration and trusted packages
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::WARN.into())
            .add_directive("kiln_core=info".parse()?)
            .add_directive("kiln_server=info".parse()?)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Helper to format kiln-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(kiln_err) = err.downcast_ref::<kiln_core::Error>() {
            anyhow::anyhow!("{}", kiln_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            static_dir,
        } => {
            serve::execute(&config, host, port, static_dir.as_deref())
                .await
                .map_err(format_error)?;
        }

        Commands::Prewarm { config } => {
            prewarm::execute(&config).await.map_err(format_error)?;
        }

        Commands::Clean { config } => {
            clean::execute(&config).map_err(format_error)?;
        }

        Commands::Check { config } => {
            check::execute(&config).map_err(format_error)?;
        }
    }

    Ok(())
}
