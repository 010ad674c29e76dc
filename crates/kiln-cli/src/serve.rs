//! Serve command implementation for kiln CLI.
//!
//! Starts the gateway server and prewarms the configured packages in the
//! background.

use std::path::PathBuf;

use kiln_core::Gateway;
use kiln_server::ServerConfig;

use crate::{ConfigArgs, colors, config};

/// Start the gateway server.
pub async fn execute(
    args: &ConfigArgs,
    host: String,
    port: u16,
    static_dir: Option<&str>,
) -> anyhow::Result<()> {
    let gateway = Gateway::new(config::resolve(args)?)?;

    let config = ServerConfig {
        host,
        port,
        static_dir: static_dir.map(PathBuf::from),
    };

    println!("\n{}kiln{} - module gateway", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Sources:{} {}",
        colors::CYAN,
        colors::RESET,
        gateway.source_root().display()
    );
    println!(
        "{}  ◆ Modules:{} http://{}:{}{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port,
        gateway.config().public_prefix
    );
    if let Some(dir) = &config.static_dir {
        println!(
            "{}  ◆ Static:{} {}",
            colors::CYAN,
            colors::RESET,
            dir.display()
        );
    }
    println!(
        "{}  ◆ Trusted:{} {} packages",
        colors::CYAN,
        colors::RESET,
        gateway.trust().len()
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    kiln_server::serve(gateway, config).await?;

    Ok(())
}
