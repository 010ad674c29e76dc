//! Check command: print the resolved configuration and what the gateway
//! would trust at startup.

use kiln_core::Gateway;

use crate::{ConfigArgs, colors, config};

pub fn execute(args: &ConfigArgs) -> anyhow::Result<()> {
    let gateway = Gateway::new(config::resolve(args)?)?;

    println!("{}# resolved configuration{}", colors::DIM, colors::RESET);
    print!("{}", toml::to_string_pretty(gateway.config())?);
    println!();

    let trusted = gateway.trust().names();
    println!(
        "{}Trusted packages ({}):{}",
        colors::BOLD,
        trusted.len(),
        colors::RESET
    );
    for name in &trusted {
        let cached = gateway.store().entry_path(name).is_file();
        if cached {
            println!("  {} {}(cached){}", name, colors::DIM, colors::RESET);
        } else {
            println!("  {}", name);
        }
    }
    Ok(())
}
