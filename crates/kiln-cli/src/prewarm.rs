//! Prewarm command: build the prewarm list into the vendor cache and exit.

use kiln_core::Gateway;

use crate::{ConfigArgs, colors, config};

pub async fn execute(args: &ConfigArgs) -> anyhow::Result<()> {
    let gateway = Gateway::new(config::resolve(args)?)?;

    let requested = gateway.config().prewarm.len();
    if requested == 0 {
        println!(
            "{}Nothing to prewarm:{} add packages to `prewarm` in kiln.toml",
            colors::YELLOW,
            colors::RESET
        );
        return Ok(());
    }

    let started = gateway.prewarm();
    let ready = gateway.wait_for_prewarm().await;

    println!(
        "{}✓{} {}/{} packages ready in {}",
        colors::GREEN,
        colors::RESET,
        ready,
        requested,
        gateway.store().dir().display()
    );

    if ready < started {
        anyhow::bail!("{} prewarm packages failed; run with -v for details", started - ready);
    }
    Ok(())
}
