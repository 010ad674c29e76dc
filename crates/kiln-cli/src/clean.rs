//! Clean command: delete the persisted vendor cache.

use kiln_core::VendorStore;

use crate::{ConfigArgs, colors, config};

pub fn execute(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = config::resolve(args)?;
    let store = VendorStore::new(&config.cache_dir);

    let removed = store.clear()?;
    println!(
        "{}✓{} removed {} cached vendor modules {}({}){}",
        colors::GREEN,
        colors::RESET,
        removed,
        colors::DIM,
        store.dir().display(),
        colors::RESET
    );
    Ok(())
}
