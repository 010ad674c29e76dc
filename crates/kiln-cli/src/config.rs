//! Resolve the gateway configuration from flags and kiln.toml.

use std::path::{Path, PathBuf};

use kiln_core::GatewayConfig;

use crate::ConfigArgs;

/// Config file picked up from the working directory when `--config` is
/// not given.
pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// Load the configuration named by `args`.
///
/// An explicit `--config` must exist. Without one, `./kiln.toml` is used if
/// present, otherwise the defaults. `--root` overrides `source_root`.
pub fn resolve(args: &ConfigArgs) -> anyhow::Result<GatewayConfig> {
    resolve_in(args, Path::new("."))
}

fn resolve_in(args: &ConfigArgs, cwd: &Path) -> anyhow::Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(Path::new(path))?,
        None => {
            let default = cwd.join(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                GatewayConfig::load(&default)?
            } else {
                GatewayConfig::default().relative_to(cwd)
            }
        }
    };

    if let Some(root) = &args.root {
        config.source_root = PathBuf::from(root);
    }
    Ok(config.normalized()?)
}
