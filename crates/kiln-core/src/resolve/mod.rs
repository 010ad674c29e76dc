//! Module resolution: request paths to local sources, bare specifiers to
//! vendor modules.

pub mod source;
pub mod specifier;
pub mod vendor;

pub use source::{AssetKind, SourcePathResolver};
pub use specifier::SpecifierKind;
pub use vendor::{LocatedModule, PackageResolution, VendorResolver};

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Returns `None` if a `..` would climb above the path's root.
pub(crate) fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
