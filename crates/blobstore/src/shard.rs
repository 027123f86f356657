//! Sharded layout of blob names.
//!
//! ```text
//! {root}/
//! ├── P/
//! │   └── KQ/
//! │       └── 5VXHTMEDTK7F6OBIPNUWXXMXGD4UB
//! └── A/
//!     └── AA/
//!         └── AAAA...
//! ```
//!
//! The first character picks the top directory, the next two the second
//! level, and the remainder is the file name. Names shorter than
//! [`MIN_NAME_LEN`] never resolve.

use std::path::{Path, PathBuf};

/// Shortest name that maps to a path.
pub const MIN_NAME_LEN: usize = 27;

/// Split a name into its three shard segments.
///
/// A single leading `/` is ignored. Returns `None` for short names and for
/// anything that could step outside the root.
pub fn segments(name: &str) -> Option<(&str, &str, &str)> {
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.len() < MIN_NAME_LEN || !name.is_ascii() {
        return None;
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return None;
    }
    Some((&name[0..1], &name[1..3], &name[3..]))
}

/// Filesystem location of `name` under `root`.
pub fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    let (top, mid, rest) = segments(name)?;
    Some(root.join(top).join(mid).join(rest))
}

/// Object key of `name`, `/`-separated.
pub fn shard_key(name: &str) -> Option<String> {
    let (top, mid, rest) = segments(name)?;
    Some(format!("{top}/{mid}/{rest}"))
}
