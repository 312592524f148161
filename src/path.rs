//! Repository-relative paths
//!
//! Overlay entries and snapshot entries are keyed by a normalised,
//! `/`-separated path relative to the checkout root. The same string is
//! the stable on-disk key of an overlay record.

use crate::error::{Error, Result};

/// Normalise a checkout-relative path
///
/// Leading and repeated separators and `.` components are dropped.
/// `..` components and empty paths are rejected.
pub fn normalize(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(Error::InvalidPath(path.to_string())),
            part if part.contains('\0') => return Err(Error::InvalidPath(path.to_string())),
            part => parts.push(part),
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("dir1/a.txt").unwrap(), "dir1/a.txt");
        assert_eq!(normalize("/dir1//./a.txt").unwrap(), "dir1/a.txt");
        assert_eq!(normalize("hello/").unwrap(), "hello");
    }

    #[test]
    fn test_normalize_rejects() {
        assert!(normalize("").is_err());
        assert!(normalize("/").is_err());
        assert!(normalize("a/../b").is_err());
    }
}
