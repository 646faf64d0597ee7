//! The application hosting a registry

use std::path::{Path, PathBuf};

/// Supplies the base directory every configured artifact path is relative to
pub trait Host {
    fn base(&self) -> &Path;
}

impl Host for Path {
    fn base(&self) -> &Path {
        self
    }
}

impl Host for PathBuf {
    fn base(&self) -> &Path {
        self
    }
}
