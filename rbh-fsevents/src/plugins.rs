//! Backend plugin resolution.
//!
//! RobinHood URIs name backends ("mongo", "lustre", "posix", ...); store
//! drivers and filesystem plugins are separate crates that register here.
//! This build links none, so resolution reports what is missing rather than
//! guessing.

use std::sync::Arc;

use log::error;
use robinhood::{Backend, Error, Result, Uri};

/// Resolve a mirror backend (a store driver) from a RobinHood URI.
pub fn mirror_backend_from_uri(uri: &Uri) -> Result<Box<dyn Backend>> {
    match uri.backend.as_str() {
        name => {
            error!("no store driver available for backend '{name}'");
            Err(Error::NotSupported)
        }
    }
}

/// Resolve a live filesystem backend (for enrichment) from a RobinHood URI.
pub fn filesystem_backend_from_uri(uri: &Uri) -> Result<Arc<dyn Backend + Sync>> {
    match uri.backend.as_str() {
        name => {
            error!("no filesystem plugin available for backend '{name}'");
            Err(Error::NotSupported)
        }
    }
}
