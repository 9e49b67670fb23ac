//! Lazily initialised service-provider identifier.
//!
//! The identifier comes from static configuration, so concurrent
//! initialisers compute the same value; the first one stored wins.

use std::sync::RwLock;
use tracing::debug;

/// Process-wide service-provider identifier cell.
#[derive(Debug, Default)]
pub struct ServiceProviderIdCell {
    value: RwLock<Option<String>>,
}

impl ServiceProviderIdCell {
    pub const fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    /// Cached identifier, if initialised.
    pub fn get(&self) -> Option<String> {
        self.value.read().ok().and_then(|v| v.clone())
    }

    /// Return the cached identifier, running `init` on first use.
    ///
    /// `None` from `init` leaves the cell empty so a later call retries.
    pub fn get_or_init(&self, init: impl FnOnce() -> Option<String>) -> Option<String> {
        if let Some(value) = self.get() {
            return Some(value);
        }

        let computed = init()?;
        let mut guard = match self.value.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stored = guard.get_or_insert_with(|| {
            debug!(sp_id = %computed, "Service provider identifier initialised");
            computed
        });
        Some(stored.clone())
    }

    /// Clear the cached identifier.
    pub fn reset(&self) {
        match self.value.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

/// Shared cell for callers that want a single identifier per process.
pub static SERVICE_PROVIDER_ID: ServiceProviderIdCell = ServiceProviderIdCell::new();
