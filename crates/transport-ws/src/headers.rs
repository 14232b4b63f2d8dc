//! Transport-header provider plumbing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Supplies the headers attached to each upgrade response.
///
/// Re-evaluated once per accepted connection, at upgrade time, so the
/// returned mapping may vary between connections. Must be fast and
/// non-blocking; it runs inside the handshake.
pub type HeaderProvider = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// Swappable slot holding the current provider.
///
/// The accept loop reads the slot once per connection; replacing the
/// provider affects subsequent connections only. A connection mid-upgrade
/// keeps the `Arc` it already cloned.
pub(crate) struct HeaderSlot {
    provider: RwLock<HeaderProvider>,
}

impl HeaderSlot {
    /// Slot with the default provider: an empty mapping.
    pub(crate) fn empty() -> Self {
        Self {
            provider: RwLock::new(Arc::new(|| HashMap::new())),
        }
    }

    pub(crate) fn replace(&self, provider: HeaderProvider) {
        match self.provider.write() {
            Ok(mut slot) => *slot = provider,
            Err(poisoned) => *poisoned.into_inner() = provider,
        }
    }

    pub(crate) fn get(&self) -> HeaderProvider {
        match self.provider.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
