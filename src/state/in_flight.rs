use dashmap::DashSet;

use crate::state::contest::Identity;

/// Identities with a create or join request currently being processed.
///
/// Only used to drop duplicate requests early; the member pointer is what actually
/// keeps an identity in a single room.
#[derive(Default)]
pub struct InFlight {
    active: DashSet<Identity>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `identity` busy until the returned guard is dropped, or `None` if it already is.
    pub fn try_begin(&self, identity: &Identity) -> Option<InFlightGuard<'_>> {
        self.active.insert(identity.clone()).then(|| InFlightGuard {
            active: &self.active,
            identity: identity.clone(),
        })
    }
}

pub struct InFlightGuard<'a> {
    active: &'a DashSet<Identity>,
    identity: Identity,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.identity);
    }
}
