//! Opcode dispatch table
//!
//! Handlers are registered against a [`Route`]: one exact opcode, the logical
//! discovery response (every whitelisted wire opcode) or every frame.
//! Lookups clone the matching handlers out so callers invoke them unlocked.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use smartcloud_protocol::{OpCode, is_discovery_response};

use crate::transport::Inbound;

/// Callback for received frames
pub type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    OpCode(OpCode),
    DiscoveryResponse,
    /// Every accepted frame
    Any,
}

impl From<OpCode> for Route {
    fn from(op: OpCode) -> Self {
        Self::OpCode(op)
    }
}

/// Token returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct HandlerTable {
    routes: RwLock<HashMap<Route, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, route: impl Into<Route>, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .entry(route.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Returns false if the id was not registered
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut routes = self.routes.write();
        let mut found = false;
        for handlers in routes.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            found |= handlers.len() != before;
        }
        routes.retain(|_, handlers| !handlers.is_empty());
        found
    }

    /// Handlers for an opcode: exact matches, then discovery, then catch-all
    pub fn matching(&self, op: OpCode) -> Vec<Handler> {
        let routes = self.routes.read();
        let exact = routes.get(&Route::OpCode(op)).into_iter().flatten();
        let discovery = is_discovery_response(op)
            .then(|| routes.get(&Route::DiscoveryResponse))
            .flatten()
            .into_iter()
            .flatten();
        let any = routes.get(&Route::Any).into_iter().flatten();

        exact
            .chain(discovery)
            .chain(any)
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    /// Total registered handlers
    pub fn len(&self) -> usize {
        self.routes.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Handler = {
            let count = Arc::clone(&count);
            Arc::new(move |_: &Inbound| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, handler)
    }

    #[test]
    fn test_exact_and_discovery_routes() {
        let table = HandlerTable::new();
        let (_, exact) = counter();
        let (_, discovery) = counter();

        table.register(OpCode::DISCOVERY_RESPONSE, exact);
        table.register(Route::DiscoveryResponse, discovery);

        assert_eq!(table.matching(OpCode::DISCOVERY_RESPONSE).len(), 2);
        assert_eq!(table.matching(OpCode::ALT_DISCOVERY_RESPONSE).len(), 1);
        assert_eq!(table.matching(OpCode::LEGACY_DISCOVERY_RESPONSE).len(), 1);
        assert!(table.matching(OpCode::FIRMWARE_RESPONSE).is_empty());

        let (_, any) = counter();
        table.register(Route::Any, any);
        assert_eq!(table.matching(OpCode::FIRMWARE_RESPONSE).len(), 1);
        assert_eq!(table.matching(OpCode::DISCOVERY_RESPONSE).len(), 3);
    }

    #[test]
    fn test_unregister() {
        let table = HandlerTable::new();
        let (_, a) = counter();
        let (_, b) = counter();

        let id_a = table.register(OpCode::STATUS_RESPONSE, a);
        table.register(OpCode::STATUS_RESPONSE, b);
        assert_eq!(table.len(), 2);

        assert!(table.unregister(id_a));
        assert!(!table.unregister(id_a));
        assert_eq!(table.matching(OpCode::STATUS_RESPONSE).len(), 1);
    }
}
