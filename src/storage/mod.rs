use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::models::errors::StoreError;
use crate::models::event::Event;

/// Owner of the active-address set and the per-address event logs.
///
/// Implementations must be safe to call from any number of watcher tasks and
/// request handlers at once.
pub trait Storage: Send + Sync {
    /// Adds `address` to the active set. Idempotent.
    fn mark_active(&self, address: &str);

    /// Adds `address` to the active set unless it is already there.
    /// Returns `true` if this call registered it.
    fn try_mark_active(&self, address: &str) -> bool;

    fn is_active(&self, address: &str) -> bool;

    /// Removes `address` from the active set. No-op if absent.
    fn mark_inactive(&self, address: &str);

    /// Snapshot of the active set.
    fn active_addresses(&self) -> Vec<String>;

    /// Appends to the address log, creating it on first use.
    fn append(&self, address: &str, event: Event) -> Result<(), StoreError>;

    /// Snapshot of the address log in arrival order. Unknown addresses yield
    /// an empty vector.
    fn read(&self, address: &str) -> Result<Vec<Event>, StoreError>;
}

#[derive(Default)]
struct StoreState {
    active: HashSet<String>,
    logs: HashMap<String, Vec<Event>>,
}

/// Process-lifetime store. Logs are never evicted, so memory grows with the
/// number of events ingested until the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStore {
    fn mark_active(&self, address: &str) {
        self.state.write().active.insert(address.to_string());
    }

    fn try_mark_active(&self, address: &str) -> bool {
        self.state.write().active.insert(address.to_string())
    }

    fn is_active(&self, address: &str) -> bool {
        self.state.read().active.contains(address)
    }

    fn mark_inactive(&self, address: &str) {
        self.state.write().active.remove(address);
    }

    fn active_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.state.read().active.iter().cloned().collect();
        addresses.sort();
        addresses
    }

    fn append(&self, address: &str, event: Event) -> Result<(), StoreError> {
        self.state
            .write()
            .logs
            .entry(address.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    fn read(&self, address: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .state
            .read()
            .logs
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    pub(crate) fn event(data: &str) -> Event {
        Event {
            address: "0xabc".to_string(),
            block_hash: "0x01".to_string(),
            block_number: "0x10".to_string(),
            data: data.to_string(),
            log_index: "0x0".to_string(),
            topics: vec![],
            transaction_hash: "0x02".to_string(),
            transaction_index: "0x0".to_string(),
        }
    }

    #[test]
    fn test_append_creates_log_lazily() {
        let store = InMemoryStore::new();
        store.append("0xabc", event("txn1")).unwrap();

        let events = store.read("0xabc").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "txn1");
    }

    #[test]
    fn test_read_preserves_arrival_order() {
        let store = InMemoryStore::new();
        store.append("0xabc", event("txn1")).unwrap();
        store.append("0xabc", event("txn2")).unwrap();
        store.append("0xdef", event("other")).unwrap();

        let data: Vec<String> = store
            .read("0xabc")
            .unwrap()
            .into_iter()
            .map(|e| e.data)
            .collect();
        assert_eq!(data, vec!["txn1", "txn2"]);
    }

    #[test]
    fn test_read_unknown_address_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.read("non_existent_address").unwrap().is_empty());
    }

    #[test]
    fn test_active_set() {
        let store = InMemoryStore::new();
        assert!(!store.is_active("0xabc"));

        store.mark_active("0xabc");
        store.mark_active("0xabc");
        assert!(store.is_active("0xabc"));
        assert_eq!(store.active_addresses(), vec!["0xabc".to_string()]);

        store.mark_inactive("0xabc");
        store.mark_inactive("0xabc");
        assert!(!store.is_active("0xabc"));
    }

    #[test]
    fn test_try_mark_active_registers_once() {
        let store = InMemoryStore::new();
        assert!(store.try_mark_active("0xabc"));
        assert!(!store.try_mark_active("0xabc"));

        store.mark_inactive("0xabc");
        assert!(store.try_mark_active("0xabc"));
    }

    #[test]
    fn test_appending_does_not_mark_active() {
        let store = InMemoryStore::new();
        store.append("0xabc", event("txn1")).unwrap();
        assert!(!store.is_active("0xabc"));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = ["e1", "e2"]
            .into_iter()
            .map(|data| {
                let store = store.clone();
                std::thread::spawn(move || store.append("0xabc", event(data)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut data: Vec<String> = store
            .read("0xabc")
            .unwrap()
            .into_iter()
            .map(|e| e.data)
            .collect();
        data.sort();
        assert_eq!(data, vec!["e1", "e2"]);
    }

    #[test]
    fn test_concurrent_try_mark_active_has_one_winner() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.try_mark_active("0xabc"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
    }
}
