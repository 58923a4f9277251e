//! Contract with the shared key-value store, plus an in-memory hub.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::error::{StoreError, StoreResult};

/// A change observed on the store, from any writer including this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    /// `None` is a tombstone: the key was deleted.
    pub value: Option<String>,
}

/// The external real-time key-value store.
///
/// Assumed eventually consistent with per-key last-writer-wins, at-least-once
/// event delivery and no ordering across distinct keys.
pub trait SharedSceneStore {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()>;

    fn delete(&mut self, key: &str) -> StoreResult<()>;

    /// Drain events observed since the last poll (non-blocking).
    fn poll_events(&mut self) -> Vec<StoreEvent>;

    /// Current contents, for bootstrapping a newly joined replica.
    fn entries(&self) -> StoreResult<Vec<(String, String)>>;
}

#[derive(Debug, Default)]
struct HubState {
    entries: BTreeMap<String, String>,
    /// One event queue per connection.
    queues: Vec<VecDeque<StoreEvent>>,
    /// Deliver every event twice.
    duplicate_delivery: bool,
}

impl HubState {
    fn broadcast(&mut self, event: StoreEvent) {
        let copies = if self.duplicate_delivery { 2 } else { 1 };
        for queue in &mut self.queues {
            for _ in 0..copies {
                queue.push_back(event.clone());
            }
        }
    }
}

/// An in-memory store shared by every connection made from it.
///
/// Single-threaded; used by tests and the simulator.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection with its own event subscription.
    pub fn connect(&self) -> MemorySceneStore {
        let mut state = self.state.borrow_mut();
        state.queues.push(VecDeque::new());
        MemorySceneStore {
            state: Rc::clone(&self.state),
            index: state.queues.len() - 1,
            offline: false,
            failures: VecDeque::new(),
        }
    }

    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.state.borrow_mut().duplicate_delivery = enabled;
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.borrow().entries.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().entries.is_empty()
    }
}

/// One connection to a [`MemoryHub`], with fault injection.
#[derive(Debug)]
pub struct MemorySceneStore {
    state: Rc<RefCell<HubState>>,
    index: usize,
    offline: bool,
    failures: VecDeque<StoreError>,
}

impl MemorySceneStore {
    /// While offline every write fails with a transient error.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Fail the next write with `error`. Queued failures are used in order.
    pub fn fail_next(&mut self, error: StoreError) {
        self.failures.push_back(error);
    }

    fn check_write(&mut self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Transient("offline".to_string()));
        }
        match self.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl SharedSceneStore for MemorySceneStore {
    fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.check_write()?;
        let mut state = self.state.borrow_mut();
        state.entries.insert(key.to_string(), value.to_string());
        state.broadcast(StoreEvent {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.check_write()?;
        let mut state = self.state.borrow_mut();
        state.entries.remove(key);
        state.broadcast(StoreEvent {
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<StoreEvent> {
        let mut state = self.state.borrow_mut();
        match state.queues.get_mut(self.index) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let state = self.state.borrow();
        Ok(state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
