//! Best-effort presence: who is here, what they hold, what they selected.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::ParticipantId;
use crate::claims::ClaimEvent;
use crate::scene::ObjectId;

/// Messages exchanged over the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
    /// A participant joined (or answers someone else's hello).
    Hello {
        participant: ParticipantId,
        name: String,
    },
    Goodbye {
        participant: ParticipantId,
    },
    Claim(ClaimEvent),
    Selection {
        participant: ParticipantId,
        object_id: Option<ObjectId>,
    },
}

/// Broadcast channel to every other participant. Delivery is not
/// guaranteed and a participant never receives its own messages.
pub trait PresenceChannel {
    fn broadcast(&mut self, message: &PresenceMessage);

    /// Drain received messages (non-blocking).
    fn poll_messages(&mut self) -> Vec<PresenceMessage>;
}

#[derive(Debug, Default)]
struct PresenceHubState {
    queues: Vec<VecDeque<String>>,
}

/// In-memory presence channel shared by every connection made from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryPresenceHub {
    state: Rc<RefCell<PresenceHubState>>,
}

impl MemoryPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryPresence {
        let mut state = self.state.borrow_mut();
        state.queues.push(VecDeque::new());
        MemoryPresence {
            state: Rc::clone(&self.state),
            index: state.queues.len() - 1,
            drop_next: 0,
        }
    }

    /// Deliver a raw payload to every connection.
    pub fn inject_raw(&self, payload: &str) {
        for queue in &mut self.state.borrow_mut().queues {
            queue.push_back(payload.to_string());
        }
    }
}

/// One connection to a [`MemoryPresenceHub`].
#[derive(Debug)]
pub struct MemoryPresence {
    state: Rc<RefCell<PresenceHubState>>,
    index: usize,
    drop_next: usize,
}

impl MemoryPresence {
    /// Silently lose the next `count` outgoing messages.
    pub fn drop_next(&mut self, count: usize) {
        self.drop_next += count;
    }
}

impl PresenceChannel for MemoryPresence {
    fn broadcast(&mut self, message: &PresenceMessage) {
        if self.drop_next > 0 {
            self.drop_next -= 1;
            log::debug!("Dropping presence message {:?}", message);
            return;
        }
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Failed to encode presence message: {}", e);
                return;
            }
        };
        let mut state = self.state.borrow_mut();
        for (index, queue) in state.queues.iter_mut().enumerate() {
            if index != self.index {
                queue.push_back(payload.clone());
            }
        }
    }

    fn poll_messages(&mut self) -> Vec<PresenceMessage> {
        let payloads: Vec<String> = match self.state.borrow_mut().queues.get_mut(self.index) {
            Some(queue) => queue.drain(..).collect(),
            None => return Vec::new(),
        };
        payloads
            .into_iter()
            .filter_map(|payload| match serde_json::from_str(&payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    log::warn!("Undecodable presence message: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// What is known about one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    pub selection: Option<ObjectId>,
}

/// Active remote participants.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    peers: BTreeMap<ParticipantId, PeerInfo>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or rename a participant. Returns `true` if it was not known.
    pub fn join(&mut self, participant: ParticipantId, name: impl Into<String>) -> bool {
        let name = name.into();
        match self.peers.get_mut(&participant) {
            Some(peer) => {
                peer.name = name;
                false
            }
            None => {
                self.peers.insert(
                    participant,
                    PeerInfo {
                        name,
                        selection: None,
                    },
                );
                true
            }
        }
    }

    pub fn leave(&mut self, participant: ParticipantId) -> Option<PeerInfo> {
        self.peers.remove(&participant)
    }

    /// Record a selection. Unknown participants are added under their id.
    pub fn set_selection(&mut self, participant: ParticipantId, object_id: Option<ObjectId>) {
        self.peers
            .entry(participant)
            .or_insert_with(|| PeerInfo {
                name: participant.to_string(),
                selection: None,
            })
            .selection = object_id;
    }

    /// Forget selections of a removed object.
    pub fn clear_selections_of(&mut self, object_id: ObjectId) {
        for peer in self.peers.values_mut() {
            if peer.selection == Some(object_id) {
                peer.selection = None;
            }
        }
    }

    pub fn get(&self, participant: ParticipantId) -> Option<&PeerInfo> {
        self.peers.get(&participant)
    }

    pub fn peers(&self) -> impl Iterator<Item = (ParticipantId, &PeerInfo)> + '_ {
        self.peers.iter().map(|(id, peer)| (*id, peer))
    }

    /// Participants that have `object_id` selected.
    pub fn selected_by(&self, object_id: ObjectId) -> Vec<ParticipantId> {
        self.peers
            .iter()
            .filter(|(_, peer)| peer.selection == Some(object_id))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
