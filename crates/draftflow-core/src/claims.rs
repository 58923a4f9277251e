//! Advisory edit claims.
//!
//! A claim says "this participant is editing this object right now". Claims
//! are soft locks: they only gate local edits, the merge never consults
//! them. Competing claims are resolved by start time, then participant id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::SyncConfig;
use crate::error::{EditError, EditResult};
use crate::scene::ObjectId;
use crate::sync::ParticipantId;

/// Claim state of one object, as seen by this participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Free,
    ClaimedLocal,
    ClaimedRemote(ParticipantId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    Begin,
    Refresh,
    End,
}

/// A claim announcement exchanged over presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEvent {
    pub object_id: ObjectId,
    pub owner: ParticipantId,
    pub action: ClaimAction,
    /// When the owner began the claim (owner's clock).
    pub started_at: u64,
}

/// A claim state change, reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimTransition {
    pub object_id: ObjectId,
    pub previous: ClaimState,
    pub current: ClaimState,
}

/// Events to broadcast and transitions produced by [`EditSessionTracker::expire`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSweep {
    pub events: Vec<ClaimEvent>,
    pub transitions: Vec<ClaimTransition>,
}

#[derive(Debug, Clone)]
struct EditClaim {
    owner: ParticipantId,
    started_at: u64,
    /// Last local edit, or receipt time of the last remote refresh.
    last_activity: u64,
    last_broadcast: u64,
}

impl EditClaim {
    /// Priority key: earlier start wins, then lower participant id.
    fn priority(&self) -> (u64, ParticipantId) {
        (self.started_at, self.owner)
    }
}

/// Tracks which objects are being edited and by whom.
#[derive(Debug, Clone)]
pub struct EditSessionTracker {
    participant: ParticipantId,
    claims: HashMap<ObjectId, EditClaim>,
    idle_timeout_ms: u64,
    stale_timeout_ms: u64,
    heartbeat_ms: u64,
}

impl EditSessionTracker {
    pub fn new(participant: ParticipantId, config: &SyncConfig) -> Self {
        Self {
            participant,
            claims: HashMap::new(),
            idle_timeout_ms: config.claim_idle_timeout_ms,
            stale_timeout_ms: config.remote_claim_stale_ms,
            heartbeat_ms: config.claim_heartbeat_ms,
        }
    }

    pub fn state(&self, object_id: ObjectId) -> ClaimState {
        match self.claims.get(&object_id) {
            None => ClaimState::Free,
            Some(claim) if claim.owner == self.participant => ClaimState::ClaimedLocal,
            Some(claim) => ClaimState::ClaimedRemote(claim.owner),
        }
    }

    /// Fails with [`EditError::ObjectLocked`] while another participant holds
    /// the claim.
    pub fn check_editable(&self, object_id: ObjectId) -> EditResult<()> {
        match self.state(object_id) {
            ClaimState::ClaimedRemote(owner) => Err(EditError::ObjectLocked { object_id, owner }),
            _ => Ok(()),
        }
    }

    /// Claim `object_id` for a local interaction.
    ///
    /// Returns the event to broadcast: `Begin` for a new claim, a `Refresh`
    /// if the claim was already held and a heartbeat is due, else `None`.
    pub fn begin_local(&mut self, object_id: ObjectId, now: u64) -> EditResult<Option<ClaimEvent>> {
        match self.state(object_id) {
            ClaimState::ClaimedRemote(owner) => Err(EditError::ObjectLocked { object_id, owner }),
            ClaimState::ClaimedLocal => Ok(self.touch_local(object_id, now)),
            ClaimState::Free => {
                self.claims.insert(
                    object_id,
                    EditClaim {
                        owner: self.participant,
                        started_at: now,
                        last_activity: now,
                        last_broadcast: now,
                    },
                );
                Ok(Some(self.event(object_id, ClaimAction::Begin, now)))
            }
        }
    }

    /// Record local activity on a held claim.
    pub fn touch_local(&mut self, object_id: ObjectId, now: u64) -> Option<ClaimEvent> {
        let heartbeat = self.heartbeat_ms;
        let participant = self.participant;
        let claim = self
            .claims
            .get_mut(&object_id)
            .filter(|c| c.owner == participant)?;
        claim.last_activity = now;
        if now.saturating_sub(claim.last_broadcast) < heartbeat {
            return None;
        }
        claim.last_broadcast = now;
        let started_at = claim.started_at;
        Some(self.event(object_id, ClaimAction::Refresh, started_at))
    }

    /// Release a local claim. Returns the `End` event if one was held.
    pub fn end_local(&mut self, object_id: ObjectId) -> Option<ClaimEvent> {
        if self.state(object_id) != ClaimState::ClaimedLocal {
            return None;
        }
        let claim = self.claims.remove(&object_id)?;
        Some(self.event(object_id, ClaimAction::End, claim.started_at))
    }

    /// Apply a claim announcement from another participant.
    pub fn apply_remote(&mut self, event: &ClaimEvent, now: u64) -> Option<ClaimTransition> {
        if event.owner == self.participant {
            return None;
        }
        let object_id = event.object_id;
        let previous = self.state(object_id);

        match event.action {
            ClaimAction::End => {
                if previous != ClaimState::ClaimedRemote(event.owner) {
                    return None;
                }
                self.claims.remove(&object_id);
            }
            ClaimAction::Begin | ClaimAction::Refresh => {
                let incoming = EditClaim {
                    owner: event.owner,
                    started_at: event.started_at,
                    last_activity: now,
                    last_broadcast: now,
                };
                match self.claims.get_mut(&object_id) {
                    Some(current) if current.owner == event.owner => {
                        current.last_activity = now;
                        return None;
                    }
                    Some(current) if current.priority() <= incoming.priority() => {
                        log::debug!(
                            "Ignoring claim on {} by {}: held by {}",
                            object_id,
                            event.owner,
                            current.owner
                        );
                        return None;
                    }
                    Some(current) => {
                        if current.owner == self.participant {
                            log::info!(
                                "Local claim on {} preempted by {}",
                                object_id,
                                event.owner
                            );
                        }
                        *current = incoming;
                    }
                    None => {
                        self.claims.insert(object_id, incoming);
                    }
                }
            }
        }

        Some(ClaimTransition {
            object_id,
            previous,
            current: self.state(object_id),
        })
    }

    /// Drop every claim held by `owner` (the participant left).
    pub fn release_participant(&mut self, owner: ParticipantId) -> Vec<ClaimTransition> {
        if owner == self.participant {
            return Vec::new();
        }
        let released: Vec<ObjectId> = self
            .claims
            .iter()
            .filter(|(_, claim)| claim.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        released
            .into_iter()
            .map(|object_id| {
                self.claims.remove(&object_id);
                ClaimTransition {
                    object_id,
                    previous: ClaimState::ClaimedRemote(owner),
                    current: ClaimState::Free,
                }
            })
            .collect()
    }

    /// Drop any claim on a deleted object.
    pub fn forget(&mut self, object_id: ObjectId) -> Option<ClaimTransition> {
        let previous = self.state(object_id);
        self.claims.remove(&object_id)?;
        Some(ClaimTransition {
            object_id,
            previous,
            current: ClaimState::Free,
        })
    }

    /// Release idle local claims, drop stale remote ones and emit due
    /// heartbeats.
    pub fn expire(&mut self, now: u64) -> ClaimSweep {
        let mut sweep = ClaimSweep::default();
        let mut expired = Vec::new();

        for (object_id, claim) in &mut self.claims {
            let idle = now.saturating_sub(claim.last_activity);
            if claim.owner == self.participant {
                if idle >= self.idle_timeout_ms {
                    expired.push(*object_id);
                } else if now.saturating_sub(claim.last_broadcast) >= self.heartbeat_ms {
                    claim.last_broadcast = now;
                    sweep.events.push(ClaimEvent {
                        object_id: *object_id,
                        owner: claim.owner,
                        action: ClaimAction::Refresh,
                        started_at: claim.started_at,
                    });
                }
            } else if idle >= self.stale_timeout_ms {
                log::debug!(
                    "Stale claim on {} by {} ({}ms without refresh)",
                    object_id,
                    claim.owner,
                    idle
                );
                expired.push(*object_id);
            }
        }

        for object_id in expired {
            let previous = self.state(object_id);
            if previous == ClaimState::ClaimedLocal {
                if let Some(event) = self.end_local(object_id) {
                    log::debug!("Local claim on {} idle, released", object_id);
                    sweep.events.push(event);
                }
            } else {
                self.claims.remove(&object_id);
            }
            sweep.transitions.push(ClaimTransition {
                object_id,
                previous,
                current: ClaimState::Free,
            });
        }
        sweep
    }

    /// Release every local claim, e.g. when leaving the session.
    pub fn release_all_local(&mut self) -> Vec<ClaimEvent> {
        let local: Vec<ObjectId> = self
            .claims
            .iter()
            .filter(|(_, claim)| claim.owner == self.participant)
            .map(|(id, _)| *id)
            .collect();
        local
            .into_iter()
            .filter_map(|id| self.end_local(id))
            .collect()
    }

    /// Objects this participant currently holds.
    pub fn local_claims(&self) -> Vec<ObjectId> {
        self.claims
            .iter()
            .filter(|(_, claim)| claim.owner == self.participant)
            .map(|(id, _)| *id)
            .collect()
    }

    fn event(&self, object_id: ObjectId, action: ClaimAction, started_at: u64) -> ClaimEvent {
        ClaimEvent {
            object_id,
            owner: self.participant,
            action,
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::new_object_id;

    const ME: ParticipantId = ParticipantId(5);
    const LOW: ParticipantId = ParticipantId(1);
    const HIGH: ParticipantId = ParticipantId(9);

    fn tracker() -> EditSessionTracker {
        EditSessionTracker::new(ME, &SyncConfig::default())
    }

    fn remote(object_id: ObjectId, owner: ParticipantId, action: ClaimAction, started_at: u64) -> ClaimEvent {
        ClaimEvent {
            object_id,
            owner,
            action,
            started_at,
        }
    }

    #[test]
    fn test_local_claim_lifecycle() {
        let mut claims = tracker();
        let id = new_object_id();
        assert_eq!(claims.state(id), ClaimState::Free);

        let begin = claims.begin_local(id, 100).unwrap().unwrap();
        assert_eq!(begin.action, ClaimAction::Begin);
        assert_eq!(claims.state(id), ClaimState::ClaimedLocal);

        // Already held, no heartbeat due.
        assert_eq!(claims.begin_local(id, 200).unwrap(), None);

        let end = claims.end_local(id).unwrap();
        assert_eq!(end.action, ClaimAction::End);
        assert_eq!(claims.state(id), ClaimState::Free);
        assert_eq!(claims.end_local(id), None);
    }

    #[test]
    fn test_remote_claim_locks_object() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.apply_remote(&remote(id, HIGH, ClaimAction::Begin, 10), 10);

        assert_eq!(claims.state(id), ClaimState::ClaimedRemote(HIGH));
        assert_eq!(
            claims.check_editable(id),
            Err(EditError::ObjectLocked {
                object_id: id,
                owner: HIGH
            })
        );
        assert!(claims.begin_local(id, 20).is_err());

        claims.apply_remote(&remote(id, HIGH, ClaimAction::End, 10), 30);
        assert!(claims.check_editable(id).is_ok());
    }

    #[test]
    fn test_earlier_remote_claim_preempts_local() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.begin_local(id, 100).unwrap();

        let transition = claims
            .apply_remote(&remote(id, HIGH, ClaimAction::Begin, 50), 110)
            .unwrap();
        assert_eq!(transition.previous, ClaimState::ClaimedLocal);
        assert_eq!(transition.current, ClaimState::ClaimedRemote(HIGH));
    }

    #[test]
    fn test_later_remote_claim_loses_to_local() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.begin_local(id, 100).unwrap();
        assert_eq!(claims.apply_remote(&remote(id, LOW, ClaimAction::Begin, 150), 150), None);
        assert_eq!(claims.state(id), ClaimState::ClaimedLocal);
    }

    #[test]
    fn test_start_time_tie_goes_to_lower_id() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.begin_local(id, 100).unwrap();

        assert_eq!(claims.apply_remote(&remote(id, HIGH, ClaimAction::Begin, 100), 100), None);
        claims.apply_remote(&remote(id, LOW, ClaimAction::Begin, 100), 100);
        assert_eq!(claims.state(id), ClaimState::ClaimedRemote(LOW));
    }

    #[test]
    fn test_competing_remote_claims() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.apply_remote(&remote(id, HIGH, ClaimAction::Begin, 20), 20);
        claims.apply_remote(&remote(id, LOW, ClaimAction::Begin, 30), 30);
        assert_eq!(claims.state(id), ClaimState::ClaimedRemote(HIGH));

        // End from the loser does not free the object.
        claims.apply_remote(&remote(id, LOW, ClaimAction::End, 30), 31);
        assert_eq!(claims.state(id), ClaimState::ClaimedRemote(HIGH));
    }

    #[test]
    fn test_idle_local_claim_expires() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.begin_local(id, 0).unwrap();
        claims.touch_local(id, 5_000);

        let sweep = claims.expire(30_000);
        assert!(sweep.transitions.is_empty());

        let sweep = claims.expire(35_000);
        assert_eq!(sweep.events.len(), 1);
        assert_eq!(sweep.events[0].action, ClaimAction::End);
        assert_eq!(sweep.transitions[0].previous, ClaimState::ClaimedLocal);
        assert_eq!(claims.state(id), ClaimState::Free);
    }

    #[test]
    fn test_stale_remote_claim_expires() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.apply_remote(&remote(id, HIGH, ClaimAction::Begin, 0), 1_000);
        claims.apply_remote(&remote(id, HIGH, ClaimAction::Refresh, 0), 20_000);

        assert!(claims.expire(40_000).transitions.is_empty());
        let sweep = claims.expire(50_000);
        assert!(sweep.events.is_empty());
        assert_eq!(sweep.transitions.len(), 1);
        assert!(claims.check_editable(id).is_ok());
    }

    #[test]
    fn test_heartbeat_refresh() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.begin_local(id, 0).unwrap();

        assert_eq!(claims.touch_local(id, 5_000), None);
        let refresh = claims.touch_local(id, 10_000).unwrap();
        assert_eq!(refresh.action, ClaimAction::Refresh);
        assert_eq!(refresh.started_at, 0);

        let sweep = claims.expire(20_000);
        assert_eq!(sweep.events.len(), 1);
        assert_eq!(sweep.events[0].action, ClaimAction::Refresh);
    }

    #[test]
    fn test_participant_leaving_releases_claims() {
        let mut claims = tracker();
        let a = new_object_id();
        let b = new_object_id();
        claims.apply_remote(&remote(a, HIGH, ClaimAction::Begin, 0), 0);
        claims.apply_remote(&remote(b, HIGH, ClaimAction::Begin, 0), 0);
        claims.begin_local(new_object_id(), 0).unwrap();

        assert_eq!(claims.release_participant(HIGH).len(), 2);
        assert!(claims.check_editable(a).is_ok());
        assert_eq!(claims.local_claims().len(), 1);
        assert_eq!(claims.release_all_local().len(), 1);
        assert!(claims.local_claims().is_empty());
    }

    #[test]
    fn test_forget_drops_claim() {
        let mut claims = tracker();
        let id = new_object_id();
        claims.apply_remote(&remote(id, HIGH, ClaimAction::Begin, 0), 0);
        let transition = claims.forget(id).unwrap();
        assert_eq!(transition.current, ClaimState::Free);
        assert_eq!(claims.forget(id), None);
    }

    #[test]
    fn test_own_echo_ignored() {
        let mut claims = tracker();
        let id = new_object_id();
        assert_eq!(claims.apply_remote(&remote(id, ME, ClaimAction::Begin, 0), 0), None);
        assert_eq!(claims.state(id), ClaimState::Free);
    }
}
