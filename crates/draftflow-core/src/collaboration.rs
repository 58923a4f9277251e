//! One participant's collaborative editing session.
//!
//! Ties the selection machine, edit claims, attribute editor and sync
//! gateway together. Local edits are applied immediately; everything that
//! crosses the network happens in [`CollaborationSession::tick`].

use kurbo::Vec2;
use std::cell::RefCell;
use std::rc::Rc;

use crate::claims::{ClaimState, ClaimTransition, EditSessionTracker};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::document::SceneDocument;
use crate::editor::{AttributeEditor, ElementAttributes};
use crate::error::{EditError, EditResult, StoreResult};
use crate::scene::{Attribute, Geometry, ObjectId, Property, SceneObject};
use crate::selection::{SelectionChange, SelectionMachine, SelectionState};
use crate::sync::{
    ParticipantId, Patch, PresenceChannel, PresenceMessage, Roster, SceneChange,
    SharedSceneStore, SyncGateway, SyncStatus,
};
use crate::tools::ToolKind;

/// Receives everything a rendering surface needs to follow the scene.
///
/// All methods default to doing nothing.
pub trait SceneObserver {
    fn object_created(&mut self, _object: &SceneObject) {}
    fn object_updated(&mut self, _object: &SceneObject) {}
    fn object_removed(&mut self, _id: ObjectId) {}
    fn selection_changed(&mut self, _change: &SelectionChange) {}
    fn claim_changed(&mut self, _transition: &ClaimTransition) {}
    fn sync_status_changed(&mut self, _status: SyncStatus) {}
    fn roster_changed(&mut self, _roster: &Roster) {}
}

/// A participant's view of the shared canvas.
pub struct CollaborationSession {
    participant: ParticipantId,
    name: String,
    gateway: SyncGateway,
    claims: EditSessionTracker,
    selection: SelectionMachine,
    editor: AttributeEditor,
    roster: Roster,
    presence: Box<dyn PresenceChannel>,
    clock: Box<dyn Clock>,
    min_dimension: f64,
    observers: Vec<Rc<RefCell<dyn SceneObserver>>>,
    joined: bool,
}

impl CollaborationSession {
    pub fn new(
        participant: ParticipantId,
        name: impl Into<String>,
        store: Box<dyn SharedSceneStore>,
        presence: Box<dyn PresenceChannel>,
        clock: Box<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            participant,
            name: name.into(),
            claims: EditSessionTracker::new(participant, &config),
            editor: AttributeEditor::new(&config),
            min_dimension: config.min_dimension,
            gateway: SyncGateway::new(participant, store, config),
            selection: SelectionMachine::new(),
            roster: Roster::new(),
            presence,
            clock,
            observers: Vec::new(),
            joined: false,
        }
    }

    pub fn add_observer(&mut self, observer: Rc<RefCell<dyn SceneObserver>>) {
        self.observers.push(observer);
    }

    // --- Accessors ---

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn document(&self) -> &SceneDocument {
        self.gateway.document()
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.gateway.document().get(id)
    }

    pub fn selection(&self) -> &SelectionMachine {
        &self.selection
    }

    pub fn selection_state(&self) -> SelectionState {
        self.selection.state()
    }

    pub fn active_object(&self) -> Option<ObjectId> {
        self.selection.active_object()
    }

    pub fn claim_state(&self, id: ObjectId) -> ClaimState {
        self.claims.state(id)
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.gateway.is_out_of_sync()
    }

    pub fn pending_writes(&self) -> usize {
        self.gateway.pending_writes()
    }

    /// Property panel values for the selected object.
    pub fn element_attributes(&self) -> Option<ElementAttributes> {
        let id = self.active_object()?;
        let object = self.object(id)?;
        Some(self.editor.element_attributes(object))
    }

    // --- Lifecycle ---

    /// Load the current scene from the store and announce this participant.
    pub fn join(&mut self) -> StoreResult<()> {
        let changes = self.gateway.bootstrap()?;
        for change in &changes {
            self.notify_change(change);
        }
        self.reconcile_selection();
        self.presence.broadcast(&PresenceMessage::Hello {
            participant: self.participant,
            name: self.name.clone(),
        });
        self.joined = true;
        log::info!(
            "{} joined as {} with {} objects",
            self.name,
            self.participant,
            self.document().len()
        );
        Ok(())
    }

    /// Release local claims and say goodbye. Pending writes get one last
    /// flush; whatever is left stays queued.
    pub fn leave(&mut self) {
        let now = self.clock.now_millis();
        for event in self.claims.release_all_local() {
            self.presence.broadcast(&PresenceMessage::Claim(event));
        }
        self.presence.broadcast(&PresenceMessage::Goodbye {
            participant: self.participant,
        });
        self.flush(now);
        self.joined = false;
        log::info!("{} left", self.participant);
    }

    // --- Tools and selection ---

    pub fn select_tool(&mut self, tool: ToolKind) -> SelectionChange {
        let change = self.selection.select_tool(tool);
        self.selection_changed(change);
        change
    }

    pub fn open_category(&mut self, name: &str) -> bool {
        self.selection.open_category(name)
    }

    pub fn choose_variant(&mut self, tool: ToolKind) -> Option<SelectionChange> {
        let change = self.selection.choose_variant(tool)?;
        self.selection_changed(change);
        Some(change)
    }

    /// Finish the armed tool's gesture. Returns the created object, placed
    /// above everything else and selected.
    pub fn complete_creation(&mut self, geometry: Geometry) -> Option<SceneObject> {
        let creation = self.selection.complete_creation(geometry)?;
        let created = creation.object.and_then(|mut object| {
            object.z_index = self.document().max_z().map_or(0, |z| z + 1);
            let now = self.clock.now_millis();
            let stamp = self.gateway.next_stamp(now);
            let change = self.commit(Patch::create(object.clone(), stamp), now);
            change.map(|change| {
                self.notify_change(&change);
                object
            })
        });
        self.selection_changed(creation.change);
        created
    }

    pub fn click_object(&mut self, id: ObjectId) -> EditResult<SelectionChange> {
        if !self.document().contains(id) {
            return Err(EditError::ObjectNotFound(id));
        }
        let change = self.selection.click_object(id);
        self.selection_changed(change);
        Ok(change)
    }

    pub fn click_empty(&mut self) -> SelectionChange {
        let change = self.selection.click_empty();
        self.selection_changed(change);
        change
    }

    /// Abandon the current interaction. Patches already published stay.
    pub fn escape(&mut self) -> SelectionChange {
        if let Some(id) = self.active_object() {
            self.end_interaction(id);
        }
        let change = self.selection.escape();
        self.selection_changed(change);
        change
    }

    // --- Editing ---

    /// Claim `id` for a drag, resize or text edit.
    pub fn begin_interaction(&mut self, id: ObjectId) -> EditResult<()> {
        self.require(id)?;
        let now = self.clock.now_millis();
        self.claim(id, now)
    }

    pub fn drag_by(&mut self, id: ObjectId, delta: Vec2) -> EditResult<()> {
        let position = self.require(id)?.geometry.position + delta;
        self.set_attributes(id, vec![Attribute::X(position.x), Attribute::Y(position.y)])
    }

    pub fn resize(&mut self, id: ObjectId, width: f64, height: f64) -> EditResult<()> {
        self.require(id)?;
        self.set_attributes(
            id,
            vec![
                Attribute::Width(width.max(self.min_dimension)),
                Attribute::Height(height.max(self.min_dimension)),
            ],
        )
    }

    /// Edit one property from raw panel input.
    pub fn edit_attribute(&mut self, id: ObjectId, property: Property, raw: &str) -> EditResult<()> {
        let object = self.require(id)?.clone();
        self.claims.check_editable(id)?;
        let now = self.clock.now_millis();
        let stamp = self.gateway.next_stamp(now);
        let patch = self.editor.edit_attribute(&object, property, raw, stamp)?;
        self.claim(id, now)?;
        if let Some(change) = self.commit(patch, now) {
            self.notify_change(&change);
        }
        Ok(())
    }

    /// Release the local claim on `id`, if held.
    pub fn end_interaction(&mut self, id: ObjectId) {
        let previous = self.claims.state(id);
        if let Some(event) = self.claims.end_local(id) {
            self.presence.broadcast(&PresenceMessage::Claim(event));
            self.claim_changed(&ClaimTransition {
                object_id: id,
                previous,
                current: ClaimState::Free,
            });
        }
    }

    pub fn delete_object(&mut self, id: ObjectId) -> EditResult<()> {
        self.require(id)?;
        self.claims.check_editable(id)?;
        self.end_interaction(id);
        let now = self.clock.now_millis();
        let stamp = self.gateway.next_stamp(now);
        if let Some(change) = self.commit(Patch::delete(id, stamp), now) {
            self.apply_removal(&change);
        }
        Ok(())
    }

    pub fn bring_to_front(&mut self, id: ObjectId) -> EditResult<()> {
        let current = self.require(id)?.z_index;
        let top = self.document().max_z().unwrap_or(current);
        let contested = self
            .document()
            .objects_back_to_front()
            .iter()
            .any(|o| o.z_index == top && o.id() != id);
        if current == top && !contested {
            return Ok(());
        }
        self.set_attributes(id, vec![Attribute::ZIndex(top + 1)])
    }

    pub fn send_to_back(&mut self, id: ObjectId) -> EditResult<()> {
        let current = self.require(id)?.z_index;
        let bottom = self.document().min_z().unwrap_or(current);
        let contested = self
            .document()
            .objects_back_to_front()
            .iter()
            .any(|o| o.z_index == bottom && o.id() != id);
        if current == bottom && !contested {
            return Ok(());
        }
        self.set_attributes(id, vec![Attribute::ZIndex(bottom - 1)])
    }

    /// Delete every live object. Returns how many were removed.
    pub fn clear_canvas(&mut self) -> usize {
        let ids: Vec<ObjectId> = self.document().ids().collect();
        let now = self.clock.now_millis();
        let mut removed = 0;
        for id in ids {
            self.end_interaction(id);
            let stamp = self.gateway.next_stamp(now);
            if let Some(change) = self.commit(Patch::delete(id, stamp), now) {
                self.apply_removal(&change);
                removed += 1;
            }
        }
        log::info!("Cleared canvas ({} objects)", removed);
        removed
    }

    // --- Sync ---

    /// Flush outgoing writes, merge remote changes, process presence and
    /// expire claims.
    pub fn tick(&mut self) {
        let now = self.clock.now_millis();
        self.flush(now);

        for change in self.gateway.poll_remote() {
            match change {
                SceneChange::Removed(_) => self.apply_removal(&change),
                _ => self.notify_change(&change),
            }
        }
        self.reconcile_selection();

        for message in self.presence.poll_messages() {
            self.handle_presence(message, now);
        }

        let sweep = self.claims.expire(now);
        for event in sweep.events {
            self.presence.broadcast(&PresenceMessage::Claim(event));
        }
        for transition in &sweep.transitions {
            self.claim_changed(transition);
        }
    }

    fn flush(&mut self, now: u64) {
        if let Some(status) = self.gateway.flush(now) {
            self.notify(|o| o.sync_status_changed(status));
        }
    }

    fn handle_presence(&mut self, message: PresenceMessage, now: u64) {
        match message {
            PresenceMessage::Hello { participant, name } => {
                if participant == self.participant {
                    return;
                }
                if self.roster.join(participant, name) {
                    log::info!("Participant {} joined", participant);
                    // Introduce ourselves to the newcomer.
                    self.presence.broadcast(&PresenceMessage::Hello {
                        participant: self.participant,
                        name: self.name.clone(),
                    });
                    if let Some(id) = self.active_object() {
                        self.presence.broadcast(&PresenceMessage::Selection {
                            participant: self.participant,
                            object_id: Some(id),
                        });
                    }
                }
                self.roster_changed();
            }
            PresenceMessage::Goodbye { participant } => {
                if self.roster.leave(participant).is_some() {
                    log::info!("Participant {} left", participant);
                }
                for transition in self.claims.release_participant(participant) {
                    self.claim_changed(&transition);
                }
                self.roster_changed();
            }
            PresenceMessage::Claim(event) => {
                if let Some(transition) = self.claims.apply_remote(&event, now) {
                    self.claim_changed(&transition);
                }
            }
            PresenceMessage::Selection {
                participant,
                object_id,
            } => {
                if participant == self.participant {
                    return;
                }
                self.roster.set_selection(participant, object_id);
                self.roster_changed();
            }
        }
    }

    // --- Internals ---

    fn require(&self, id: ObjectId) -> EditResult<&SceneObject> {
        self.object(id).ok_or(EditError::ObjectNotFound(id))
    }

    /// Take or refresh the local claim, announcing it when needed.
    fn claim(&mut self, id: ObjectId, now: u64) -> EditResult<()> {
        let previous = self.claims.state(id);
        if let Some(event) = self.claims.begin_local(id, now)? {
            self.presence.broadcast(&PresenceMessage::Claim(event));
        }
        if previous == ClaimState::Free {
            self.claim_changed(&ClaimTransition {
                object_id: id,
                previous,
                current: ClaimState::ClaimedLocal,
            });
        }
        Ok(())
    }

    /// Validate, claim and commit a batch of attribute writes to one object.
    fn set_attributes(&mut self, id: ObjectId, attributes: Vec<Attribute>) -> EditResult<()> {
        let object = self.require(id)?;
        for attribute in &attributes {
            object.apply_patch(attribute)?;
        }
        self.claims.check_editable(id)?;

        let now = self.clock.now_millis();
        self.claim(id, now)?;
        let mut last = None;
        for attribute in attributes {
            let stamp = self.gateway.next_stamp(now);
            if let Some(change) = self.commit(Patch::set(id, attribute, stamp), now) {
                last = Some(change);
            }
        }
        if let Some(change) = last {
            self.notify_change(&change);
        }
        Ok(())
    }

    fn commit(&mut self, patch: Patch, now: u64) -> Option<SceneChange> {
        match self.gateway.commit(patch, now) {
            Ok(change) => change,
            Err(e) => {
                log::error!("Failed to encode patch: {}", e);
                None
            }
        }
    }

    /// Follow-up for an object that disappeared, locally or remotely.
    fn apply_removal(&mut self, change: &SceneChange) {
        let id = change.object_id();
        self.notify_change(change);
        if let Some(transition) = self.claims.forget(id) {
            self.claim_changed(&transition);
        }
        self.roster.clear_selections_of(id);
        if let Some(selection) = self.selection.object_deleted(id) {
            self.selection_changed(selection);
        }
    }

    /// Drop a selection the merged scene no longer backs.
    fn reconcile_selection(&mut self) {
        if let Some(change) = self.selection.reconcile(self.gateway.document()) {
            self.selection_changed(change);
        }
    }

    fn selection_changed(&mut self, change: SelectionChange) {
        if !change.is_change() {
            return;
        }
        if let SelectionState::ObjectSelected(previous) = change.previous {
            self.end_interaction(previous);
        }
        self.notify(|o| o.selection_changed(&change));
        self.presence.broadcast(&PresenceMessage::Selection {
            participant: self.participant,
            object_id: self.selection.active_object(),
        });
    }

    fn claim_changed(&self, transition: &ClaimTransition) {
        self.notify(|o| o.claim_changed(transition));
    }

    fn roster_changed(&self) {
        let roster = &self.roster;
        self.notify(|o| o.roster_changed(roster));
    }

    fn notify_change(&self, change: &SceneChange) {
        match change {
            SceneChange::Created(object) => self.notify(|o| o.object_created(object)),
            SceneChange::Updated(object) => self.notify(|o| o.object_updated(object)),
            SceneChange::Removed(id) => self.notify(|o| o.object_removed(*id)),
        }
    }

    fn notify(&self, f: impl Fn(&mut dyn SceneObserver)) {
        for observer in &self.observers {
            f(&mut *observer.borrow_mut());
        }
    }
}
