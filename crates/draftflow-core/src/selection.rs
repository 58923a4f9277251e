//! Selection and active-tool state machine.

use crate::document::SceneDocument;
use crate::scene::{Geometry, ObjectId, SceneObject};
use crate::tools::{Palette, ToolKind};

/// What the user is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    Idle,
    /// A creation tool is armed and waits for its gesture.
    ToolArmed(ToolKind),
    ObjectSelected(ObjectId),
}

/// A reported transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionChange {
    pub previous: SelectionState,
    pub current: SelectionState,
}

impl SelectionChange {
    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }
}

/// Result of completing a creation gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct Creation {
    /// `None` for tools that create no scene object.
    pub object: Option<SceneObject>,
    pub change: SelectionChange,
}

/// Owns the selection, the armed tool and the open palette sub-menu.
#[derive(Debug, Clone, Default)]
pub struct SelectionMachine {
    state: SelectionState,
    open_category: Option<&'static str>,
    palette: Palette,
}

impl SelectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// The category whose sub-menu is open, if any.
    pub fn open_menu(&self) -> Option<&'static str> {
        self.open_category
    }

    /// The armed tool, or the select tool when none is armed.
    pub fn active_tool(&self) -> ToolKind {
        match self.state {
            SelectionState::ToolArmed(tool) => tool,
            _ => ToolKind::Select,
        }
    }

    pub fn active_object(&self) -> Option<ObjectId> {
        match self.state {
            SelectionState::ObjectSelected(id) => Some(id),
            _ => None,
        }
    }

    fn transition(&mut self, next: SelectionState) -> SelectionChange {
        let change = SelectionChange {
            previous: self.state,
            current: next,
        };
        self.state = next;
        change
    }

    /// Pick a tool from the palette. The select tool returns to `Idle`.
    pub fn select_tool(&mut self, tool: ToolKind) -> SelectionChange {
        self.open_category = None;
        let next = match tool {
            ToolKind::Select => SelectionState::Idle,
            tool => SelectionState::ToolArmed(tool),
        };
        self.transition(next)
    }

    /// Open a grouped category's sub-menu. The state is unchanged.
    pub fn open_category(&mut self, name: &str) -> bool {
        match self.palette.category(name) {
            Some(category) => {
                self.open_category = Some(category.name);
                true
            }
            None => false,
        }
    }

    /// Choose a variant from the open sub-menu and arm it.
    pub fn choose_variant(&mut self, tool: ToolKind) -> Option<SelectionChange> {
        let category = self.open_category?;
        if !self.palette.choose_variant(category, tool) {
            return None;
        }
        Some(self.select_tool(tool))
    }

    /// Complete the armed tool's gesture over `geometry`.
    ///
    /// Returns `None` unless a tool is armed. A creating tool yields the new
    /// object (not yet added to any document) and selects it; the comment
    /// tool yields no object and returns to `Idle`.
    pub fn complete_creation(&mut self, geometry: Geometry) -> Option<Creation> {
        let SelectionState::ToolArmed(tool) = self.state else {
            return None;
        };
        let object = tool
            .object_kind()
            .map(|kind| SceneObject::create(kind, geometry));
        let next = match &object {
            Some(object) => SelectionState::ObjectSelected(object.id()),
            None => SelectionState::Idle,
        };
        Some(Creation {
            object,
            change: self.transition(next),
        })
    }

    pub fn click_object(&mut self, id: ObjectId) -> SelectionChange {
        self.open_category = None;
        self.transition(SelectionState::ObjectSelected(id))
    }

    pub fn click_empty(&mut self) -> SelectionChange {
        self.open_category = None;
        self.transition(SelectionState::Idle)
    }

    pub fn escape(&mut self) -> SelectionChange {
        self.open_category = None;
        self.transition(SelectionState::Idle)
    }

    /// The object `id` was deleted (locally or remotely).
    pub fn object_deleted(&mut self, id: ObjectId) -> Option<SelectionChange> {
        (self.active_object() == Some(id)).then(|| self.transition(SelectionState::Idle))
    }

    /// Drop a selection whose object no longer exists in `document`.
    pub fn reconcile(&mut self, document: &SceneDocument) -> Option<SelectionChange> {
        let id = self.active_object()?;
        if document.contains(id) {
            return None;
        }
        Some(self.transition(SelectionState::Idle))
    }
}
