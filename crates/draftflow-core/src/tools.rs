//! Tool palette.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scene::ObjectKind;

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// The neutral tool: click to select, drag to move.
    #[default]
    Select,
    Rectangle,
    Ellipse,
    Line,
    Freeform,
    Text,
    Image,
    /// Places a comment pin; creates no scene object.
    Comment,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Select => "select",
            ToolKind::Rectangle => "rectangle",
            ToolKind::Ellipse => "ellipse",
            ToolKind::Line => "line",
            ToolKind::Freeform => "freeform",
            ToolKind::Text => "text",
            ToolKind::Image => "image",
            ToolKind::Comment => "comment",
        }
    }

    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::Select,
            ToolKind::Rectangle,
            ToolKind::Ellipse,
            ToolKind::Line,
            ToolKind::Freeform,
            ToolKind::Text,
            ToolKind::Image,
            ToolKind::Comment,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.name() == name)
    }

    /// The kind of object a completed gesture with this tool creates.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            ToolKind::Rectangle => Some(ObjectKind::Rectangle),
            ToolKind::Ellipse => Some(ObjectKind::Ellipse),
            ToolKind::Line => Some(ObjectKind::Line),
            ToolKind::Freeform => Some(ObjectKind::Freeform),
            ToolKind::Text => Some(ObjectKind::Text),
            ToolKind::Image => Some(ObjectKind::Image),
            ToolKind::Select | ToolKind::Comment => None,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A grouped palette entry that opens a sub-menu of tool variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCategory {
    pub name: &'static str,
    pub variants: Vec<ToolKind>,
    /// Variant shown on the palette button; the last one chosen.
    pub chosen: ToolKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteItem {
    Tool(ToolKind),
    Category(ToolCategory),
}

impl PaletteItem {
    pub fn name(&self) -> &'static str {
        match self {
            PaletteItem::Tool(tool) => tool.name(),
            PaletteItem::Category(category) => category.name,
        }
    }
}

/// Name of the category grouping the shape tools.
pub const SHAPES_CATEGORY: &str = "shapes";

/// The palette's items in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    items: Vec<PaletteItem>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            items: vec![
                PaletteItem::Tool(ToolKind::Select),
                PaletteItem::Category(ToolCategory {
                    name: SHAPES_CATEGORY,
                    variants: vec![
                        ToolKind::Rectangle,
                        ToolKind::Ellipse,
                        ToolKind::Line,
                        ToolKind::Image,
                        ToolKind::Freeform,
                    ],
                    chosen: ToolKind::Rectangle,
                }),
                PaletteItem::Tool(ToolKind::Text),
                PaletteItem::Tool(ToolKind::Comment),
            ],
        }
    }
}

impl Palette {
    pub fn items(&self) -> &[PaletteItem] {
        &self.items
    }

    pub fn category(&self, name: &str) -> Option<&ToolCategory> {
        self.items.iter().find_map(|item| match item {
            PaletteItem::Category(category) if category.name == name => Some(category),
            _ => None,
        })
    }

    /// Remember `tool` as the chosen variant of `category`.
    /// Returns `false` if the category does not offer it.
    pub fn choose_variant(&mut self, category: &str, tool: ToolKind) -> bool {
        for item in &mut self.items {
            if let PaletteItem::Category(c) = item {
                if c.name == category && c.variants.contains(&tool) {
                    c.chosen = tool;
                    return true;
                }
            }
        }
        false
    }

    /// Whether the item called `name` is highlighted while `active` is the
    /// armed tool. A category is active when any of its variants is.
    pub fn is_active(&self, name: &str, active: ToolKind) -> bool {
        self.items
            .iter()
            .filter(|item| item.name() == name)
            .any(|item| match item {
                PaletteItem::Tool(tool) => *tool == active,
                PaletteItem::Category(category) => category.variants.contains(&active),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_kinds() {
        assert_eq!(ToolKind::Rectangle.object_kind(), Some(ObjectKind::Rectangle));
        assert_eq!(ToolKind::Freeform.object_kind(), Some(ObjectKind::Freeform));
        assert_eq!(ToolKind::Select.object_kind(), None);
        assert_eq!(ToolKind::Comment.object_kind(), None);
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in ToolKind::all() {
            assert_eq!(ToolKind::from_name(tool.name()), Some(*tool));
        }
        assert_eq!(ToolKind::from_name("laser"), None);
    }

    #[test]
    fn test_default_palette_layout() {
        let palette = Palette::default();
        let names: Vec<_> = palette.items().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["select", "shapes", "text", "comment"]);
        assert_eq!(palette.category(SHAPES_CATEGORY).unwrap().variants.len(), 5);
    }

    #[test]
    fn test_category_active_through_variant() {
        let palette = Palette::default();
        assert!(palette.is_active("shapes", ToolKind::Ellipse));
        assert!(!palette.is_active("shapes", ToolKind::Text));
        assert!(palette.is_active("text", ToolKind::Text));
        assert!(palette.is_active("select", ToolKind::Select));
    }

    #[test]
    fn test_choose_variant() {
        let mut palette = Palette::default();
        assert!(palette.choose_variant(SHAPES_CATEGORY, ToolKind::Line));
        assert_eq!(palette.category(SHAPES_CATEGORY).unwrap().chosen, ToolKind::Line);
        assert!(!palette.choose_variant(SHAPES_CATEGORY, ToolKind::Text));
        assert!(!palette.choose_variant("arrows", ToolKind::Line));
    }
}
