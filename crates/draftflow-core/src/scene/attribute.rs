//! Patchable properties and their typed values.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::color::SerializableColor;
use super::text::{FontFamily, FontWeight};

/// Every property a patch can target.
///
/// The set is closed; which properties apply to which object kind is
/// decided by [`ObjectKind::supports`](super::ObjectKind::supports).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    X,
    Y,
    Width,
    Height,
    Rotation,
    ZIndex,
    Fill,
    Stroke,
    StrokeWidth,
    FontFamily,
    FontSize,
    FontWeight,
    Text,
}

impl Property {
    pub fn all() -> &'static [Property] {
        &[
            Property::X,
            Property::Y,
            Property::Width,
            Property::Height,
            Property::Rotation,
            Property::ZIndex,
            Property::Fill,
            Property::Stroke,
            Property::StrokeWidth,
            Property::FontFamily,
            Property::FontSize,
            Property::FontWeight,
            Property::Text,
        ]
    }

    /// Stable name, used in store keys and by the property panel.
    pub fn name(&self) -> &'static str {
        match self {
            Property::X => "x",
            Property::Y => "y",
            Property::Width => "width",
            Property::Height => "height",
            Property::Rotation => "rotation",
            Property::ZIndex => "z_index",
            Property::Fill => "fill",
            Property::Stroke => "stroke",
            Property::StrokeWidth => "stroke_width",
            Property::FontFamily => "font_family",
            Property::FontSize => "font_size",
            Property::FontWeight => "font_weight",
            Property::Text => "text",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.name() == name)
    }

    /// Properties whose value is a plain number.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Property::X
                | Property::Y
                | Property::Width
                | Property::Height
                | Property::Rotation
                | Property::ZIndex
                | Property::StrokeWidth
                | Property::FontSize
        )
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Property::Fill | Property::Stroke)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property together with its new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "property", content = "value", rename_all = "snake_case")]
pub enum Attribute {
    X(f64),
    Y(f64),
    Width(f64),
    Height(f64),
    /// Rotation in degrees.
    Rotation(f64),
    ZIndex(i64),
    /// `None` clears the fill.
    Fill(Option<SerializableColor>),
    Stroke(Option<SerializableColor>),
    StrokeWidth(f64),
    FontFamily(FontFamily),
    FontSize(f64),
    FontWeight(FontWeight),
    Text(String),
}

impl Attribute {
    pub fn property(&self) -> Property {
        match self {
            Attribute::X(_) => Property::X,
            Attribute::Y(_) => Property::Y,
            Attribute::Width(_) => Property::Width,
            Attribute::Height(_) => Property::Height,
            Attribute::Rotation(_) => Property::Rotation,
            Attribute::ZIndex(_) => Property::ZIndex,
            Attribute::Fill(_) => Property::Fill,
            Attribute::Stroke(_) => Property::Stroke,
            Attribute::StrokeWidth(_) => Property::StrokeWidth,
            Attribute::FontFamily(_) => Property::FontFamily,
            Attribute::FontSize(_) => Property::FontSize,
            Attribute::FontWeight(_) => Property::FontWeight,
            Attribute::Text(_) => Property::Text,
        }
    }

    /// The numeric payload of geometry and size attributes.
    pub fn number(&self) -> Option<f64> {
        match self {
            Attribute::X(v)
            | Attribute::Y(v)
            | Attribute::Width(v)
            | Attribute::Height(v)
            | Attribute::Rotation(v)
            | Attribute::StrokeWidth(v)
            | Attribute::FontSize(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value the way the property panel shows it.
    pub fn display_value(&self) -> String {
        match self {
            Attribute::X(v)
            | Attribute::Y(v)
            | Attribute::Width(v)
            | Attribute::Height(v)
            | Attribute::Rotation(v)
            | Attribute::StrokeWidth(v)
            | Attribute::FontSize(v) => format_number(*v),
            Attribute::ZIndex(z) => z.to_string(),
            Attribute::Fill(c) | Attribute::Stroke(c) => {
                c.map(|c| c.to_hex()).unwrap_or_default()
            }
            Attribute::FontFamily(f) => f.name().to_string(),
            Attribute::FontWeight(w) => w.value().to_string(),
            Attribute::Text(t) => t.clone(),
        }
    }
}

/// Whole numbers print without a fractional part.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names_roundtrip() {
        for property in Property::all() {
            assert_eq!(Property::from_name(property.name()), Some(*property));
        }
        assert_eq!(Property::from_name("corner_radius"), None);
    }

    #[test]
    fn test_attribute_json_shape() {
        let json = serde_json::to_string(&Attribute::Width(50.0)).unwrap();
        assert_eq!(json, r#"{"property":"width","value":50.0}"#);
        let fill: Attribute = serde_json::from_str(r#"{"property":"fill","value":null}"#).unwrap();
        assert_eq!(fill, Attribute::Fill(None));
    }

    #[test]
    fn test_number_payload() {
        assert_eq!(Attribute::Rotation(90.0).number(), Some(90.0));
        assert_eq!(Attribute::ZIndex(3).number(), None);
        assert_eq!(Attribute::Text("a".to_string()).number(), None);
    }

    #[test]
    fn test_display_value() {
        assert_eq!(Attribute::Width(50.0).display_value(), "50");
        assert_eq!(Attribute::Height(12.5).display_value(), "12.5");
        assert_eq!(Attribute::Fill(None).display_value(), "");
        assert_eq!(Attribute::FontWeight(FontWeight::Bold).display_value(), "800");
    }
}
