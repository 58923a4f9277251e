//! Turns raw property-panel input into validated attribute patches.

use crate::config::SyncConfig;
use crate::error::{SceneError, SceneResult};
use crate::scene::{Attribute, FontFamily, FontWeight, Property, SceneObject, SerializableColor};
use crate::sync::{Patch, Stamp};

/// Minimum font size accepted from the panel.
pub const MIN_FONT_SIZE: f64 = 1.0;

/// Parses and validates attribute edits.
#[derive(Debug, Clone)]
pub struct AttributeEditor {
    min_dimension: f64,
}

impl AttributeEditor {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            min_dimension: config.min_dimension,
        }
    }

    /// Parse a raw panel value for `property`, clamping where the property
    /// has a floor.
    pub fn parse_value(&self, property: Property, raw: &str) -> SceneResult<Attribute> {
        let attribute = match property {
            Property::X => Attribute::X(parse_number(property, raw)?),
            Property::Y => Attribute::Y(parse_number(property, raw)?),
            Property::Width => {
                Attribute::Width(parse_number(property, raw)?.max(self.min_dimension))
            }
            Property::Height => {
                Attribute::Height(parse_number(property, raw)?.max(self.min_dimension))
            }
            Property::Rotation => Attribute::Rotation(parse_number(property, raw)?),
            Property::ZIndex => Attribute::ZIndex(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|e| invalid(property, raw, e.to_string()))?,
            ),
            Property::Fill => Attribute::Fill(parse_color(property, raw)?),
            Property::Stroke => Attribute::Stroke(parse_color(property, raw)?),
            Property::StrokeWidth => Attribute::StrokeWidth(parse_number(property, raw)?.max(0.0)),
            Property::FontSize => Attribute::FontSize(parse_number(property, raw)?.max(MIN_FONT_SIZE)),
            Property::FontFamily => Attribute::FontFamily(
                FontFamily::from_name(raw).ok_or_else(|| invalid(property, raw, "unknown font family"))?,
            ),
            Property::FontWeight => Attribute::FontWeight(
                FontWeight::parse(raw).ok_or_else(|| invalid(property, raw, "unknown font weight"))?,
            ),
            Property::Text => Attribute::Text(raw.to_string()),
        };
        Ok(attribute)
    }

    /// Build the patch for one property edit of `object`.
    ///
    /// Fails with `InvalidPatch` if the kind lacks the property (checked
    /// before the value is parsed) or `InvalidAttributeValue` if the value is
    /// malformed. `object` is not modified.
    pub fn edit_attribute(
        &self,
        object: &SceneObject,
        property: Property,
        raw: &str,
        stamp: Stamp,
    ) -> SceneResult<Patch> {
        let kind = object.kind();
        if !kind.supports(property) {
            return Err(SceneError::InvalidPatch { kind, property });
        }
        let attribute = self.parse_value(property, raw)?;
        Ok(Patch::set(object.id(), attribute, stamp))
    }

    /// The values shown in the property panel for `object`.
    pub fn element_attributes(&self, object: &SceneObject) -> ElementAttributes {
        let show = |property| {
            object
                .attribute(property)
                .map(|attribute| attribute.display_value())
        };
        ElementAttributes {
            width: show(Property::Width).unwrap_or_default(),
            height: show(Property::Height).unwrap_or_default(),
            font_size: show(Property::FontSize),
            font_family: show(Property::FontFamily),
            font_weight: show(Property::FontWeight),
            fill: show(Property::Fill),
            stroke: show(Property::Stroke),
        }
    }
}

/// Panel strings for the selected object. `None` means the kind has no such
/// property and the panel hides the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementAttributes {
    pub width: String,
    pub height: String,
    pub font_size: Option<String>,
    pub font_family: Option<String>,
    pub font_weight: Option<String>,
    pub fill: Option<String>,
    pub stroke: Option<String>,
}

fn invalid(property: Property, raw: &str, reason: impl Into<String>) -> SceneError {
    SceneError::InvalidAttributeValue {
        property,
        value: raw.to_string(),
        reason: reason.into(),
    }
}

fn parse_number(property: Property, raw: &str) -> SceneResult<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(property, raw, "not a number"))?;
    if !value.is_finite() {
        return Err(invalid(property, raw, "not a finite number"));
    }
    Ok(value)
}

/// `none`, `transparent` and the empty string clear the color.
fn parse_color(property: Property, raw: &str) -> SceneResult<Option<SerializableColor>> {
    let token = raw.trim();
    if token.is_empty() || token.eq_ignore_ascii_case("none") || token.eq_ignore_ascii_case("transparent") {
        return Ok(None);
    }
    SerializableColor::parse(token)
        .map(Some)
        .ok_or_else(|| invalid(property, raw, "not a color"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, ObjectKind};
    use crate::sync::{ParticipantId, PatchOp};

    fn editor() -> AttributeEditor {
        AttributeEditor::new(&SyncConfig::default())
    }

    fn stamp() -> Stamp {
        Stamp::new(1, ParticipantId(1))
    }

    fn object(kind: ObjectKind) -> SceneObject {
        SceneObject::create(kind, Geometry::new(0.0, 0.0, 100.0, 50.0))
    }

    fn attribute_of(patch: Patch) -> Attribute {
        match patch.op {
            PatchOp::Set { attribute } => attribute,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_numeric_parsing_and_clamps() {
        let editor = editor();
        assert_eq!(editor.parse_value(Property::X, " 12.5 ").unwrap(), Attribute::X(12.5));
        assert_eq!(editor.parse_value(Property::Width, "0").unwrap(), Attribute::Width(0.01));
        assert_eq!(editor.parse_value(Property::Height, "-4").unwrap(), Attribute::Height(0.01));
        assert_eq!(
            editor.parse_value(Property::StrokeWidth, "-1").unwrap(),
            Attribute::StrokeWidth(0.0)
        );
        assert_eq!(editor.parse_value(Property::FontSize, "0.2").unwrap(), Attribute::FontSize(1.0));
        assert_eq!(editor.parse_value(Property::ZIndex, "7").unwrap(), Attribute::ZIndex(7));
    }

    #[test]
    fn test_rejects_non_finite_and_garbage() {
        let editor = editor();
        for raw in ["abc", "", "NaN", "inf", "-infinity"] {
            assert!(matches!(
                editor.parse_value(Property::Width, raw),
                Err(SceneError::InvalidAttributeValue { .. })
            ));
        }
        assert!(editor.parse_value(Property::ZIndex, "1.5").is_err());
    }

    #[test]
    fn test_color_tokens() {
        let editor = editor();
        assert_eq!(
            editor.parse_value(Property::Fill, "#ff0000").unwrap(),
            Attribute::Fill(Some(SerializableColor::rgb(255, 0, 0)))
        );
        assert_eq!(editor.parse_value(Property::Stroke, "none").unwrap(), Attribute::Stroke(None));
        assert_eq!(editor.parse_value(Property::Fill, "Transparent").unwrap(), Attribute::Fill(None));
        assert!(editor.parse_value(Property::Fill, "#12345").is_err());
        assert!(editor.parse_value(Property::Fill, "url(#x)").is_err());
    }

    #[test]
    fn test_font_values() {
        let editor = editor();
        assert_eq!(
            editor.parse_value(Property::FontFamily, "comic sans ms").unwrap(),
            Attribute::FontFamily(FontFamily::ComicSans)
        );
        assert_eq!(
            editor.parse_value(Property::FontWeight, "800").unwrap(),
            Attribute::FontWeight(FontWeight::Bold)
        );
        assert!(editor.parse_value(Property::FontWeight, "500").is_err());
        assert!(editor.parse_value(Property::FontFamily, "Papyrus").is_err());
    }

    #[test]
    fn test_edit_attribute_builds_patch() {
        let rect = object(ObjectKind::Rectangle);
        let patch = editor()
            .edit_attribute(&rect, Property::Fill, "#00ff00", stamp())
            .unwrap();
        assert_eq!(patch.object_id, rect.id());
        assert_eq!(patch.stamp, stamp());
        assert_eq!(
            attribute_of(patch),
            Attribute::Fill(Some(SerializableColor::rgb(0, 255, 0)))
        );
    }

    #[test]
    fn test_edit_attribute_invalid_for_kind() {
        let line = object(ObjectKind::Line);
        let result = editor().edit_attribute(&line, Property::Fill, "not even a color", stamp());
        assert_eq!(
            result.unwrap_err(),
            SceneError::InvalidPatch {
                kind: ObjectKind::Line,
                property: Property::Fill
            }
        );
    }

    #[test]
    fn test_element_attributes() {
        let editor = editor();
        let text = object(ObjectKind::Text);
        let view = editor.element_attributes(&text);
        assert_eq!(view.width, "100");
        assert_eq!(view.height, "50");
        assert_eq!(view.font_size.as_deref(), Some("36"));
        assert_eq!(view.font_family.as_deref(), Some("Helvetica"));
        assert_eq!(view.font_weight.as_deref(), Some("400"));
        assert_eq!(view.fill.as_deref(), Some("#aabbcc"));

        let group = object(ObjectKind::Group);
        let view = editor.element_attributes(&group);
        assert_eq!(view.fill, None);
        assert_eq!(view.font_size, None);
    }
}
