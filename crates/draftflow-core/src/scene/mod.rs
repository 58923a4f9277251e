//! Scene object model for the shared canvas.
//!
//! A [`SceneObject`] is plain data. Per-kind data lives in [`ObjectBody`], a
//! tagged union, and the set of patchable properties per kind is closed
//! (see [`ObjectKind::supports`]). Mutation goes through
//! [`SceneObject::apply_patch`], which never touches a property the kind
//! does not have.

mod attribute;
mod color;
mod text;

pub use attribute::{Attribute, Property};
pub use color::SerializableColor;
pub use text::{FontFamily, FontWeight, TextAttributes};

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{SceneError, SceneResult};

/// Unique identifier for scene objects.
///
/// Random v4 UUIDs, so two participants never mint the same id without
/// coordinating.
pub type ObjectId = Uuid;

/// Mint a fresh object id.
pub fn new_object_id() -> ObjectId {
    Uuid::new_v4()
}

/// The kinds of drawable element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Rectangle,
    Ellipse,
    Line,
    Freeform,
    Text,
    Image,
    Group,
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Rectangle => "rectangle",
            ObjectKind::Ellipse => "ellipse",
            ObjectKind::Line => "line",
            ObjectKind::Freeform => "freeform",
            ObjectKind::Text => "text",
            ObjectKind::Image => "image",
            ObjectKind::Group => "group",
        }
    }

    /// Whether objects of this kind carry `property`.
    pub fn supports(&self, property: Property) -> bool {
        match property {
            Property::X
            | Property::Y
            | Property::Width
            | Property::Height
            | Property::Rotation
            | Property::ZIndex => true,
            Property::Fill => matches!(
                self,
                ObjectKind::Rectangle | ObjectKind::Ellipse | ObjectKind::Text
            ),
            Property::Stroke | Property::StrokeWidth => !matches!(self, ObjectKind::Group),
            Property::FontFamily | Property::FontSize | Property::FontWeight | Property::Text => {
                matches!(self, ObjectKind::Text)
            }
        }
    }

    /// All properties carried by this kind, in [`Property::all`] order.
    pub fn properties(&self) -> impl Iterator<Item = Property> + '_ {
        Property::all().iter().copied().filter(|p| self.supports(*p))
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position, size and rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Top-left corner.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees around the center.
    #[serde(default)]
    pub rotation: f64,
}

impl Geometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            position: Point::new(x, y),
            width,
            height,
            rotation: 0.0,
        }
    }

    /// Geometry spanning two corner points of a creation gesture.
    pub fn from_corners(p1: Point, p2: Point) -> Self {
        let min_x = p1.x.min(p2.x);
        let min_y = p1.y.min(p2.y);
        Self::new(min_x, min_y, (p2.x - p1.x).abs(), (p2.y - p1.y).abs())
    }

    /// Bounding box of a point list (used for freeform paths).
    pub fn bounding(points: &[Point]) -> Self {
        let Some(first) = points.first() else {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        };
        let rect = points
            .iter()
            .fold(Rect::from_points(*first, *first), |r, p| {
                r.union_pt(*p)
            });
        Self::new(rect.x0, rect.y0, rect.width(), rect.height())
    }

    pub fn as_rect(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.width,
            self.position.y + self.height,
        )
    }
}

/// Style properties. Every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeStyle {
    pub fill_color: Option<SerializableColor>,
    pub stroke_color: Option<SerializableColor>,
    pub stroke_width: Option<f64>,
}

impl ShapeStyle {
    /// Default stroke width for lines and paths.
    pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

    /// Kind-appropriate default style for newly created objects.
    pub fn defaults_for(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Rectangle | ObjectKind::Ellipse | ObjectKind::Text => Self {
                fill_color: Some(SerializableColor::accent()),
                ..Self::default()
            },
            ObjectKind::Line | ObjectKind::Freeform => Self {
                fill_color: None,
                stroke_color: Some(SerializableColor::accent()),
                stroke_width: Some(Self::DEFAULT_STROKE_WIDTH),
            },
            ObjectKind::Image | ObjectKind::Group => Self::default(),
        }
    }
}

/// Per-kind payload. Fields here other than text attributes are fixed at
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectBody {
    Rectangle,
    Ellipse,
    Line,
    Freeform { points: Vec<Point> },
    Text(TextAttributes),
    /// Opaque reference to uploaded image data.
    Image { source: String },
    Group { children: Vec<ObjectId> },
}

impl ObjectBody {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectBody::Rectangle => ObjectKind::Rectangle,
            ObjectBody::Ellipse => ObjectKind::Ellipse,
            ObjectBody::Line => ObjectKind::Line,
            ObjectBody::Freeform { .. } => ObjectKind::Freeform,
            ObjectBody::Text(_) => ObjectKind::Text,
            ObjectBody::Image { .. } => ObjectKind::Image,
            ObjectBody::Group { .. } => ObjectKind::Group,
        }
    }

    fn default_for(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Rectangle => ObjectBody::Rectangle,
            ObjectKind::Ellipse => ObjectBody::Ellipse,
            ObjectKind::Line => ObjectBody::Line,
            ObjectKind::Freeform => ObjectBody::Freeform { points: Vec::new() },
            ObjectKind::Text => ObjectBody::Text(TextAttributes::default()),
            ObjectKind::Image => ObjectBody::Image {
                source: String::new(),
            },
            ObjectKind::Group => ObjectBody::Group {
                children: Vec::new(),
            },
        }
    }
}

/// A single drawable element on the shared canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    id: ObjectId,
    pub geometry: Geometry,
    pub style: ShapeStyle,
    /// Paint order; higher is drawn later and hit first.
    #[serde(default)]
    pub z_index: i64,
    pub body: ObjectBody,
}

impl SceneObject {
    /// Create a new object with a fresh id and the kind's defaults.
    pub fn create(kind: ObjectKind, geometry: Geometry) -> Self {
        Self::with_id(new_object_id(), kind, geometry)
    }

    /// Create an object with a known id (for decoding and tests).
    pub fn with_id(id: ObjectId, kind: ObjectKind, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            style: ShapeStyle::defaults_for(kind),
            z_index: 0,
            body: ObjectBody::default_for(kind),
        }
    }

    /// Create an image object referencing already uploaded data.
    pub fn create_image(geometry: Geometry, source: impl Into<String>) -> Self {
        let mut object = Self::create(ObjectKind::Image, geometry);
        object.body = ObjectBody::Image {
            source: source.into(),
        };
        object
    }

    /// Create a freeform path; geometry is the points' bounding box.
    pub fn create_freeform(points: Vec<Point>) -> Self {
        let mut object = Self::create(ObjectKind::Freeform, Geometry::bounding(&points));
        object.body = ObjectBody::Freeform { points };
        object
    }

    /// Create a group over existing objects.
    pub fn create_group(geometry: Geometry, children: Vec<ObjectId>) -> Self {
        let mut object = Self::create(ObjectKind::Group, geometry);
        object.body = ObjectBody::Group { children };
        object
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }

    pub fn text(&self) -> Option<&TextAttributes> {
        match &self.body {
            ObjectBody::Text(text) => Some(text),
            _ => None,
        }
    }

    fn text_mut(&mut self) -> Option<&mut TextAttributes> {
        match &mut self.body {
            ObjectBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Current value of `property`, or `None` if the kind lacks it.
    pub fn attribute(&self, property: Property) -> Option<Attribute> {
        if !self.kind().supports(property) {
            return None;
        }
        let g = &self.geometry;
        let attribute = match property {
            Property::X => Attribute::X(g.position.x),
            Property::Y => Attribute::Y(g.position.y),
            Property::Width => Attribute::Width(g.width),
            Property::Height => Attribute::Height(g.height),
            Property::Rotation => Attribute::Rotation(g.rotation),
            Property::ZIndex => Attribute::ZIndex(self.z_index),
            Property::Fill => Attribute::Fill(self.style.fill_color),
            Property::Stroke => Attribute::Stroke(self.style.stroke_color),
            Property::StrokeWidth => Attribute::StrokeWidth(self.style.stroke_width.unwrap_or(0.0)),
            Property::FontFamily => Attribute::FontFamily(self.text()?.font_family),
            Property::FontSize => Attribute::FontSize(self.text()?.font_size),
            Property::FontWeight => Attribute::FontWeight(self.text()?.font_weight),
            Property::Text => Attribute::Text(self.text()?.content.clone()),
        };
        Some(attribute)
    }

    /// Every attribute this object carries.
    pub fn attributes(&self) -> Vec<Attribute> {
        self.kind()
            .properties()
            .filter_map(|p| self.attribute(p))
            .collect()
    }

    /// Return a copy with `attribute` applied.
    ///
    /// Fails with [`SceneError::InvalidPatch`] if the kind does not carry the
    /// property; `self` is never modified.
    pub fn apply_patch(&self, attribute: &Attribute) -> SceneResult<SceneObject> {
        let mut next = self.clone();
        next.apply_in_place(attribute)?;
        Ok(next)
    }

    /// Apply `attribute` in place. On error the object is unchanged.
    ///
    /// Non-finite numbers are rejected: they do not survive JSON encoding.
    pub fn apply_in_place(&mut self, attribute: &Attribute) -> SceneResult<()> {
        let kind = self.kind();
        let property = attribute.property();
        let invalid = || SceneError::InvalidPatch { kind, property };
        if !kind.supports(property) {
            return Err(invalid());
        }
        if let Some(v) = attribute.number().filter(|v| !v.is_finite()) {
            return Err(SceneError::InvalidAttributeValue {
                property,
                value: v.to_string(),
                reason: "not a finite number".to_string(),
            });
        }
        match attribute {
            Attribute::X(x) => self.geometry.position.x = *x,
            Attribute::Y(y) => self.geometry.position.y = *y,
            Attribute::Width(w) => self.geometry.width = *w,
            Attribute::Height(h) => self.geometry.height = *h,
            Attribute::Rotation(r) => self.geometry.rotation = *r,
            Attribute::ZIndex(z) => self.z_index = *z,
            Attribute::Fill(c) => self.style.fill_color = *c,
            Attribute::Stroke(c) => self.style.stroke_color = *c,
            Attribute::StrokeWidth(w) => self.style.stroke_width = Some(*w),
            Attribute::FontFamily(f) => self.text_mut().ok_or_else(invalid)?.font_family = *f,
            Attribute::FontSize(s) => self.text_mut().ok_or_else(invalid)?.font_size = *s,
            Attribute::FontWeight(w) => self.text_mut().ok_or_else(invalid)?.font_weight = *w,
            Attribute::Text(t) => self.text_mut().ok_or_else(invalid)?.content = t.clone(),
        }
        Ok(())
    }
}
