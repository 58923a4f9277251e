//! Text attributes.

use serde::{Deserialize, Serialize};

/// Font family options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FontFamily {
    #[default]
    Helvetica,
    TimesNewRoman,
    ComicSans,
    BrushScript,
}

impl FontFamily {
    /// Get the font family name as shown in the property panel.
    pub fn name(&self) -> &'static str {
        match self {
            FontFamily::Helvetica => "Helvetica",
            FontFamily::TimesNewRoman => "Times New Roman",
            FontFamily::ComicSans => "Comic Sans MS",
            FontFamily::BrushScript => "Brush Script MT",
        }
    }

    /// Get all available font families.
    pub fn all() -> &'static [FontFamily] {
        &[
            FontFamily::Helvetica,
            FontFamily::TimesNewRoman,
            FontFamily::ComicSans,
            FontFamily::BrushScript,
        ]
    }

    /// Look up a family by its panel name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::all()
            .iter()
            .copied()
            .find(|family| family.name().eq_ignore_ascii_case(name))
    }
}

/// Font weight options, keyed by their CSS numeric weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FontWeight {
    #[default]
    Normal,
    Semibold,
    Bold,
}

impl FontWeight {
    pub fn value(&self) -> u16 {
        match self {
            FontWeight::Normal => 400,
            FontWeight::Semibold => 600,
            FontWeight::Bold => 800,
        }
    }

    pub fn all() -> &'static [FontWeight] {
        &[FontWeight::Normal, FontWeight::Semibold, FontWeight::Bold]
    }

    /// Parse `"400"`/`"600"`/`"800"` or the weight's name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(numeric) = raw.parse::<u16>() {
            return Self::all().iter().copied().find(|w| w.value() == numeric);
        }
        match raw.to_ascii_lowercase().as_str() {
            "normal" | "regular" => Some(FontWeight::Normal),
            "semibold" => Some(FontWeight::Semibold),
            "bold" => Some(FontWeight::Bold),
            _ => None,
        }
    }
}

/// Attributes carried only by text objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAttributes {
    pub content: String,
    pub font_family: FontFamily,
    /// Font size in pixels.
    pub font_size: f64,
    pub font_weight: FontWeight,
}

impl TextAttributes {
    pub const DEFAULT_FONT_SIZE: f64 = 36.0;
    pub const DEFAULT_CONTENT: &'static str = "Tap to Type";
}

impl Default for TextAttributes {
    fn default() -> Self {
        Self {
            content: Self::DEFAULT_CONTENT.to_string(),
            font_family: FontFamily::default(),
            font_size: Self::DEFAULT_FONT_SIZE,
            font_weight: FontWeight::default(),
        }
    }
}
