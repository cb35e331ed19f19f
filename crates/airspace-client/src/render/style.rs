// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Data-driven layer styling.
//!
//! A layer's paint is made of [`Expression`]s evaluated against each
//! feature's properties, so restyling on a status or violation change only
//! needs new source data, never a new layer.

use serde_json::Value;

use super::geojson::Properties;

/// RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    #[must_use]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::from_rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Palette shared by all layers.
pub mod palette {
    use super::Color;

    pub const DANGER: Color = Color::from_rgb(0xFF, 0x5F, 0x57);
    pub const SUCCESS: Color = Color::from_rgb(0x28, 0xA7, 0x45);
    pub const WARNING: Color = Color::from_rgb(0xFF, 0xC1, 0x07);
    pub const PRIMARY: Color = Color::from_rgb(0x00, 0x56, 0xC7);
    pub const BLACK: Color = Color::from_rgb(0x00, 0x00, 0x00);
    pub const WHITE: Color = Color::from_rgb(0xFF, 0xFF, 0xFF);
}

/// Line dash pattern in units of line width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dash {
    pub on: f32,
    pub off: f32,
}

impl Dash {
    pub const SOLID: Dash = Dash { on: 1.0, off: 0.0 };
    pub const DASHED: Dash = Dash { on: 2.0, off: 1.0 };

    #[must_use]
    pub fn is_solid(&self) -> bool {
        self.off <= 0.0
    }
}

/// Conversion from a feature property value.
pub trait PropertyValue: Sized {
    fn from_property(value: &Value) -> Option<Self>;
}

impl PropertyValue for f64 {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl PropertyValue for String {
    fn from_property(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl PropertyValue for Color {
    fn from_property(value: &Value) -> Option<Self> {
        value.as_str().and_then(Color::from_hex)
    }
}

impl PropertyValue for Dash {
    #[allow(clippy::cast_possible_truncation, reason = "dash lengths are small")]
    fn from_property(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [on, off] => Some(Dash {
                on: on.as_f64()? as f32,
                off: off.as_f64()? as f32,
            }),
            _ => None,
        }
    }
}

/// Style expression evaluated per feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression<T> {
    /// Constant value.
    Literal(T),
    /// Property value, or `default` when missing or of the wrong type.
    Get { property: String, default: T },
    /// Compare a string property against each arm; `fallback` when none match.
    Match {
        property: String,
        arms: Vec<(String, T)>,
        fallback: T,
    },
    /// Pick by a boolean property (missing counts as false).
    Case {
        property: String,
        when_true: T,
        when_false: T,
    },
}

impl<T: Clone + PropertyValue> Expression<T> {
    /// Evaluate against a feature's properties.
    #[must_use]
    pub fn evaluate(&self, properties: &Properties) -> T {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Get { property, default } => properties
                .get(property)
                .and_then(T::from_property)
                .unwrap_or_else(|| default.clone()),
            Self::Match {
                property,
                arms,
                fallback,
            } => {
                let key = properties.get(property).and_then(Value::as_str);
                arms.iter()
                    .find(|(label, _)| Some(label.as_str()) == key)
                    .map_or_else(|| fallback.clone(), |(_, value)| value.clone())
            }
            Self::Case {
                property,
                when_true,
                when_false,
            } => {
                let flag = properties
                    .get(property)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if flag {
                    when_true.clone()
                } else {
                    when_false.clone()
                }
            }
        }
    }
}

/// Polygon fill paint.
#[derive(Debug, Clone, PartialEq)]
pub struct FillPaint {
    pub color: Expression<Color>,
    pub opacity: f32,
}

/// Line paint.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePaint {
    pub color: Expression<Color>,
    pub width: f32,
    pub dash: Expression<Dash>,
}

/// Icon plus text label paint.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolPaint {
    pub icon: String,
    pub icon_size: f32,
    pub icon_color: Expression<Color>,
    pub icon_rotation: Expression<f64>,
    pub allow_overlap: bool,
    pub label: Expression<String>,
    pub label_offset: f32,
    pub text_size: f32,
    pub text_color: Color,
    pub halo_color: Color,
    pub halo_width: f32,
}

/// Fill style resolved for one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillStyle {
    pub color: Color,
    pub opacity: f32,
}

/// Line style resolved for one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineStyle {
    pub color: Color,
    pub width: f32,
    pub dash: Dash,
}

/// Symbol style resolved for one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolStyle {
    pub icon_color: Color,
    pub icon_size: f32,
    pub rotation_degrees: f64,
    pub label: String,
}

impl FillPaint {
    #[must_use]
    pub fn resolve(&self, properties: &Properties) -> FillStyle {
        FillStyle {
            color: self.color.evaluate(properties),
            opacity: self.opacity,
        }
    }
}

impl LinePaint {
    #[must_use]
    pub fn resolve(&self, properties: &Properties) -> LineStyle {
        LineStyle {
            color: self.color.evaluate(properties),
            width: self.width,
            dash: self.dash.evaluate(properties),
        }
    }
}

impl SymbolPaint {
    #[must_use]
    pub fn resolve(&self, properties: &Properties) -> SymbolStyle {
        SymbolStyle {
            icon_color: self.icon_color.evaluate(properties),
            icon_size: self.icon_size,
            rotation_degrees: self.icon_rotation.evaluate(properties),
            label: self.label.evaluate(properties),
        }
    }
}
