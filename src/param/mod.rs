//! Reflected parameter system.
//!
//! The original reflects parameter access through a runtime property
//! system (GObject properties). This models each parameter set instead
//! as a struct with a static metadata table and a tagged `ParamValue`
//! enum that `interpolate_linear` dispatches on.

pub mod dejong;
pub mod image;

use crate::error::FyreError;

/// A parameter's value, tagged by its declared type.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Double(f64),
    Uint(u32),
    Ulong(u64),
    Bool(bool),
    /// An enum-typed value, stored by variant name.
    Enum(String),
    Str(String),
    Color(ColorRgba),
}

/// 16-bit-per-channel RGBA, matching the original's separate alpha
/// channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ColorRgba {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub a: u16,
}

impl ColorRgba {
    pub const fn new(r: u16, g: u16, b: u16, a: u16) -> ColorRgba {
        ColorRgba { r, g, b, a }
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA` (8-bit-per-channel hex, scaled to
    /// 16 bits), the textual form used by `save_string`/`load_string`.
    pub fn parse(s: &str) -> Option<ColorRgba> {
        let s = s.strip_prefix('#').unwrap_or(s);
        let bytes: Vec<u8> = (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        let scale = |b: u8| (b as u16) * 257; // 0..=255 -> 0..=65535
        match bytes.as_slice() {
            [r, g, b] => Some(ColorRgba::new(scale(*r), scale(*g), scale(*b), 65535)),
            [r, g, b, a] => Some(ColorRgba::new(scale(*r), scale(*g), scale(*b), scale(*a))),
            _ => None,
        }
    }

    pub fn to_hex_string(self) -> String {
        let unscale = |v: u16| (v / 257) as u8;
        format!(
            "#{:02X}{:02X}{:02X}{:02X}",
            unscale(self.r),
            unscale(self.g),
            unscale(self.b),
            unscale(self.a)
        )
    }
}

/// The declared type of a parameter, independent of its current value.
#[derive(Copy, Clone, Debug)]
pub enum ParamKind {
    Double,
    Uint,
    Ulong,
    Bool,
    Enum(&'static [&'static str]),
    Str,
    Color,
}

/// Static metadata for one parameter.
#[derive(Copy, Clone, Debug)]
pub struct ParamMeta {
    pub name: &'static str,
    pub kind: ParamKind,
    pub serialized: bool,
    pub interpolate: bool,
    pub gui_visible: bool,
    pub group: Option<&'static str>,
    pub step: Option<f64>,
    pub page: Option<f64>,
    pub digits: Option<u32>,
    /// Name of a boolean parameter this one is only meaningful under.
    pub dependency: Option<&'static str>,
}

/// Implemented by concrete parameter sets (`DeJongParams`, `ImageParams`).
///
/// Reflection is done by hand (a `match` over `name`) rather than via a
/// derive macro, but every caller goes through this trait, so the
/// `set`/`save_string`/`load_string`/`interpolate_linear` logic below is
/// written once and shared.
pub trait ParamHolder: Sized {
    fn metadata() -> &'static [ParamMeta];
    fn get(&self, name: &str) -> Option<ParamValue>;
    /// Returns `true` if setting `name` to `value` materially changed it
    /// (beyond the per-kind epsilon), which callers use to raise
    /// `calc_dirty`.
    fn set_raw(&mut self, name: &str, value: ParamValue) -> Result<bool, FyreError>;
    fn default_value(name: &str) -> Option<ParamValue>;

    fn meta(name: &str) -> Option<&'static ParamMeta> {
        Self::metadata().iter().find(|m| m.name == name)
    }

    /// Parses `string_value` according to the parameter's declared type
    /// and applies it. Returns whether the value materially changed.
    fn set(&mut self, name: &str, string_value: &str) -> Result<bool, FyreError> {
        let meta = Self::meta(name).ok_or_else(|| FyreError::UnknownProperty { name: name.into() })?;
        let value = parse_value(meta, string_value)
            .ok_or_else(|| FyreError::BadValue { name: name.into(), value: string_value.into() })?;
        self.set_raw(name, value)
    }

    /// Splits `"name = value"` at the first `=` and calls [`Self::set`].
    fn set_from_line(&mut self, line: &str) -> Result<bool, FyreError> {
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| FyreError::BadValue { name: line.into(), value: String::new() })?;
        self.set(name.trim(), value.trim())
    }

    fn reset_to_defaults(&mut self) {
        for meta in Self::metadata() {
            if let Some(default) = Self::default_value(meta.name) {
                let _ = self.set_raw(meta.name, default);
            }
        }
    }

    /// Returns `name = value` lines for every `serialized` parameter
    /// whose current value differs from its default.
    fn save_string(&self) -> String {
        let mut out = String::new();
        for meta in Self::metadata() {
            if !meta.serialized {
                continue;
            }
            let current = self.get(meta.name).expect("metadata name must be gettable");
            let default = Self::default_value(meta.name);
            if Some(&current) != default.as_ref() {
                out.push_str(meta.name);
                out.push_str(" = ");
                out.push_str(&format_value(&current));
                out.push('\n');
            }
        }
        out
    }

    /// Applies every `name = value` line in `text`; any `serialized`
    /// parameter not mentioned is reset to its default.
    fn load_string(&mut self, text: &str) -> Result<(), FyreError> {
        let mut mentioned = std::collections::HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, _)) = line.split_once('=') {
                mentioned.insert(name.trim().to_string());
            }
            match self.set_from_line(line) {
                Ok(_) => {}
                Err(FyreError::UnknownProperty { name }) => {
                    tracing::warn!(name, "ignoring unknown property while loading parameters");
                }
                Err(FyreError::BadValue { name, value }) => {
                    tracing::warn!(name, value, "ignoring bad value while loading parameters");
                }
                Err(e) => return Err(e),
            }
        }
        for meta in Self::metadata() {
            if meta.serialized && !mentioned.contains(meta.name) {
                if let Some(default) = Self::default_value(meta.name) {
                    let _ = self.set_raw(meta.name, default);
                }
            }
        }
        Ok(())
    }

    /// For every `interpolate`-flagged parameter, writes
    /// `(1-alpha)*a + alpha*b` into `self`.
    fn interpolate_linear(&mut self, alpha: f64, a: &Self, b: &Self) {
        for meta in Self::metadata() {
            if !meta.interpolate {
                continue;
            }
            let va = a.get(meta.name).expect("metadata name must be gettable");
            let vb = b.get(meta.name).expect("metadata name must be gettable");
            match interpolate_value(alpha, &va, &vb) {
                Some(v) => {
                    let _ = self.set_raw(meta.name, v);
                }
                None => {
                    tracing::warn!(name = meta.name, "skipping interpolation of unsupported type");
                }
            }
        }
    }
}

fn parse_value(meta: &ParamMeta, s: &str) -> Option<ParamValue> {
    match meta.kind {
        ParamKind::Double => s.parse::<f64>().ok().map(ParamValue::Double),
        ParamKind::Uint => s.parse::<u32>().ok().map(ParamValue::Uint),
        ParamKind::Ulong => s.parse::<u64>().ok().map(ParamValue::Ulong),
        ParamKind::Bool => match s {
            "true" | "1" => Some(ParamValue::Bool(true)),
            "false" | "0" => Some(ParamValue::Bool(false)),
            _ => None,
        },
        ParamKind::Enum(variants) => {
            variants.iter().find(|&&v| v == s).map(|&v| ParamValue::Enum(v.to_string()))
        }
        ParamKind::Str => Some(ParamValue::Str(s.to_string())),
        ParamKind::Color => ColorRgba::parse(s).map(ParamValue::Color),
    }
}

fn format_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Double(d) => format!("{d}"),
        ParamValue::Uint(u) => format!("{u}"),
        ParamValue::Ulong(u) => format!("{u}"),
        ParamValue::Bool(b) => format!("{b}"),
        ParamValue::Enum(e) => e.clone(),
        ParamValue::Str(s) => s.clone(),
        ParamValue::Color(c) => c.to_hex_string(),
    }
}

/// `(1-alpha)*a + alpha*b`, dispatched by the value's runtime variant.
/// Booleans/enums switch at `alpha = 0.5`. Returns `None` for
/// unsupported combinations (kind mismatch), which callers log and
/// skip.
fn interpolate_value(alpha: f64, a: &ParamValue, b: &ParamValue) -> Option<ParamValue> {
    match (a, b) {
        (ParamValue::Double(a), ParamValue::Double(b)) => {
            Some(ParamValue::Double((1.0 - alpha) * a + alpha * b))
        }
        (ParamValue::Uint(a), ParamValue::Uint(b)) => {
            let v = (1.0 - alpha) * (*a as f64) + alpha * (*b as f64);
            Some(ParamValue::Uint(v.round() as u32))
        }
        (ParamValue::Ulong(a), ParamValue::Ulong(b)) => {
            let v = (1.0 - alpha) * (*a as f64) + alpha * (*b as f64);
            Some(ParamValue::Ulong(v.round() as u64))
        }
        (ParamValue::Bool(a), ParamValue::Bool(b)) => {
            Some(ParamValue::Bool(if alpha < 0.5 { *a } else { *b }))
        }
        (ParamValue::Enum(a), ParamValue::Enum(b)) => {
            Some(ParamValue::Enum(if alpha < 0.5 { a.clone() } else { b.clone() }))
        }
        (ParamValue::Color(a), ParamValue::Color(b)) => {
            let lerp = |x: u16, y: u16| {
                ((1.0 - alpha) * x as f64 + alpha * y as f64).round().clamp(0.0, 65535.0) as u16
            };
            Some(ParamValue::Color(ColorRgba::new(
                lerp(a.r, b.r),
                lerp(a.g, b.g),
                lerp(a.b, b.b),
                lerp(a.a, b.a),
            )))
        }
        _ => None,
    }
}

/// Per-kind epsilon below which a change is not "material" enough to
/// trigger a change notification.
pub fn epsilon_for(value: &ParamValue) -> f64 {
    match value {
        ParamValue::Double(_) => 1e-5,
        ParamValue::Uint(_) | ParamValue::Ulong(_) => 1e-3,
        _ => 0.0,
    }
}

pub fn materially_changed(old: &ParamValue, new: &ParamValue) -> bool {
    match (old, new) {
        (ParamValue::Double(a), ParamValue::Double(b)) => (a - b).abs() > epsilon_for(old),
        (ParamValue::Uint(a), ParamValue::Uint(b)) => {
            (*a as f64 - *b as f64).abs() > epsilon_for(old)
        }
        (ParamValue::Ulong(a), ParamValue::Ulong(b)) => {
            (*a as f64 - *b as f64).abs() > epsilon_for(old)
        }
        _ => old != new,
    }
}
