//! Image/render parameters. Defaults grounded on
//! `original_source/src/histogram-imager.c`'s `g_param_spec_*`
//! installation.

use crate::error::FyreError;
use crate::param::{ColorRgba, ParamHolder, ParamKind, ParamMeta, ParamValue};

#[derive(Clone, Debug, PartialEq)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub oversample: u32,
    pub exposure: f64,
    pub gamma: f64,
    pub oversample_gamma: f64,
    pub fgcolor: ColorRgba,
    pub bgcolor: ColorRgba,
    pub clamped: bool,
}

impl Default for ImageParams {
    fn default() -> ImageParams {
        ImageParams {
            width: 600,
            height: 600,
            oversample: 1,
            exposure: 0.05,
            gamma: 1.0,
            oversample_gamma: 1.66,
            fgcolor: ColorRgba::new(0, 0, 0, 65535),
            bgcolor: ColorRgba::new(65535, 65535, 65535, 65535),
            clamped: false,
        }
    }
}

macro_rules! meta {
    ($name:literal, $kind:expr, $interp:expr) => {
        ParamMeta {
            name: $name,
            kind: $kind,
            serialized: true,
            interpolate: $interp,
            gui_visible: true,
            group: Some("rendering"),
            step: None,
            page: None,
            digits: None,
            dependency: None,
        }
    };
}

static METADATA: &[ParamMeta] = &[
    meta!("width", ParamKind::Uint, false),
    meta!("height", ParamKind::Uint, false),
    meta!("oversample", ParamKind::Uint, false),
    meta!("exposure", ParamKind::Double, true),
    meta!("gamma", ParamKind::Double, true),
    meta!("oversample_gamma", ParamKind::Double, true),
    meta!("fgcolor", ParamKind::Color, true),
    meta!("bgcolor", ParamKind::Color, true),
    meta!("clamped", ParamKind::Bool, true),
];

impl ParamHolder for ImageParams {
    fn metadata() -> &'static [ParamMeta] {
        METADATA
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        Some(match name {
            "width" => ParamValue::Uint(self.width),
            "height" => ParamValue::Uint(self.height),
            "oversample" => ParamValue::Uint(self.oversample),
            "exposure" => ParamValue::Double(self.exposure),
            "gamma" => ParamValue::Double(self.gamma),
            "oversample_gamma" => ParamValue::Double(self.oversample_gamma),
            "fgcolor" => ParamValue::Color(self.fgcolor),
            "bgcolor" => ParamValue::Color(self.bgcolor),
            "clamped" => ParamValue::Bool(self.clamped),
            _ => return None,
        })
    }

    fn set_raw(&mut self, name: &str, value: ParamValue) -> Result<bool, FyreError> {
        let bad = || FyreError::BadValue { name: name.into(), value: String::new() };
        let old = self.get(name).ok_or_else(|| FyreError::UnknownProperty { name: name.into() })?;
        let changed = crate::param::materially_changed(&old, &value);

        match (name, value) {
            ("width", ParamValue::Uint(v)) => self.width = v.clamp(1, 32767),
            ("height", ParamValue::Uint(v)) => self.height = v.clamp(1, 32767),
            ("oversample", ParamValue::Uint(v)) => self.oversample = v.clamp(1, 4),
            ("exposure", ParamValue::Double(v)) => self.exposure = v.clamp(0.0, 100.0),
            ("gamma", ParamValue::Double(v)) => self.gamma = v.clamp(0.0, 10.0),
            ("oversample_gamma", ParamValue::Double(v)) => self.oversample_gamma = v.clamp(0.0, 10.0),
            ("fgcolor", ParamValue::Color(v)) => self.fgcolor = v,
            ("bgcolor", ParamValue::Color(v)) => self.bgcolor = v,
            ("clamped", ParamValue::Bool(v)) => self.clamped = v,
            _ => return Err(bad()),
        }
        Ok(changed)
    }

    fn default_value(name: &str) -> Option<ParamValue> {
        ImageParams::default().get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_source() {
        let p = ImageParams::default();
        assert_eq!(p.width, 600);
        assert_eq!(p.height, 600);
        assert_eq!(p.oversample, 1);
        assert!((p.exposure - 0.05).abs() < 1e-9);
        assert_eq!(p.gamma, 1.0);
        assert!((p.oversample_gamma - 1.66).abs() < 1e-9);
        assert!(!p.clamped);
    }

    #[test]
    fn color_round_trips_through_hex() {
        let mut p = ImageParams::default();
        p.set("fgcolor", "#0088FF").unwrap();
        let saved = p.save_string();
        assert!(saved.contains("fgcolor = #0088FF"));
    }
}
