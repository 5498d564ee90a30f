//! The de Jong map's own parameter set. Defaults grounded on
//! `original_source/src/de-jong.c`'s `g_param_spec_*` installation.

use crate::error::FyreError;
use crate::param::{ParamHolder, ParamKind, ParamMeta, ParamValue};

const INITIAL_CONDITIONS_VARIANTS: &[&str] =
    &["circular_uniform", "square_uniform", "gaussian", "radial", "sphere"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialConditions {
    CircularUniform,
    SquareUniform,
    Gaussian,
    Radial,
    Sphere,
}

impl InitialConditions {
    pub fn as_str(self) -> &'static str {
        match self {
            InitialConditions::CircularUniform => "circular_uniform",
            InitialConditions::SquareUniform => "square_uniform",
            InitialConditions::Gaussian => "gaussian",
            InitialConditions::Radial => "radial",
            InitialConditions::Sphere => "sphere",
        }
    }

    pub fn from_str(s: &str) -> Option<InitialConditions> {
        match s {
            "circular_uniform" => Some(InitialConditions::CircularUniform),
            "square_uniform" => Some(InitialConditions::SquareUniform),
            "gaussian" => Some(InitialConditions::Gaussian),
            "radial" => Some(InitialConditions::Radial),
            "sphere" => Some(InitialConditions::Sphere),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeJongParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub zoom: f64,
    pub aspect: f64,
    pub xoffset: f64,
    pub yoffset: f64,
    pub rotation: f64,
    pub blur_radius: f64,
    pub blur_ratio: f64,
    pub tileable: bool,
    pub emphasize_transient: bool,
    pub transient_iterations: u32,
    pub initial_conditions: InitialConditions,
    pub initial_xscale: f64,
    pub initial_yscale: f64,
    pub initial_xoffset: f64,
    pub initial_yoffset: f64,
}

impl Default for DeJongParams {
    fn default() -> DeJongParams {
        DeJongParams {
            a: 2.38767,
            b: -1.22713,
            c: -0.39595,
            d: -4.67104,
            zoom: 1.0,
            aspect: 1.0,
            xoffset: 0.0,
            yoffset: 0.0,
            rotation: 0.0,
            blur_radius: 0.0,
            blur_ratio: 1.0,
            tileable: false,
            emphasize_transient: false,
            transient_iterations: 50,
            initial_conditions: InitialConditions::CircularUniform,
            initial_xscale: 1.0,
            initial_yscale: 1.0,
            initial_xoffset: 0.0,
            initial_yoffset: 0.0,
        }
    }
}

macro_rules! meta {
    ($name:literal, $kind:expr, $interp:expr, $dep:expr) => {
        ParamMeta {
            name: $name,
            kind: $kind,
            serialized: true,
            interpolate: $interp,
            gui_visible: true,
            group: Some("de_jong"),
            step: None,
            page: None,
            digits: None,
            dependency: $dep,
        }
    };
}

static METADATA: &[ParamMeta] = &[
    meta!("a", ParamKind::Double, true, None),
    meta!("b", ParamKind::Double, true, None),
    meta!("c", ParamKind::Double, true, None),
    meta!("d", ParamKind::Double, true, None),
    meta!("zoom", ParamKind::Double, true, None),
    meta!("aspect", ParamKind::Double, true, None),
    meta!("xoffset", ParamKind::Double, true, None),
    meta!("yoffset", ParamKind::Double, true, None),
    meta!("rotation", ParamKind::Double, true, None),
    meta!("blur_radius", ParamKind::Double, true, None),
    meta!("blur_ratio", ParamKind::Double, true, None),
    meta!("tileable", ParamKind::Bool, true, None),
    meta!("emphasize_transient", ParamKind::Bool, true, None),
    meta!(
        "transient_iterations",
        ParamKind::Uint,
        true,
        Some("emphasize_transient")
    ),
    meta!(
        "initial_conditions",
        ParamKind::Enum(INITIAL_CONDITIONS_VARIANTS),
        true,
        Some("emphasize_transient")
    ),
    meta!("initial_xscale", ParamKind::Double, true, Some("emphasize_transient")),
    meta!("initial_yscale", ParamKind::Double, true, Some("emphasize_transient")),
    meta!("initial_xoffset", ParamKind::Double, true, Some("emphasize_transient")),
    meta!("initial_yoffset", ParamKind::Double, true, Some("emphasize_transient")),
];

impl ParamHolder for DeJongParams {
    fn metadata() -> &'static [ParamMeta] {
        METADATA
    }

    fn get(&self, name: &str) -> Option<ParamValue> {
        Some(match name {
            "a" => ParamValue::Double(self.a),
            "b" => ParamValue::Double(self.b),
            "c" => ParamValue::Double(self.c),
            "d" => ParamValue::Double(self.d),
            "zoom" => ParamValue::Double(self.zoom),
            "aspect" => ParamValue::Double(self.aspect),
            "xoffset" => ParamValue::Double(self.xoffset),
            "yoffset" => ParamValue::Double(self.yoffset),
            "rotation" => ParamValue::Double(self.rotation),
            "blur_radius" => ParamValue::Double(self.blur_radius),
            "blur_ratio" => ParamValue::Double(self.blur_ratio),
            "tileable" => ParamValue::Bool(self.tileable),
            "emphasize_transient" => ParamValue::Bool(self.emphasize_transient),
            "transient_iterations" => ParamValue::Uint(self.transient_iterations),
            "initial_conditions" => ParamValue::Enum(self.initial_conditions.as_str().to_string()),
            "initial_xscale" => ParamValue::Double(self.initial_xscale),
            "initial_yscale" => ParamValue::Double(self.initial_yscale),
            "initial_xoffset" => ParamValue::Double(self.initial_xoffset),
            "initial_yoffset" => ParamValue::Double(self.initial_yoffset),
            _ => return None,
        })
    }

    fn set_raw(&mut self, name: &str, value: ParamValue) -> Result<bool, FyreError> {
        let bad = || FyreError::BadValue { name: name.into(), value: String::new() };
        let old = self.get(name).ok_or_else(|| FyreError::UnknownProperty { name: name.into() })?;
        let changed = crate::param::materially_changed(&old, &value);

        match (name, value) {
            ("a", ParamValue::Double(v)) => self.a = v.clamp(-100.0, 100.0),
            ("b", ParamValue::Double(v)) => self.b = v.clamp(-100.0, 100.0),
            ("c", ParamValue::Double(v)) => self.c = v.clamp(-100.0, 100.0),
            ("d", ParamValue::Double(v)) => self.d = v.clamp(-100.0, 100.0),
            ("zoom", ParamValue::Double(v)) => self.zoom = v.clamp(0.01, 1000.0),
            ("aspect", ParamValue::Double(v)) => self.aspect = v.clamp(0.01, 100.0),
            ("xoffset", ParamValue::Double(v)) => self.xoffset = v.clamp(-100.0, 100.0),
            ("yoffset", ParamValue::Double(v)) => self.yoffset = v.clamp(-100.0, 100.0),
            ("rotation", ParamValue::Double(v)) => self.rotation = v.clamp(-100.0, 100.0),
            ("blur_radius", ParamValue::Double(v)) => self.blur_radius = v.clamp(0.0, 100.0),
            ("blur_ratio", ParamValue::Double(v)) => self.blur_ratio = v.clamp(0.0, 1.0),
            ("tileable", ParamValue::Bool(v)) => self.tileable = v,
            ("emphasize_transient", ParamValue::Bool(v)) => self.emphasize_transient = v,
            ("transient_iterations", ParamValue::Uint(v)) => {
                self.transient_iterations = v.clamp(1, 100_000)
            }
            ("initial_conditions", ParamValue::Enum(v)) => {
                self.initial_conditions = InitialConditions::from_str(&v).ok_or_else(bad)?
            }
            ("initial_xscale", ParamValue::Double(v)) => self.initial_xscale = v,
            ("initial_yscale", ParamValue::Double(v)) => self.initial_yscale = v,
            ("initial_xoffset", ParamValue::Double(v)) => self.initial_xoffset = v,
            ("initial_yoffset", ParamValue::Double(v)) => self.initial_yoffset = v,
            _ => return Err(bad()),
        }
        Ok(changed)
    }

    fn default_value(name: &str) -> Option<ParamValue> {
        DeJongParams::default().get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_is_fixed_point() {
        let mut p = DeJongParams::default();
        p.set("a", "1.2345678").unwrap();
        p.set("zoom", "3.75").unwrap();
        p.set("tileable", "true").unwrap();

        let saved = p.save_string();
        let mut q = DeJongParams::default();
        q.load_string(&saved).unwrap();
        assert_eq!(q.save_string(), saved);
        assert!((q.a - 1.2345678).abs() < 1e-5);
        assert!((q.zoom - 3.75).abs() < 1e-5);
        assert!(q.tileable);
    }

    #[test]
    fn interpolate_at_endpoints_matches_inputs() {
        let mut a = DeJongParams::default();
        a.a = 2.0;
        a.b = -1.0;
        let mut b = DeJongParams::default();
        b.a = -3.0;
        b.b = 4.0;

        let mut out = DeJongParams::default();
        out.interpolate_linear(0.0, &a, &b);
        assert_eq!(out.a, a.a);
        assert_eq!(out.b, a.b);

        out.interpolate_linear(1.0, &a, &b);
        assert_eq!(out.a, b.a);
        assert_eq!(out.b, b.b);

        out.interpolate_linear(0.5, &a, &b);
        assert!((out.a - (-0.5)).abs() < 1e-9);
    }

    #[test]
    fn unknown_property_is_an_error() {
        let mut p = DeJongParams::default();
        assert!(matches!(p.set("nope", "1"), Err(FyreError::UnknownProperty { .. })));
    }
}
