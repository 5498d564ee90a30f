//! 1-D interpolation curve used for per-keyframe transitions. No
//! equivalent survived in the reference implementation's distilled
//! sources: a natural cubic spline through an ordered set of
//! monotone-in-x control points, solved with the standard tridiagonal
//! (Thomas algorithm) method.

use crate::error::FyreError;

/// A single 2-D control point in `[0,1] x [0,1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Spline {
    points: Vec<ControlPoint>,
}

impl Spline {
    /// Builds a spline from control points, sorting by `x`. Requires at
    /// least two points and strictly increasing `x` values.
    pub fn new(mut points: Vec<ControlPoint>) -> Result<Spline, FyreError> {
        if points.len() < 2 {
            return Err(FyreError::BadValue {
                name: "spline".into(),
                value: "fewer than two control points".into(),
            });
        }
        points.sort_by(|a, b| a.x.partial_cmp(&b.x).expect("spline control point x is NaN"));
        for w in points.windows(2) {
            if w[1].x <= w[0].x {
                return Err(FyreError::BadValue {
                    name: "spline".into(),
                    value: "control points are not strictly increasing in x".into(),
                });
            }
        }
        Ok(Spline { points })
    }

    pub fn control_points(&self) -> &[ControlPoint] {
        &self.points
    }

    /// The two-point straight-line template: `y = x`.
    pub fn linear() -> Spline {
        Spline::new(vec![ControlPoint { x: 0.0, y: 0.0 }, ControlPoint { x: 1.0, y: 1.0 }])
            .expect("linear template is always valid")
    }

    /// A three-point ease-in/ease-out template passing through the
    /// midpoint.
    pub fn smooth() -> Spline {
        Spline::new(vec![
            ControlPoint { x: 0.0, y: 0.0 },
            ControlPoint { x: 0.5, y: 0.5 },
            ControlPoint { x: 1.0, y: 1.0 },
        ])
        .expect("smooth template is always valid")
    }

    /// Returns the y value of the spline curve at `x`, clamped to
    /// `[0,1]`. Endpoints outside the control-point range hold their
    /// nearest endpoint's y.
    pub fn solve_and_eval(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let pts = &self.points;

        if x <= pts[0].x {
            return pts[0].y;
        }
        if x >= pts[pts.len() - 1].x {
            return pts[pts.len() - 1].y;
        }

        let second_derivatives = self.second_derivatives();
        let i = match pts.binary_search_by(|p| p.x.partial_cmp(&x).unwrap()) {
            Ok(i) => return pts[i].y,
            Err(i) => i - 1,
        };

        let (p0, p1) = (pts[i], pts[i + 1]);
        let h = p1.x - p0.x;
        let a = (p1.x - x) / h;
        let b = (x - p0.x) / h;
        a * p0.y
            + b * p1.y
            + ((a.powi(3) - a) * second_derivatives[i]
                + (b.powi(3) - b) * second_derivatives[i + 1])
                * (h * h)
                / 6.0
    }

    /// Fills `out[i] = solve_and_eval(i / (n-1))` for `i in 0..n`.
    pub fn solve_and_eval_all(&self, out: &mut [f64]) {
        let n = out.len();
        if n == 0 {
            return;
        }
        if n == 1 {
            out[0] = self.solve_and_eval(0.0);
            return;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.solve_and_eval(i as f64 / (n - 1) as f64);
        }
    }

    /// Natural cubic spline second derivatives at each control point,
    /// via the tridiagonal (Thomas algorithm) solve.
    fn second_derivatives(&self) -> Vec<f64> {
        let pts = &self.points;
        let n = pts.len();
        let mut y2 = vec![0.0; n];
        let mut u = vec![0.0; n];

        for i in 1..n - 1 {
            let sig = (pts[i].x - pts[i - 1].x) / (pts[i + 1].x - pts[i - 1].x);
            let p = sig * y2[i - 1] + 2.0;
            y2[i] = (sig - 1.0) / p;
            let d = (pts[i + 1].y - pts[i].y) / (pts[i + 1].x - pts[i].x)
                - (pts[i].y - pts[i - 1].y) / (pts[i].x - pts[i - 1].x);
            u[i] = (6.0 * d / (pts[i + 1].x - pts[i - 1].x) - sig * u[i - 1]) / p;
        }
        for i in (0..n - 1).rev() {
            y2[i] = y2[i] * y2[i + 1] + u[i];
        }
        y2
    }

    /// Serializes control points as `x0,y0;x1,y1;...`, stored as the
    /// `splC` chunk payload.
    pub fn serialize(&self) -> Vec<u8> {
        let text = self
            .points
            .iter()
            .map(|p| format!("{},{}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(";");
        text.into_bytes()
    }

    pub fn unserialize(data: &[u8]) -> Result<Spline, FyreError> {
        let text = std::str::from_utf8(data).map_err(|_| FyreError::BadValue {
            name: "spline".into(),
            value: "non-UTF-8 spline data".into(),
        })?;
        let mut points = Vec::new();
        for pair in text.split(';') {
            if pair.is_empty() {
                continue;
            }
            let (x, y) = pair.split_once(',').ok_or_else(|| FyreError::BadValue {
                name: "spline".into(),
                value: pair.into(),
            })?;
            let x: f64 = x.parse().map_err(|_| FyreError::BadValue {
                name: "spline".into(),
                value: pair.into(),
            })?;
            let y: f64 = y.parse().map_err(|_| FyreError::BadValue {
                name: "spline".into(),
                value: pair.into(),
            })?;
            points.push(ControlPoint { x, y });
        }
        Spline::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_hit_their_endpoints() {
        for s in [Spline::linear(), Spline::smooth()] {
            assert!((s.solve_and_eval(0.0) - 0.0).abs() < 1e-9);
            assert!((s.solve_and_eval(1.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn linear_is_identity() {
        let s = Spline::linear();
        for i in 0..=10 {
            let x = i as f64 / 10.0;
            assert!((s.solve_and_eval(x) - x).abs() < 1e-9);
        }
    }

    #[test]
    fn solve_and_eval_all_matches_pointwise() {
        let s = Spline::smooth();
        let mut out = [0.0; 5];
        s.solve_and_eval_all(&mut out);
        for (i, v) in out.iter().enumerate() {
            assert!((v - s.solve_and_eval(i as f64 / 4.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn serialize_round_trips() {
        let s = Spline::smooth();
        let bytes = s.serialize();
        let s2 = Spline::unserialize(&bytes).unwrap();
        assert_eq!(s.control_points(), s2.control_points());
    }

    #[test]
    fn rejects_non_monotone_points() {
        let err = Spline::new(vec![
            ControlPoint { x: 0.0, y: 0.0 },
            ControlPoint { x: 0.5, y: 1.0 },
            ControlPoint { x: 0.5, y: 0.5 },
        ]);
        assert!(err.is_err());
    }
}
