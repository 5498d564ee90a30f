//! Keyframe animation: an ordered list of parameter snapshots, each
//! with its own transition duration and easing spline, plus an
//! iterator that walks continuous time across them and a chunked-file
//! persistence format.
//!
//! Grounded on `chunked_file.rs`'s container for the on-disk format and
//! on `original_source/src/animation.c`'s `AnimationIter` (`_get_first`,
//! `_seek`, `_seek_relative`, `_load`, `_read_frame`): the iterator
//! walks forward by each keyframe's own stored duration and only
//! invalidates once it tries to advance past a keyframe with nothing
//! after it.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::chunked_file::{ChunkReader, ChunkWriter};
use crate::error::FyreError;
use crate::param::ParamHolder;
use crate::spline::Spline;

const SIGNATURE: &[u8] = b"Fyre Animation\n\r\xFF\n";
const LEGACY_SIGNATURE: &[u8] = b"de Jong Explorer Animation\n\r\xFF\n";

const DEFAULT_TRANSITION_DURATION_SECONDS: f64 = 5.0;

/// One entry in an [`Animation`]: a serialized parameter snapshot plus
/// how long the transition away from it should take.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub parameters: String,
    pub thumbnail: Option<Vec<u8>>,
    pub transition_duration_seconds: f64,
    pub spline: Spline,
    pub row_id: u64,
}

/// An ordered sequence of keyframes. The final keyframe's duration is
/// never used — there is nothing after it to transition towards.
#[derive(Clone, Debug, Default)]
pub struct Animation {
    keyframes: Vec<Keyframe>,
    next_row_id: u64,
}

impl Animation {
    pub fn new() -> Animation {
        Animation::default()
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn keyframes_mut(&mut self) -> &mut Vec<Keyframe> {
        &mut self.keyframes
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Total duration: the sum of every keyframe's transition duration
    /// except the last, whose duration is unused.
    pub fn get_length(&self) -> f64 {
        match self.keyframes.len() {
            0 => 0.0,
            n => self.keyframes[..n - 1].iter().map(|k| k.transition_duration_seconds).sum(),
        }
    }

    /// Serializes `parameters`, assigns a fresh row id, and appends a
    /// keyframe with the default duration and the `smooth` spline
    /// template. Returns the new keyframe's row id.
    pub fn keyframe_append<P: ParamHolder>(
        &mut self,
        parameters: &P,
        thumbnail: Option<Vec<u8>>,
    ) -> u64 {
        self.append_raw(
            parameters.save_string(),
            thumbnail,
            DEFAULT_TRANSITION_DURATION_SECONDS,
            Spline::smooth(),
        )
    }

    fn append_raw(
        &mut self,
        parameters: String,
        thumbnail: Option<Vec<u8>>,
        transition_duration_seconds: f64,
        spline: Spline,
    ) -> u64 {
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        self.keyframes.push(Keyframe {
            parameters,
            thumbnail,
            transition_duration_seconds,
            spline,
            row_id,
        });
        row_id
    }

    pub fn write_to<W: std::io::Write>(&self, writer: W) -> Result<(), FyreError> {
        let mut w = ChunkWriter::new(writer, SIGNATURE)?;
        for kf in &self.keyframes {
            w.write_chunk(*b"KfrS", &[])?;
            if !kf.parameters.is_empty() {
                w.write_chunk(*b"fyPR", kf.parameters.as_bytes())?;
            }
            if let Some(thumb) = &kf.thumbnail {
                w.write_chunk(*b"fyTp", thumb)?;
            }
            let mut dura = Vec::with_capacity(8);
            dura.write_f64::<BigEndian>(kf.transition_duration_seconds)?;
            w.write_chunk(*b"dura", &dura)?;
            w.write_chunk(*b"splC", &kf.spline.serialize())?;
            w.write_chunk(*b"KfrE", &[])?;
        }
        Ok(())
    }

    /// Parses a whole animation file held in memory. Accepts either the
    /// current signature or the legacy one it superseded.
    pub fn read_from(data: &[u8]) -> Result<Animation, FyreError> {
        let body = if let Some(rest) = data.strip_prefix(SIGNATURE) {
            rest
        } else if let Some(rest) = data.strip_prefix(LEGACY_SIGNATURE) {
            rest
        } else {
            return Err(FyreError::ProtocolError("unrecognized animation file signature".into()));
        };

        let mut animation = Animation::new();
        let mut building: Option<KeyframeBuilder> = None;
        let mut reader = ChunkReader::new(Cursor::new(body));

        reader.read_all(|chunk| match &chunk.chunk_type {
            b"KfrS" => building = Some(KeyframeBuilder::default()),
            b"fyPR" | b"djPR" => {
                if let Some(b) = &mut building {
                    b.parameters = String::from_utf8_lossy(&chunk.data).into_owned();
                }
            }
            b"fyTp" | b"djTp" => {
                if let Some(b) = &mut building {
                    b.thumbnail = Some(chunk.data.clone());
                }
            }
            b"dura" => {
                if let Some(b) = &mut building {
                    if chunk.data.len() == 8 {
                        b.transition_duration_seconds =
                            (&chunk.data[..]).read_f64::<BigEndian>().unwrap_or(b.transition_duration_seconds);
                    } else {
                        tracing::warn!(length = chunk.data.len(), "ignoring malformed dura chunk");
                    }
                }
            }
            b"splC" => {
                if let Some(b) = &mut building {
                    match Spline::unserialize(&chunk.data) {
                        Ok(spline) => b.spline = Some(spline),
                        Err(e) => tracing::warn!(error = %e, "ignoring malformed splC chunk"),
                    }
                }
            }
            b"KfrE" => {
                if let Some(b) = building.take() {
                    animation.append_raw(
                        b.parameters,
                        b.thumbnail,
                        b.transition_duration_seconds,
                        b.spline.unwrap_or_else(Spline::smooth),
                    );
                }
            }
            _ => {}
        })?;

        Ok(animation)
    }
}

struct KeyframeBuilder {
    parameters: String,
    thumbnail: Option<Vec<u8>>,
    transition_duration_seconds: f64,
    spline: Option<Spline>,
}

impl Default for KeyframeBuilder {
    fn default() -> KeyframeBuilder {
        KeyframeBuilder {
            parameters: String::new(),
            thumbnail: None,
            transition_duration_seconds: DEFAULT_TRANSITION_DURATION_SECONDS,
            spline: None,
        }
    }
}

/// Walks continuous time across an [`Animation`]'s keyframes.
///
/// Rather than mutating `current_index`/`time_after_keyframe`
/// incrementally (as a frame-by-frame player would), every seek
/// recomputes position from an absolute clock. This is simpler than an
/// incremental walk that must also handle stepping backwards past a
/// keyframe boundary, and it makes the "seeking before the first
/// keyframe restarts from the first keyframe" rule (there is no
/// previous-keyframe operation to step to) a single base case instead
/// of a special-cased branch.
pub struct AnimationIterator<'a> {
    animation: &'a Animation,
    absolute_time: f64,
    current_index: usize,
    time_after_keyframe: f64,
    valid: bool,
}

impl<'a> AnimationIterator<'a> {
    pub fn new(animation: &'a Animation) -> AnimationIterator<'a> {
        let mut it = AnimationIterator {
            animation,
            absolute_time: 0.0,
            current_index: 0,
            time_after_keyframe: 0.0,
            valid: false,
        };
        it.recompute_position();
        it
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn recompute_position(&mut self) {
        if self.animation.keyframes.is_empty() {
            self.valid = false;
            return;
        }
        if self.absolute_time < 0.0 {
            self.current_index = 0;
            self.time_after_keyframe = 0.0;
            self.valid = true;
            return;
        }
        let last = self.animation.keyframes.len() - 1;
        let mut remaining = self.absolute_time;
        for index in 0..last {
            let duration = self.animation.keyframes[index].transition_duration_seconds;
            if remaining < duration {
                self.current_index = index;
                self.time_after_keyframe = remaining;
                self.valid = true;
                return;
            }
            remaining -= duration;
        }
        // Landed on (or past) the final keyframe. Its own stored duration
        // is unused, so the only still-valid position here is landing
        // exactly on it; any further advance has no keyframe to enter.
        self.current_index = last;
        self.time_after_keyframe = remaining;
        self.valid = remaining <= 0.0;
    }

    /// Advances (or rewinds, for negative `delta`) the iterator's clock
    /// by `delta` seconds.
    pub fn seek_relative(&mut self, delta: f64) {
        self.absolute_time += delta;
        self.recompute_position();
    }

    /// Interpolates the current position's two bracketing keyframes
    /// into `out`, through the current keyframe's spline. Returns
    /// `false` (leaving `out` untouched) if the iterator has run past
    /// the last keyframe or the animation is empty.
    pub fn load<P: ParamHolder + Default>(&self, out: &mut P) -> bool {
        if !self.valid {
            return false;
        }
        let current = &self.animation.keyframes[self.current_index];
        let next = self.animation.keyframes.get(self.current_index + 1).unwrap_or(current);

        let raw_alpha = if current.transition_duration_seconds > 0.0 {
            self.time_after_keyframe / current.transition_duration_seconds
        } else {
            1.0
        };
        let alpha = current.spline.solve_and_eval(raw_alpha.clamp(0.0, 1.0));

        let mut a = P::default();
        if let Err(e) = a.load_string(&current.parameters) {
            tracing::warn!(error = %e, "ignoring malformed keyframe parameters");
        }
        let mut b = P::default();
        if let Err(e) = b.load_string(&next.parameters) {
            tracing::warn!(error = %e, "ignoring malformed keyframe parameters");
        }

        out.interpolate_linear(alpha, &a, &b);
        true
    }

    /// Loads the interpolated parameters at the current position into
    /// `a`, advances by `1.0 / frame_rate` seconds, then loads the new
    /// position into `b`. Returns whether the iterator is still valid
    /// after advancing.
    pub fn read_frame<P: ParamHolder + Default>(
        &mut self,
        a: &mut P,
        b: &mut P,
        frame_rate: f64,
    ) -> bool {
        self.load(a);
        self.seek_relative(1.0 / frame_rate);
        self.load(b);
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::dejong::DeJongParams;

    fn sample_animation() -> Animation {
        let mut anim = Animation::new();
        let mut first = DeJongParams::default();
        first.set("a", "1.0").unwrap();
        anim.keyframe_append(&first, None);

        let mut second = DeJongParams::default();
        second.set("a", "3.0").unwrap();
        anim.keyframe_append(&second, None);
        anim
    }

    #[test]
    fn get_length_excludes_final_keyframes_duration() {
        let anim = sample_animation();
        assert!((anim.get_length() - DEFAULT_TRANSITION_DURATION_SECONDS).abs() < 1e-9);
    }

    #[test]
    fn iterator_interpolates_between_keyframes() {
        let anim = sample_animation();
        let mut it = AnimationIterator::new(&anim);
        assert!(it.is_valid());

        let mut out = DeJongParams::default();
        assert!(it.load(&mut out));
        assert!((out.a - 1.0).abs() < 1e-9);

        // Landing exactly on the final keyframe is still valid...
        it.seek_relative(DEFAULT_TRANSITION_DURATION_SECONDS);
        assert!(it.is_valid());
        assert!(it.load(&mut out));
        assert!((out.a - 3.0).abs() < 1e-9);

        // ...but there's nothing beyond it to advance into.
        it.seek_relative(1e-6);
        assert!(!it.is_valid());
    }

    #[test]
    fn seeking_negative_restarts_from_first_keyframe() {
        let anim = sample_animation();
        let mut it = AnimationIterator::new(&anim);
        it.seek_relative(2.0);
        it.seek_relative(-100.0);
        assert!(it.is_valid());

        let mut out = DeJongParams::default();
        it.load(&mut out);
        assert!((out.a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn read_frame_advances_and_reports_validity() {
        let anim = sample_animation();
        let mut it = AnimationIterator::new(&anim);
        let mut a = DeJongParams::default();
        let mut b = DeJongParams::default();
        assert!(it.read_frame(&mut a, &mut b, 30.0));
        assert!(b.a > a.a);
    }

    #[test]
    fn file_round_trips_through_write_and_read() {
        let anim = sample_animation();
        let mut buf = Vec::new();
        anim.write_to(&mut buf).unwrap();

        let loaded = Animation::read_from(&buf).unwrap();
        assert_eq!(loaded.keyframes().len(), 2);
        assert_eq!(loaded.keyframes()[0].parameters, anim.keyframes()[0].parameters);
        assert!((loaded.get_length() - anim.get_length()).abs() < 1e-9);
    }

    #[test]
    fn legacy_signature_is_also_accepted() {
        let anim = sample_animation();
        let mut buf = LEGACY_SIGNATURE.to_vec();
        {
            let mut cursor_buf = Vec::new();
            anim.write_to(&mut cursor_buf).unwrap();
            buf.extend_from_slice(&cursor_buf[SIGNATURE.len()..]);
        }
        let loaded = Animation::read_from(&buf).unwrap();
        assert_eq!(loaded.keyframes().len(), 2);
    }

    #[test]
    fn empty_animation_is_immediately_invalid() {
        let anim = Animation::new();
        let it = AnimationIterator::new(&anim);
        assert!(!it.is_valid());
    }
}
