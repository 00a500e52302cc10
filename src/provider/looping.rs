// src/provider/looping.rs

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Source, StreamFormat};

/// Fractions closer to zero than this are treated as `1.0`.
pub const FRACTION_EPSILON: f64 = 1e-6;

pub(crate) fn normalize_fraction(fraction: f64) -> f64 {
    if !fraction.is_finite() || fraction.abs() < FRACTION_EPSILON {
        1.0
    } else {
        fraction
    }
}

/// Snapshot of a provider's loop state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopRegion {
    /// Active region, `end` exclusive.
    pub start: usize,
    pub end: usize,
    /// Last explicitly set range the fraction is applied against.
    pub base_start: usize,
    pub base_end: usize,
    /// Signed scale. Non-negative anchors at `base_start`, negative at `base_end`.
    pub fraction: f64,
    pub enabled: bool,
}

impl LoopRegion {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug)]
struct LoopState {
    /// Samples per frame. Every bound and cursor the state stores sits on a
    /// multiple of this.
    channels: usize,
    base_start: usize,
    base_end: usize,
    start: usize,
    end: usize,
    fraction: f64,
    position: usize,
    enabled: bool,
}

impl LoopState {
    fn full(len: usize, channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            base_start: 0,
            base_end: len,
            start: 0,
            end: len,
            fraction: 1.0,
            position: 0,
            enabled: false,
        }
    }

    fn floor_frame(&self, sample: usize) -> usize {
        sample - sample % self.channels
    }

    fn set_loop(&mut self, len: usize, start: usize, end: usize, fraction: f64, reset_cursor: bool) {
        let top = self.floor_frame(len);
        if top == 0 {
            return;
        }
        let ch = self.channels;
        let start = self.floor_frame(start).min(top - ch);
        let end = self.floor_frame(end).clamp(start + ch, top);
        self.base_start = start;
        self.base_end = end;
        self.enabled = true;
        self.apply_fraction(top, fraction, reset_cursor);
    }

    fn update_fraction(&mut self, len: usize, fraction: f64, reset_cursor: bool) {
        let top = self.floor_frame(len);
        if top == 0 {
            return;
        }
        if !self.enabled {
            let ch = self.channels;
            self.base_start = self.floor_frame(self.start).min(top - ch);
            self.base_end = self.floor_frame(self.end).clamp(self.base_start + ch, top);
            self.enabled = true;
        }
        self.apply_fraction(top, fraction, reset_cursor);
    }

    /// `top` is the buffer length floored to whole frames, non-zero.
    fn apply_fraction(&mut self, top: usize, fraction: f64, reset_cursor: bool) {
        let ch = self.channels;
        let fraction = normalize_fraction(fraction);
        let base_frames = self.base_end.saturating_sub(self.base_start) / ch;
        let scaled_frames = ((base_frames as f64 * fraction.abs()).round() as usize).max(1);
        let scaled = scaled_frames.saturating_mul(ch);

        let (start, end) = if fraction >= 0.0 {
            let start = self.base_start.min(top - ch);
            (start, start.saturating_add(scaled).min(top))
        } else {
            let end = self.base_end.clamp(ch, top);
            (end.saturating_sub(scaled), end)
        };

        self.start = start;
        self.end = end;
        self.fraction = fraction;

        if reset_cursor && !(start..end).contains(&self.position) {
            self.position = start;
        }
    }

    fn seek(&mut self, len: usize, sample: usize) {
        let top = self.floor_frame(len);
        if top == 0 {
            return;
        }
        self.position = self.floor_frame(sample).min(top - self.channels);
    }

    fn clear(&mut self, len: usize) {
        let position = self.position;
        *self = Self::full(len, self.channels);
        self.position = position;
    }

    fn region(&self) -> LoopRegion {
        LoopRegion {
            start: self.start,
            end: self.end,
            base_start: self.base_start,
            base_end: self.base_end,
            fraction: self.fraction,
            enabled: self.enabled,
        }
    }
}

/// Reads a fixed buffer front to back, optionally cycling inside a loop region.
///
/// The read path and every mutation (through [`LoopHandle`]) share one lock.
/// Mutations are O(1) and never allocate, so the hardware thread only ever
/// waits for a bounds update or another bounded copy.
pub struct LoopRegionProvider {
    samples: Arc<[f32]>,
    format: StreamFormat,
    state: Arc<Mutex<LoopState>>,
}

impl LoopRegionProvider {
    pub fn new(samples: Arc<[f32]>, format: StreamFormat) -> Self {
        let state = LoopState::full(samples.len(), format.channels);
        Self {
            samples,
            format,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Control handle for the UI/control side.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            len: self.samples.len(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Source for LoopRegionProvider {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let len = self.samples.len();
        if len == 0 || out.is_empty() {
            return 0;
        }

        let mut st = self.state.lock();

        if !st.enabled {
            // A cursor sitting at `len` means the track already played out.
            let pos = st.position.min(len);
            let n = (len - pos).min(out.len());
            out[..n].copy_from_slice(&self.samples[pos..pos + n]);
            st.position = pos + n;
            return n;
        }

        let mut written = 0;
        while written < out.len() {
            if st.position < st.start || st.position >= st.end {
                st.position = st.start;
            }
            let n = (st.end - st.position).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.samples[st.position..st.position + n]);
            st.position += n;
            written += n;
        }
        written
    }

    fn format(&self) -> StreamFormat {
        self.format
    }
}

/// Cloneable control side of a [`LoopRegionProvider`].
#[derive(Clone)]
pub struct LoopHandle {
    len: usize,
    state: Arc<Mutex<LoopState>>,
}

impl LoopHandle {
    /// Sets a new base range and starts looping it, scaled by `fraction`.
    /// Bounds are floored to whole frames and clamped so the region holds at
    /// least one frame of the buffer.
    pub fn set_loop(&self, start: usize, end: usize, fraction: f64, reset_cursor: bool) {
        self.state.lock().set_loop(self.len, start, end, fraction, reset_cursor);
    }

    /// Re-applies `fraction` against the current base range. When the
    /// provider is not looping yet, the current region becomes the base.
    pub fn update_loop_fraction(&self, fraction: f64, reset_cursor: bool) {
        self.state.lock().update_fraction(self.len, fraction, reset_cursor);
    }

    /// Stops looping; the region goes back to the whole buffer.
    pub fn clear_loop(&self) {
        self.state.lock().clear(self.len);
    }

    /// Moves the read cursor to the start of the frame holding `sample`,
    /// clamped to the last frame. Loop bounds and loop state are left alone.
    pub fn seek(&self, sample: usize) {
        self.state.lock().seek(self.len, sample);
    }

    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    pub fn region(&self) -> LoopRegion {
        self.state.lock().region()
    }

    pub fn is_looping(&self) -> bool {
        self.state.lock().enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Arc<[f32]> {
        (0..len).map(|i| i as f32).collect::<Vec<_>>().into()
    }

    fn provider(len: usize) -> (LoopRegionProvider, LoopHandle) {
        let p = LoopRegionProvider::new(ramp(len), StreamFormat::new(44_100, 1));
        let h = p.handle();
        (p, h)
    }

    #[test]
    fn looped_read_repeats_region_exactly() {
        let (mut p, h) = provider(1_000);
        h.set_loop(100, 200, 1.0, false);
        h.seek(100);

        let mut out = vec![0.0; 350];
        assert_eq!(p.read(&mut out), 350);

        let region: Vec<f32> = (100..200).map(|i| i as f32).collect();
        let expected: Vec<f32> = region.iter().cycle().take(350).copied().collect();
        assert_eq!(out, expected);
        assert_eq!(h.position(), 150);
    }

    #[test]
    fn unlooped_read_stops_at_buffer_end() {
        let (mut p, h) = provider(100);
        h.seek(90);
        let mut out = vec![-1.0; 32];
        assert_eq!(p.read(&mut out), 10);
        assert_eq!(out[9], 99.0);
        assert_eq!(out[10], -1.0);
        assert_eq!(p.read(&mut out), 0);
    }

    #[test]
    fn played_out_cursor_wraps_once_looping() {
        let (mut p, h) = provider(10);
        let mut out = vec![0.0; 10];
        assert_eq!(p.read(&mut out), 10);
        assert_eq!(h.position(), 10);

        h.set_loop(0, 10, 1.0, false);
        let mut out = vec![-1.0; 25];
        assert_eq!(p.read(&mut out), 25);
        assert_eq!(out[0], 0.0);
        assert_eq!(h.position(), 5);
    }

    #[test]
    fn cursor_outside_region_wraps_to_start() {
        let (mut p, h) = provider(1_000);
        h.seek(900);
        h.set_loop(10, 20, 1.0, false);
        assert_eq!(h.position(), 900);

        let mut out = vec![0.0; 4];
        p.read(&mut out);
        assert_eq!(out, [10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn positive_fraction_anchors_at_start() {
        let (_, h) = provider(1_000);
        h.set_loop(100, 300, 0.5, false);
        let r = h.region();
        assert_eq!((r.start, r.end), (100, 200));
        assert_eq!((r.base_start, r.base_end), (100, 300));

        h.update_loop_fraction(2.0, false);
        assert_eq!((h.region().start, h.region().end), (100, 500));

        h.update_loop_fraction(20.0, false);
        assert_eq!((h.region().start, h.region().end), (100, 1_000));
    }

    #[test]
    fn negative_fraction_anchors_at_end() {
        let (_, h) = provider(1_000);
        h.set_loop(100, 300, -0.5, false);
        assert_eq!((h.region().start, h.region().end), (200, 300));

        h.update_loop_fraction(-4.0, false);
        assert_eq!((h.region().start, h.region().end), (0, 300));
    }

    #[test]
    fn tiny_fraction_counts_as_one() {
        let (_, h) = provider(1_000);
        h.set_loop(100, 300, 1e-9, false);
        let r = h.region();
        assert_eq!((r.start, r.end), (100, 300));
        assert_eq!(r.fraction, 1.0);
    }

    #[test]
    fn region_is_never_shorter_than_one_sample() {
        let (_, h) = provider(1_000);
        h.set_loop(100, 101, 0.01, false);
        assert_eq!(h.region().len(), 1);
        h.set_loop(0, 1, -0.01, false);
        let r = h.region();
        assert_eq!((r.start, r.end), (0, 1));
    }

    #[test]
    fn set_loop_clamps_out_of_range_bounds() {
        let (_, h) = provider(100);
        h.set_loop(500, 10, 1.0, false);
        let r = h.region();
        assert_eq!((r.start, r.end), (99, 100));
        assert!(r.enabled);
    }

    #[test]
    fn fraction_update_is_idempotent() {
        let (_, h) = provider(10_000);
        h.set_loop(1_000, 3_000, 1.0, false);
        h.update_loop_fraction(1.0, false);
        let first = h.region();
        h.update_loop_fraction(1.0, false);
        assert_eq!(h.region(), first);
        assert_eq!((first.start, first.end), (1_000, 3_000));
    }

    #[test]
    fn fraction_update_without_loop_adopts_current_region() {
        let (_, h) = provider(1_000);
        assert!(!h.is_looping());
        h.update_loop_fraction(0.25, false);
        let r = h.region();
        assert!(r.enabled);
        assert_eq!((r.base_start, r.base_end), (0, 1_000));
        assert_eq!((r.start, r.end), (0, 250));
    }

    #[test]
    fn cursor_reset_only_when_requested() {
        let (_, h) = provider(1_000);
        h.seek(800);
        h.set_loop(0, 100, 1.0, false);
        assert_eq!(h.position(), 800);
        h.set_loop(200, 300, 1.0, true);
        assert_eq!(h.position(), 200);
        h.seek(250);
        h.update_loop_fraction(0.5, true);
        assert_eq!(h.position(), 200);
    }

    #[test]
    fn seek_clamps_and_keeps_loop() {
        let (_, h) = provider(100);
        h.set_loop(10, 20, 1.0, false);
        h.seek(5_000);
        assert_eq!(h.position(), 99);
        assert_eq!((h.region().start, h.region().end), (10, 20));
        assert!(h.is_looping());
    }

    #[test]
    fn clear_loop_restores_full_region() {
        let (mut p, h) = provider(50);
        h.set_loop(10, 20, -0.5, false);
        h.seek(12);
        h.clear_loop();
        let r = h.region();
        assert!(!r.enabled);
        assert_eq!((r.start, r.end, r.fraction), (0, 50, 1.0));
        assert_eq!(h.position(), 12);

        let mut out = vec![0.0; 64];
        assert_eq!(p.read(&mut out), 38);
    }

    fn stereo(frames: usize) -> (LoopRegionProvider, LoopHandle) {
        let samples: Vec<f32> = (0..frames).flat_map(|_| [1.0, -1.0]).collect();
        let p = LoopRegionProvider::new(samples.into(), StreamFormat::new(44_100, 2));
        let h = p.handle();
        (p, h)
    }

    fn assert_left_right(out: &[f32]) {
        for (i, frame) in out.chunks(2).enumerate() {
            assert_eq!(frame, [1.0, -1.0], "frame {i} has swapped channels");
        }
    }

    #[test]
    fn stereo_seek_lands_on_frame_start() {
        let (mut p, h) = stereo(100);
        h.seek(101);
        assert_eq!(h.position(), 100);
        let mut out = vec![0.0; 8];
        assert_eq!(p.read(&mut out), 8);
        assert_left_right(&out);

        h.seek(10_000);
        assert_eq!(h.position(), 198);
    }

    #[test]
    fn stereo_loop_bounds_are_whole_frames() {
        let (mut p, h) = stereo(1_000);
        h.set_loop(101, 333, 1.0, true);
        let r = h.region();
        assert_eq!((r.start, r.end), (100, 332));

        h.set_loop(1_999, 5_000, 1.0, true);
        let r = h.region();
        assert_eq!((r.start, r.end), (1_998, 2_000));

        h.set_loop(0, 1, 1.0, true);
        assert_eq!(h.region().len(), 2);

        let mut out = vec![0.0; 64];
        assert_eq!(p.read(&mut out), 64);
        assert_left_right(&out);
    }

    #[test]
    fn stereo_fraction_keeps_frame_parity_across_wraps() {
        let (mut p, h) = stereo(44_100);
        h.set_loop(0, 44_100, 0.25, true);
        let r = h.region();
        assert_eq!(r.len() % 2, 0);
        assert_eq!((r.start, r.end), (0, 11_026));

        h.set_loop(1_000, 3_002, -0.3, true);
        let r = h.region();
        assert_eq!(r.end, 3_002);
        assert_eq!(r.start % 2, 0);

        let mut out = vec![0.0; 33_076];
        assert_eq!(p.read(&mut out), out.len());
        assert_left_right(&out);
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let (mut p, h) = provider(0);
        h.set_loop(0, 10, 1.0, false);
        h.seek(3);
        let mut out = vec![0.0; 8];
        assert_eq!(p.read(&mut out), 0);
        assert!(!h.is_looping());
    }
}
