//! Frame-by-frame playback of a stored flight.

use crate::telemetry::TelemetrySample;

/// Cursor over a loaded sequence of samples.
///
/// Loading starts playback at the first frame. [`next_frame`](Self::next_frame)
/// advances until the last frame; calling it on the last frame ends playback
/// without moving the cursor.
#[derive(Debug, Clone, Default)]
pub struct ReplaySession {
    frames: Vec<TelemetrySample>,
    index: usize,
    replaying: bool,
}

impl ReplaySession {
    /// Create an empty, stopped session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the loaded frames and start playback at the first one.
    pub fn load(&mut self, frames: Vec<TelemetrySample>) {
        self.frames = frames;
        self.index = 0;
        self.replaying = true;
    }

    /// Stop playback and clear the loaded frames.
    pub fn stop(&mut self) {
        self.frames.clear();
        self.index = 0;
        self.replaying = false;
    }

    /// Advance one frame, or end playback if already on the last frame.
    ///
    /// Returns the frame now under the cursor while still replaying.
    pub fn next_frame(&mut self) -> Option<&TelemetrySample> {
        if self.index + 1 < self.frames.len() {
            self.index += 1;
            self.frames.get(self.index)
        } else {
            self.replaying = false;
            None
        }
    }

    /// The frame under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&TelemetrySample> {
        self.frames.get(self.index)
    }

    /// Cursor position.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Number of loaded frames.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Playback progress in whole percent, 0 for an empty session.
    ///
    /// Measured as `index / total`, so the last frame of a ten-frame flight
    /// reads 90.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn progress(&self) -> u8 {
        if self.frames.is_empty() {
            return 0;
        }
        let percent = (self.index as f64 / self.frames.len() as f64 * 100.0).round();
        percent as u8
    }

    /// Whether playback is running.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frames(n: usize) -> Vec<TelemetrySample> {
        (0..n).map(|i| TelemetrySample::new(json!({ "seq": i }))).collect()
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = ReplaySession::new();
        assert!(!session.is_replaying());
        assert_eq!(session.total_frames(), 0);
        assert_eq!(session.progress(), 0);
        assert!(session.current().is_none());
    }

    #[test]
    fn test_load_starts_at_first_frame() {
        let mut session = ReplaySession::new();
        session.load(frames(4));
        assert!(session.is_replaying());
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.current().unwrap().payload()["seq"], 0);
        assert_eq!(session.total_frames(), 4);
    }

    #[test]
    fn test_next_frame_until_end() {
        let mut session = ReplaySession::new();
        session.load(frames(3));

        assert_eq!(session.next_frame().unwrap().payload()["seq"], 1);
        assert_eq!(session.next_frame().unwrap().payload()["seq"], 2);
        assert!(session.is_replaying());

        assert!(session.next_frame().is_none());
        assert!(!session.is_replaying());
        assert_eq!(session.current_index(), 2);
    }

    #[test]
    fn test_progress_rounds() {
        let mut session = ReplaySession::new();
        session.load(frames(3));
        assert_eq!(session.progress(), 0);
        session.next_frame();
        assert_eq!(session.progress(), 33);
        session.next_frame();
        assert_eq!(session.progress(), 67);

        session.load(frames(10));
        for _ in 0..9 {
            session.next_frame();
        }
        assert_eq!(session.progress(), 90);
    }

    #[test]
    fn test_single_frame_session_ends_on_first_advance() {
        let mut session = ReplaySession::new();
        session.load(frames(1));
        assert!(session.next_frame().is_none());
        assert!(!session.is_replaying());
    }

    #[test]
    fn test_stop_clears() {
        let mut session = ReplaySession::new();
        session.load(frames(5));
        session.next_frame();
        session.stop();
        assert!(!session.is_replaying());
        assert_eq!(session.total_frames(), 0);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.progress(), 0);
    }

    #[test]
    fn test_reload_resets_cursor() {
        let mut session = ReplaySession::new();
        session.load(frames(5));
        session.next_frame();
        session.next_frame();
        session.load(frames(2));
        assert_eq!(session.current_index(), 0);
        assert!(session.is_replaying());
    }
}
