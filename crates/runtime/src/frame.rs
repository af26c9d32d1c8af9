use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use foundation::time::Time;

/// Deterministic frame metadata.
///
/// This is the primary timebase for the viewer runtime. It is intentionally
/// small and pure so it can be recorded and replayed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frame {
    /// 0-based frame index.
    pub index: u64,
    /// Fixed delta time (seconds).
    pub dt_s: f64,
    /// Viewer time at the start of the frame (seconds).
    pub time: Time,
}

impl Frame {
    pub fn new(index: u64, dt_s: f64) -> Self {
        Self {
            index,
            dt_s,
            time: Time(index as f64 * dt_s),
        }
    }

    pub fn next(self) -> Self {
        Self::new(self.index + 1, self.dt_s)
    }
}

/// Shared "please draw another frame" flag.
///
/// Cloned into anything that changes what is on screen outside the regular
/// frame loop (hover changes, finished downloads). Requests coalesce until the
/// clock consumes them.
#[derive(Debug, Clone, Default)]
pub struct RedrawRequests {
    pending: Arc<AtomicBool>,
}

impl RedrawRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether a redraw had been requested.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Fixed-step frame clock driving `on_before_render` callbacks.
#[derive(Debug)]
pub struct FrameClock {
    current: Frame,
    redraw: RedrawRequests,
}

impl FrameClock {
    pub fn new(dt_s: f64) -> Self {
        Self {
            current: Frame::new(0, dt_s),
            redraw: RedrawRequests::new(),
        }
    }

    pub fn redraw_requests(&self) -> RedrawRequests {
        self.redraw.clone()
    }

    pub fn current(&self) -> Frame {
        self.current
    }

    /// Step to the next frame. The flag reports whether anyone asked for a
    /// redraw since the previous step.
    pub fn advance(&mut self) -> (Frame, bool) {
        self.current = self.current.next();
        (self.current, self.redraw.take())
    }
}

#[cfg(test)]
mod tests {
    use super::{Frame, FrameClock};
    use foundation::time::Time;

    #[test]
    fn frame_time_is_deterministic() {
        let a = Frame::new(10, 1.0 / 60.0);
        let b = Frame::new(10, 1.0 / 60.0);
        assert_eq!(a, b);
        assert_eq!(a.time, Time(10.0 / 60.0));
    }

    #[test]
    fn next_advances_index_and_time() {
        let f0 = Frame::new(0, 0.5);
        let f1 = f0.next();
        assert_eq!(f1.index, 1);
        assert_eq!(f1.time, Time(0.5));
    }

    #[test]
    fn redraw_requests_coalesce_until_consumed() {
        let mut clock = FrameClock::new(0.5);
        let handle = clock.redraw_requests();

        let (f1, redraw) = clock.advance();
        assert_eq!(f1.index, 1);
        assert!(!redraw);

        handle.request();
        handle.clone().request();
        assert!(handle.is_pending());
        let (_, redraw) = clock.advance();
        assert!(redraw);
        let (f3, redraw) = clock.advance();
        assert!(!redraw);
        assert_eq!(clock.current(), f3);
    }
}
