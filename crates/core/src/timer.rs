//! Frame timer feeding delta time into the frame state.

use std::time::{Duration, Instant};

/// Measures per-frame delta time and a rolling frame rate.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
    fps: f32,
}

impl Timer {
    /// Length of the window the frame rate is averaged over.
    pub const FPS_WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
            fps: 0.0,
        }
    }

    /// Total time since the timer was created, in seconds.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Advances one frame and returns the delta since the previous tick.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;

        self.window_frames += 1;
        let window = now - self.window_start;
        if window >= Self::FPS_WINDOW {
            self.fps = self.window_frames as f32 / window.as_secs_f32();
            self.window_frames = 0;
            self.window_start = now;
        }

        delta
    }

    /// Delta time in seconds since the previous tick.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Frame rate averaged over the last completed window (0 until the first one closes).
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.elapsed_secs() >= delta.as_secs_f32());
    }

    #[test]
    fn test_fps_starts_at_zero() {
        let mut timer = Timer::new();
        timer.tick();
        assert_eq!(timer.fps(), 0.0);
    }
}
