//! Time Management
//!
//! Frame counting for the streaming update loop:
//! - Monotonic frame index used to stamp page activity
//! - Smoothed frame time for statistics
//! - Stopwatch for measuring update cost

use std::time::{Duration, Instant};

/// Monotonic frame number. Frame 0 is "before the first update".
pub type FrameIndex = u64;

/// Frame clock for the streaming update loop
#[derive(Debug, Clone)]
pub struct FrameClock {
    /// Current frame number
    frame: FrameIndex,
    /// Total simulated time in seconds
    total_time: f64,
    /// Delta time of the last frame
    delta_time: f64,
    /// Frame time history for smoothing
    frame_times: [f64; 60],
    /// Current index in frame time history
    frame_time_index: usize,
}

impl FrameClock {
    /// Create a clock at frame 0
    pub fn new() -> Self {
        Self {
            frame: 0,
            total_time: 0.0,
            delta_time: 1.0 / 60.0,
            frame_times: [1.0 / 60.0; 60],
            frame_time_index: 0,
        }
    }

    /// Advance one frame without timing information
    pub fn advance(&mut self) -> FrameIndex {
        self.frame += 1;
        self.frame
    }

    /// Advance one frame that took `delta_time` seconds
    pub fn tick(&mut self, delta_time: f64) -> FrameIndex {
        let clamped_dt = delta_time.clamp(0.0001, 0.25);

        self.delta_time = clamped_dt;
        self.total_time += clamped_dt;
        self.frame_times[self.frame_time_index] = clamped_dt;
        self.frame_time_index = (self.frame_time_index + 1) % self.frame_times.len();

        self.advance()
    }

    /// Current frame number
    pub fn frame(&self) -> FrameIndex {
        self.frame
    }

    /// Delta time of the last ticked frame
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Total ticked time
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Average frame time over the history window, in milliseconds
    pub fn average_frame_time_ms(&self) -> f64 {
        let sum: f64 = self.frame_times.iter().sum();
        sum / self.frame_times.len() as f64 * 1000.0
    }

    /// Restart counting from frame 0
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Stopwatch for measuring elapsed wall time
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Instant,
    elapsed: Duration,
    running: bool,
}

impl Stopwatch {
    /// Create and start a new stopwatch
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Duration::ZERO,
            running: true,
        }
    }

    /// Stop the stopwatch, keeping the accumulated time
    pub fn stop(&mut self) {
        if self.running {
            self.elapsed += self.start.elapsed();
            self.running = false;
        }
    }

    /// Resume a stopped stopwatch
    pub fn start(&mut self) {
        if !self.running {
            self.start = Instant::now();
            self.running = true;
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        if self.running {
            self.elapsed + self.start.elapsed()
        } else {
            self.elapsed
        }
    }

    /// Get the elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
    }

    #[test]
    fn test_tick_clamps() {
        let mut clock = FrameClock::new();
        clock.tick(10.0);
        assert_eq!(clock.delta_time(), 0.25);
        assert_eq!(clock.frame(), 1);
        clock.tick(0.0);
        assert_eq!(clock.delta_time(), 0.0001);
    }

    #[test]
    fn test_average_frame_time() {
        let mut clock = FrameClock::new();
        for _ in 0..60 {
            clock.tick(0.010);
        }
        assert!((clock.average_frame_time_ms() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut clock = FrameClock::new();
        clock.tick(0.016);
        clock.reset();
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.total_time(), 0.0);
    }

    #[test]
    fn test_stopwatch_stop() {
        let mut watch = Stopwatch::new();
        watch.stop();
        let first = watch.elapsed();
        assert_eq!(watch.elapsed(), first);
        watch.start();
        assert!(watch.elapsed() >= first);
    }
}
