// Frame-rate counter
//
// Accumulates frame deltas and publishes a rate once per interval.

#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: f32,
    elapsed: f32,
    frames: u32,
    fps: f32,
    frame_time: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl FpsCounter {
    /// `interval` is in seconds.
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(f32::EPSILON),
            elapsed: 0.0,
            frames: 0,
            fps: 0.0,
            frame_time: 0.0,
        }
    }

    /// Record one frame. Returns true when a new rate was published.
    pub fn tick(&mut self, delta_seconds: f32) -> bool {
        self.elapsed += delta_seconds;
        self.frames += 1;
        self.frame_time = delta_seconds;

        if self.elapsed < self.interval {
            return false;
        }

        self.fps = self.frames as f32 / self.elapsed;
        self.elapsed = 0.0;
        self.frames = 0;
        true
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Duration of the last frame in milliseconds.
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publishes_once_per_interval() {
        let mut counter = FpsCounter::new(1.0);

        for _ in 0..59 {
            assert!(!counter.tick(1.0 / 60.0));
        }
        assert_eq!(counter.fps(), 0.0);

        // 60 frames at 1/60 s reach the interval (allowing for float drift)
        let mut published = counter.tick(1.0 / 60.0);
        if !published {
            published = counter.tick(1.0 / 60.0);
        }
        assert!(published);
        assert!((counter.fps() - 60.0).abs() < 1.5);
    }

    #[test]
    fn test_slow_frame_publishes_immediately() {
        let mut counter = FpsCounter::new(0.5);
        assert!(counter.tick(1.0));
        assert_eq!(counter.fps(), 1.0);
        assert_eq!(counter.frame_time_ms(), 1000.0);
    }
}
