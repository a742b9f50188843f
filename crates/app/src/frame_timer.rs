use std::time::{Duration, Instant};

/// Per-frame delta time and a once-per-second fps counter.
pub struct FrameTimer {
    last_frame: Instant,
    delta: Duration,
    max_delta: Duration,
    frames: u64,
    frames_this_second: u32,
    second_start: Instant,
    fps: u32,
}

impl FrameTimer {
    /// `max_delta` caps the delta reported after a stall.
    pub fn new(max_delta: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            delta: Duration::ZERO,
            max_delta,
            frames: 0,
            frames_this_second: 0,
            second_start: now,
            fps: 0,
        }
    }

    pub fn tick(&mut self) -> Duration {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Duration {
        self.delta = now
            .saturating_duration_since(self.last_frame)
            .min(self.max_delta);
        self.last_frame = now;
        self.frames += 1;
        self.frames_this_second += 1;

        if now.saturating_duration_since(self.second_start) >= Duration::from_secs(1) {
            self.fps = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_start = now;
        }
        self.delta
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Frames ticked since creation.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames counted over the last full second.
    pub fn fps(&self) -> u32 {
        self.fps
    }
}
