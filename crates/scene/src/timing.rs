use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// `TIME`, in seconds.
    pub time: f64,
    /// `TIMEDELTA`, never negative.
    pub delta: f64,
}

/// Effective render time and delta for one frame.
///
/// An explicit time wins over the clock; otherwise time is the elapsed time
/// since `base`. Delta is measured against the previous render time, which
/// starts at zero, and clamped at zero so rewinding never yields a negative
/// delta.
pub fn derive_time(base: Instant, now: Instant, previous: f64, explicit: Option<f64>) -> TimeSample {
    let time = explicit.unwrap_or_else(|| now.saturating_duration_since(base).as_secs_f64());
    TimeSample {
        time,
        delta: (time - previous).max(0.0),
    }
}

/// Per-scene clock state: base timestamp, last render time, frame counter.
#[derive(Debug)]
pub struct Timeline {
    base: Instant,
    previous: f64,
    frame_index: u64,
}

impl Timeline {
    pub fn new(base: Instant) -> Self {
        Self {
            base,
            previous: 0.0,
            frame_index: 0,
        }
    }

    /// Time and delta for a frame drawn at `now`. Nothing is recorded until
    /// the frame is committed.
    pub fn sample(&self, now: Instant, explicit: Option<f64>) -> TimeSample {
        derive_time(self.base, now, self.previous, explicit)
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Records a completed frame: its time becomes the previous render time
    /// and the frame index advances by one.
    pub fn commit(&mut self, sample: TimeSample) {
        self.previous = sample.time;
        self.frame_index = self.frame_index.saturating_add(1);
    }

    /// Restarts the clock at `base`, as after a document swap.
    pub fn reset(&mut self, base: Instant) {
        *self = Self::new(base);
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}
