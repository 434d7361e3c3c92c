use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::animation::AnimationMixer;

pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}
impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::from_secs_f32(0.0) }
    }
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
    }
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub frame: u64,
    pub dt: f32,
    pub elapsed: f64,
}

/// Per-frame timing plus ownership of the shared animation mixer.
pub struct FrameClock {
    time: Time,
    mixer: Rc<RefCell<AnimationMixer>>,
    frame: u64,
    elapsed: f64,
    max_delta: f32,
}

impl FrameClock {
    pub fn new(max_delta: f32) -> Self {
        Self {
            time: Time::new(),
            mixer: Rc::new(RefCell::new(AnimationMixer::new())),
            frame: 0,
            elapsed: 0.0,
            max_delta: if max_delta.is_finite() && max_delta > 0.0 { max_delta } else { f32::MAX },
        }
    }

    /// Non-finite or negative deltas become zero; large spikes are clamped to `max_delta`.
    pub fn sanitize(&self, dt: f32) -> f32 {
        if !dt.is_finite() || dt <= 0.0 {
            0.0
        } else {
            dt.min(self.max_delta)
        }
    }

    /// Measures the wall-clock delta since the previous call.
    pub fn wall_delta(&mut self) -> f32 {
        self.time.tick();
        self.time.delta_seconds()
    }

    pub fn begin_frame(&mut self, dt: f32) -> FrameTick {
        let dt = self.sanitize(dt);
        self.frame += 1;
        self.elapsed += dt as f64;
        self.mixer.borrow_mut().advance(dt);
        FrameTick { frame: self.frame, dt, elapsed: self.elapsed }
    }

    pub fn mixer(&self) -> Rc<RefCell<AnimationMixer>> {
        Rc::clone(&self.mixer)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}
