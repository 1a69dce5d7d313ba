//! Scale bounds and zoom stepping
//!
//! Commands may ask for any scale; the viewer clamps it into the configured
//! range before quantizing it into a [`ScaleBucket`].

use super::types::ScaleBucket;

/// Scale limits and zoom step for a viewer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Zoom {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            min: Self::MIN_SCALE,
            max: Self::MAX_SCALE,
            step: Self::STEP,
        }
    }
}

impl Zoom {
    /// Smallest scale the viewer will render at (50%)
    pub const MIN_SCALE: f32 = 0.5;
    /// Largest scale the viewer will render at (300%)
    pub const MAX_SCALE: f32 = 3.0;
    /// Zoom in/out increment
    pub const STEP: f32 = 0.2;

    #[must_use]
    pub fn new(min: f32, max: f32, step: f32) -> Self {
        Self { min, max, step }
    }

    /// Clamp into `[min, max]`, handling NaN/Inf
    #[must_use]
    pub fn clamp(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            1.0_f32.clamp(self.min, self.max)
        } else {
            scale.clamp(self.min, self.max)
        }
    }

    /// True when `scale` had to be changed by [`Zoom::clamp`]
    #[must_use]
    pub fn is_out_of_range(&self, scale: f32) -> bool {
        !scale.is_finite() || scale < self.min || scale > self.max
    }

    #[must_use]
    pub fn step_in(&self, scale: f32) -> f32 {
        self.clamp(scale + self.step)
    }

    #[must_use]
    pub fn step_out(&self, scale: f32) -> f32 {
        self.clamp(scale - self.step)
    }

    #[must_use]
    pub fn bucket(&self, scale: f32) -> ScaleBucket {
        ScaleBucket::from_scale(self.clamp(scale))
    }
}
