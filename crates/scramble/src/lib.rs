//! Scramble-reveal text effect: text resolves left to right out of random glyph noise.

use std::time::Duration;

use thiserror::Error;

mod engine;
mod reveal;

pub use engine::{ScrambleEngine, ScrambleFrame};
pub use reveal::{GlyphAlphabet, RevealFrame, RevealState};

pub const DEFAULT_GLYPHS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890!@#$%^&*()_+-=[]{}|;:,.<>?";
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30);
/// Three ticks per character on average.
pub const DEFAULT_RESOLVE_RATE: f64 = 1.0 / 3.0;
pub const MIN_GLYPHS: usize = 20;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrambleError {
    #[error("resolve rate must be finite and positive, got {0}")]
    InvalidResolveRate(f64),
    #[error("tick interval must be non-zero")]
    ZeroTickInterval,
    #[error("glyph alphabet needs at least {min} distinct characters, got {actual}")]
    GlyphAlphabetTooSmall { min: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct ScrambleConfig {
    pub tick_interval: Duration,
    pub resolve_rate: f64,
    pub glyphs: GlyphAlphabet,
}

impl Default for ScrambleConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            resolve_rate: DEFAULT_RESOLVE_RATE,
            glyphs: GlyphAlphabet::default(),
        }
    }
}

impl ScrambleConfig {
    pub fn new(
        tick_interval: Duration,
        resolve_rate: f64,
        glyphs: GlyphAlphabet,
    ) -> Result<Self, ScrambleError> {
        let config = Self {
            tick_interval,
            resolve_rate,
            glyphs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_timing(tick_interval: Duration, resolve_rate: f64) -> Result<Self, ScrambleError> {
        Self::new(tick_interval, resolve_rate, GlyphAlphabet::default())
    }

    pub fn validate(&self) -> Result<(), ScrambleError> {
        validate_timing(self.tick_interval, self.resolve_rate)
    }
}

pub(crate) fn validate_timing(
    tick_interval: Duration,
    resolve_rate: f64,
) -> Result<(), ScrambleError> {
    if tick_interval.is_zero() {
        return Err(ScrambleError::ZeroTickInterval);
    }
    validate_resolve_rate(resolve_rate)
}

pub(crate) fn validate_resolve_rate(resolve_rate: f64) -> Result<(), ScrambleError> {
    if !resolve_rate.is_finite() || resolve_rate <= 0.0 {
        return Err(ScrambleError::InvalidResolveRate(resolve_rate));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
