use rand::Rng;

use crate::{validate_resolve_rate, ScrambleError, DEFAULT_GLYPHS, MIN_GLYPHS};

/// Fixed set of distinct noise glyphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphAlphabet(Vec<char>);

impl GlyphAlphabet {
    pub fn new(glyphs: &str) -> Result<Self, ScrambleError> {
        let mut distinct = Vec::new();
        for glyph in glyphs.chars() {
            if !distinct.contains(&glyph) {
                distinct.push(glyph);
            }
        }
        if distinct.len() < MIN_GLYPHS {
            return Err(ScrambleError::GlyphAlphabetTooSmall {
                min: MIN_GLYPHS,
                actual: distinct.len(),
            });
        }
        Ok(Self(distinct))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, glyph: char) -> bool {
        self.0.contains(&glyph)
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> char {
        self.0[rng.gen_range(0..self.0.len())]
    }
}

impl Default for GlyphAlphabet {
    fn default() -> Self {
        Self(DEFAULT_GLYPHS.chars().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealFrame {
    pub text: String,
    /// Number of leading characters showing the target.
    pub resolved: usize,
    pub is_final: bool,
}

/// Progress of one reveal run, driven one tick at a time.
#[derive(Debug, Clone)]
pub struct RevealState {
    target: Vec<char>,
    resolve_rate: f64,
    resolved_count: f64,
    finished: bool,
}

impl RevealState {
    pub fn new(target: &str, resolve_rate: f64) -> Result<Self, ScrambleError> {
        validate_resolve_rate(resolve_rate)?;
        let target: Vec<char> = target.chars().collect();
        let finished = target.is_empty();
        Ok(Self {
            target,
            resolve_rate,
            resolved_count: 0.0,
            finished,
        })
    }

    pub fn resolved_count(&self) -> f64 {
        self.resolved_count
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn reset(&mut self) {
        self.resolved_count = 0.0;
        self.finished = self.target.is_empty();
    }

    /// Renders the next frame and advances progress. Returns `None` once the
    /// final frame has been produced (or immediately for an empty target).
    pub fn tick<R: Rng>(
        &mut self,
        glyphs: &GlyphAlphabet,
        rng: &mut R,
    ) -> Option<RevealFrame> {
        if self.finished {
            return None;
        }

        let resolved = self.resolved_prefix();
        let text = self
            .target
            .iter()
            .enumerate()
            .map(|(idx, &ch)| if idx < resolved { ch } else { glyphs.pick(rng) })
            .collect();

        let is_final = self.resolved_count >= self.target.len() as f64;
        self.finished = is_final;
        self.resolved_count += self.resolve_rate;

        Some(RevealFrame {
            text,
            resolved,
            is_final,
        })
    }

    fn resolved_prefix(&self) -> usize {
        (self.resolved_count.floor() as usize).min(self.target.len())
    }
}
