use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rand::{rngs::StdRng, SeedableRng};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{validate_timing, GlyphAlphabet, RevealState, ScrambleConfig, ScrambleError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrambleFrame {
    /// Run that produced the frame; bumps on every start or retrigger.
    pub generation: u64,
    pub text: String,
    pub resolved: usize,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
struct RevealRun {
    target: String,
    tick_interval: Duration,
    resolve_rate: f64,
}

/// Owns the ticking task of one run. Dropping it stops the timer.
struct TimerGuard {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Timed reveal driver. At most one timer is alive per engine; frames from a
/// superseded run are never delivered.
///
/// Must be started from within a tokio runtime.
pub struct ScrambleEngine {
    config: ScrambleConfig,
    frames: mpsc::UnboundedSender<ScrambleFrame>,
    current_generation: Arc<Mutex<u64>>,
    last_run: Option<RevealRun>,
    timer: Option<TimerGuard>,
    seed: Option<u64>,
}

impl ScrambleEngine {
    pub fn new(
        config: ScrambleConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ScrambleFrame>), ScrambleError> {
        config.validate()?;
        let (frames, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                config,
                frames,
                current_generation: Arc::new(Mutex::new(0)),
                last_run: None,
                timer: None,
                seed: None,
            },
            rx,
        ))
    }

    /// Makes the noise reproducible; each run derives its own stream from the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.last_run.as_ref().map(|run| run.target.as_str())
    }

    pub fn generation(&self) -> u64 {
        *lock_generation(&self.current_generation)
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|timer| !timer.task.is_finished())
    }

    /// Starts a reveal of `target` with the configured timing. Returns `false`
    /// and leaves the engine untouched when `target` is empty.
    pub fn start(&mut self, target: &str) -> bool {
        let run = RevealRun {
            target: target.to_string(),
            tick_interval: self.config.tick_interval,
            resolve_rate: self.config.resolve_rate,
        };
        self.launch(run)
    }

    pub fn start_with(
        &mut self,
        target: &str,
        tick_interval: Duration,
        resolve_rate: f64,
    ) -> Result<bool, ScrambleError> {
        validate_timing(tick_interval, resolve_rate)?;
        Ok(self.launch(RevealRun {
            target: target.to_string(),
            tick_interval,
            resolve_rate,
        }))
    }

    /// Restarts the last run from zero. Returns `false` if nothing was started yet.
    pub fn retrigger(&mut self) -> bool {
        match self.last_run.clone() {
            Some(run) => self.launch(run),
            None => false,
        }
    }

    pub fn cancel(&mut self) {
        // Bumping the generation first fences off a tick that is mid-send.
        let mut generation = lock_generation(&self.current_generation);
        *generation += 1;
        drop(generation);

        if let Some(timer) = self.timer.take() {
            debug!("scramble: cancelled generation={}", timer.generation);
        }
    }

    fn launch(&mut self, run: RevealRun) -> bool {
        if run.target.is_empty() {
            return false;
        }

        let state = match RevealState::new(&run.target, run.resolve_rate) {
            Ok(state) => state,
            Err(err) => {
                debug!("scramble: rejected run err={err}");
                return false;
            }
        };

        let generation = {
            let mut current = lock_generation(&self.current_generation);
            *current += 1;
            *current
        };

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(generation)),
            None => StdRng::from_entropy(),
        };

        let task = spawn_ticker(
            generation,
            state,
            self.config.glyphs.clone(),
            rng,
            run.tick_interval,
            Arc::clone(&self.current_generation),
            self.frames.clone(),
        );

        debug!(
            "scramble: started generation={} chars={} interval_ms={}",
            generation,
            run.target.chars().count(),
            run.tick_interval.as_millis()
        );

        // Replacing the guard aborts the previous run's task.
        self.timer = Some(TimerGuard { generation, task });
        self.last_run = Some(run);
        true
    }
}

impl Drop for ScrambleEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn spawn_ticker(
    generation: u64,
    mut state: RevealState,
    glyphs: GlyphAlphabet,
    mut rng: StdRng,
    tick_interval: Duration,
    current_generation: Arc<Mutex<u64>>,
    frames: mpsc::UnboundedSender<ScrambleFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let current = lock_generation(&current_generation);
            if *current != generation {
                break;
            }
            let Some(frame) = state.tick(&glyphs, &mut rng) else {
                break;
            };
            let is_final = frame.is_final;
            let sent = frames.send(ScrambleFrame {
                generation,
                text: frame.text,
                resolved: frame.resolved,
                is_final,
            });
            drop(current);

            if sent.is_err() {
                debug!("scramble: frame receiver dropped generation={generation}");
                break;
            }
            if is_final {
                debug!("scramble: resolved generation={generation}");
                break;
            }
        }
    })
}

fn lock_generation(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    generation
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
