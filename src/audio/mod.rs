// Audio playback - a small trait over the handful of engine operations the
// control loop needs, so the state machine can be driven by a fake in tests.

pub mod engine;
pub mod probe;

pub use engine::RodioEngine;

use anyhow::Result;
use std::path::Path;

// The engine is a single-owner resource mutated only from the foreground
// loop, so the trait carries no Send bound (rodio's output stream has none).
pub trait AudioEngine {
    /// Load a file and start playing it from the beginning.
    fn load(&mut self, path: &Path) -> Result<()>;
    fn pause(&mut self);
    fn unpause(&mut self);
    /// True while a track is loaded and not yet finished (paused counts as busy).
    fn is_busy(&self) -> bool;
    /// Playback position within the current track. Frozen while paused.
    fn position_millis(&self) -> u64;
    fn set_volume(&mut self, volume: f32);
}
