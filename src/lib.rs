// Cadenza - terminal music player
// Weighted shuffle, raw-mode keyboard control, Discord presence mirroring
// and an optional listen-along share session.

pub mod audio;    // playback engine trait + rodio backend + duration probing
pub mod config;   // settings and preferences
pub mod library;  // track discovery in the working directory
pub mod player;   // playback control loop and state machine
pub mod presence; // Discord Rich Presence bridge
pub mod share;    // listen-along share endpoint
pub mod term;     // raw terminal input and redraw primitives
pub mod weights;  // weighted track selection

// Export the stuff other modules actually use
pub use audio::{AudioEngine, RodioEngine};
pub use config::Config;
pub use library::Track;
pub use player::Player;
pub use presence::PresenceBridge;
pub use share::ShareBridge;
