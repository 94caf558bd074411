//! Core traits for the turn-taking engine
//!
//! Backends sit behind these traits so the detector, dispatcher and action
//! loop can be driven with fakes in tests and swapped through configuration.
//!
//! ```text
//! Turn detection:
//!   - TurnClassifier: audio window -> end-of-turn verdict
//!
//! Output:
//!   - SpeechSynthesizer: text -> audible speech
//!   - MediaPlayer: long-form audio playback (songs, stories)
//! ```

mod classifier;
mod media;
mod speech;

pub use classifier::TurnClassifier;
pub use media::MediaPlayer;
pub use speech::SpeechSynthesizer;
