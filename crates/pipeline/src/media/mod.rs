//! Media playback
//!
//! Long-form audio (songs, stories) plays through an external decoder process
//! fed over stdin, independent of the speech queue so it can be started,
//! replaced and stopped on its own.

mod player;

pub use player::{play_bytes, FfplayPlayer, PlayerCommand};
