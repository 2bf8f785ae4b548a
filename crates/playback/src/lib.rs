//! Real-time playback of recorded multi-sensor capture files.
//!
//! [`PlaybackEngine`] indexes a capture file incrementally, decodes frames
//! of the enabled streams just ahead of their due time, and hands each
//! sample to a consumer callback paced against the wall clock.

pub mod config;
pub mod engine;
pub mod error;
pub mod pacer;
pub mod prefetch;
mod shared;
pub mod sink;

pub use config::PlaybackConfig;
pub use engine::PlaybackEngine;
pub use error::PlaybackError;
pub use pacer::Pacer;
pub use prefetch::{ActiveStreamInfo, BufferLimits, PrefetchBuffer};
pub use sink::PlaybackEvent;

pub use rp_demux::DropStats;
