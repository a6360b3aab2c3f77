#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod hal;
pub mod ring_buffer;
pub mod sampler;
pub mod sequencer;
pub mod smoothing;
pub mod stm32;
pub mod stream;

pub use channel::ChannelId;
pub use config::{Sample, SamplerConfig};
pub use error::Error;
pub use sampler::Sampler;
