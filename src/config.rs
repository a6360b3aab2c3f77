//! Board constants and the runtime configuration of the sampler.

use fugit::HertzU32;

use crate::error::Error;

/// One raw conversion result, right aligned.
pub type Sample = u16;

/// Number of analog inputs routed to ADC1.
pub const NUM_CHANNELS: usize = 16;

/// Regular sequence length supported by the converter.
pub const MAX_SCAN_LEN: usize = 16;

/// Largest supported smoothing window is `2^MAX_SMOOTHING_LOG` samples.
pub const MAX_SMOOTHING_LOG: u8 = 7;

pub const SAMPLE_BITS: u32 = 12;
pub const SAMPLE_MAX: Sample = (1 << SAMPLE_BITS) - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum Port {
    A,
    B,
    C,
}

/// GPIO backing each ADC1 input, indexed by channel id.
pub const ANALOG_PINS: [(Port, u8); NUM_CHANNELS] = [
    (Port::A, 0),
    (Port::A, 1),
    (Port::A, 2),
    (Port::A, 3),
    (Port::A, 4),
    (Port::A, 5),
    (Port::A, 6),
    (Port::A, 7),
    (Port::B, 0),
    (Port::B, 1),
    (Port::C, 0),
    (Port::C, 1),
    (Port::C, 2),
    (Port::C, 3),
    (Port::C, 4),
    (Port::C, 5),
];

/// Timers whose TRGO output can start an ADC1 regular conversion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum TriggerTimer {
    Tim2,
    Tim4,
}

impl TriggerTimer {
    /// Value of the converter's EXTSEL field selecting this timer's TRGO
    pub const fn extsel(self) -> u8 {
        match self {
            TriggerTimer::Tim2 => 0b1011,
            TriggerTimer::Tim4 => 0b1100,
        }
    }
}

impl TryFrom<u8> for TriggerTimer {
    type Error = Error;

    /// Maps a timer number (as in `TIMx`) to a trigger source.
    fn try_from(number: u8) -> Result<Self, Self::Error> {
        match number {
            2 => Ok(TriggerTimer::Tim2),
            4 => Ok(TriggerTimer::Tim4),
            _ => Err(Error::InvalidTimer),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Input clock of the trigger timer, before its prescaler
    pub timer_clock: HertzU32,
    pub timer: TriggerTimer,
    /// Scan rate applied at init. Zero selects software triggering.
    pub sample_rate: HertzU32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            timer_clock: HertzU32::MHz(108),
            timer: TriggerTimer::Tim2,
            sample_rate: HertzU32::Hz(0),
        }
    }
}
