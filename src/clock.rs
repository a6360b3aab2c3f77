//! Mapping of a requested scan rate onto the trigger timer.

use fugit::HertzU32;

use crate::error::Error;

/// Divisors loaded into the trigger timer. Both are at least one; the
/// registers hold these values minus one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub struct TimerSetting {
    pub prescaler: u32,
    pub period: u32,
}

impl TimerSetting {
    /// Derives prescaler and period for `requested` from a timer running at
    /// `timer_clock` whose counter and prescaler both span `1..=max_count`.
    pub fn for_rate(
        timer_clock: HertzU32,
        requested: HertzU32,
        max_count: u32,
    ) -> Result<Self, Error> {
        let requested = requested.to_Hz();
        if requested == 0 {
            return Err(Error::ClockUnachievable);
        }

        let period = timer_clock.to_Hz() / requested;
        if period == 0 {
            return Err(Error::ClockUnachievable);
        }

        let prescaler = period / max_count + 1;
        if prescaler > max_count {
            return Err(Error::ClockUnachievable);
        }

        let period = (period / prescaler).clamp(1, max_count);

        Ok(Self { prescaler, period })
    }

    /// Rate actually produced, which may differ from the one requested
    pub fn frequency(&self, timer_clock: HertzU32) -> HertzU32 {
        HertzU32::Hz(timer_clock.to_Hz() / self.prescaler / self.period)
    }
}

/// What starts a scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum Trigger {
    /// Every scan is started explicitly
    Software,
    /// Scans start on each update event of the trigger timer
    Timer(TimerSetting),
}

impl Trigger {
    /// A zero rate selects software triggering.
    pub fn for_rate(
        timer_clock: HertzU32,
        requested: HertzU32,
        max_count: u32,
    ) -> Result<Self, Error> {
        if requested.to_Hz() == 0 {
            Ok(Trigger::Software)
        } else {
            TimerSetting::for_rate(timer_clock, requested, max_count).map(Trigger::Timer)
        }
    }

    pub fn is_clocked(&self) -> bool {
        matches!(self, Trigger::Timer(_))
    }

    /// Achieved scan rate; zero for software triggering.
    pub fn frequency(&self, timer_clock: HertzU32) -> HertzU32 {
        match self {
            Trigger::Software => HertzU32::Hz(0),
            Trigger::Timer(setting) => setting.frequency(timer_clock),
        }
    }
}
