use core::fmt;

use crate::config::{Sample, NUM_CHANNELS};
use crate::error::Error;
use crate::ring_buffer::Producer;
use crate::smoothing::Smoother;

/// Index of one of the board's analog inputs, checked on construction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, defmt::Format)]
pub struct ChannelId(u8);

impl ChannelId {
    pub const fn new(id: u8) -> Result<Self, Error> {
        if (id as usize) < NUM_CHANNELS {
            Ok(Self(id))
        } else {
            Err(Error::InvalidChannel)
        }
    }

    /// Id of the channel at `index`, which must be below [`NUM_CHANNELS`].
    pub(crate) const fn from_index(index: usize) -> Self {
        assert!(index < NUM_CHANNELS);
        Self(index as u8)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..NUM_CHANNELS as u8).map(ChannelId)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of channels, iterated in ascending id order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, defmt::Format)]
pub struct ChannelMask(u32);

impl ChannelMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, id: ChannelId) {
        self.0 |= 1 << id.get();
    }

    pub fn remove(&mut self, id: ChannelId) {
        self.0 &= !(1 << id.get());
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.0 & (1 << id.get()) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        ChannelId::all().filter(move |&id| self.contains(id))
    }
}

/// How many samples a started channel should deliver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum Acquisition {
    /// Keep sampling until explicitly stopped
    FreeRunning,
    /// Stop after this many samples; never zero
    Count(u32),
}

impl Acquisition {
    /// Zero requests free-running acquisition.
    pub const fn from_count(count: u32) -> Self {
        match count {
            0 => Acquisition::FreeRunning,
            n => Acquisition::Count(n),
        }
    }

    pub const fn requested(self) -> u32 {
        match self {
            Acquisition::FreeRunning => 0,
            Acquisition::Count(n) => n,
        }
    }
}

/// Per-channel acquisition policy and live status.
///
/// Everything but the sink is written from interrupt context only while the
/// channel is active; task context writes it only with the completion
/// interrupt masked.
pub struct ChannelState<'a, const CAP: usize> {
    id: ChannelId,
    active: bool,
    op_pending: bool,
    acquisition: Acquisition,
    samples_delivered: u32,
    smoother: Smoother,
    latest: Option<Sample>,
    value_fresh: bool,
    overruns: u32,
    sink: Option<Producer<'a, Sample, CAP>>,
}

impl<'a, const CAP: usize> ChannelState<'a, CAP> {
    pub fn new(id: ChannelId, sink: Option<Producer<'a, Sample, CAP>>) -> Self {
        Self {
            id,
            active: false,
            op_pending: false,
            acquisition: Acquisition::FreeRunning,
            samples_delivered: 0,
            smoother: Smoother::new(),
            latest: None,
            value_fresh: false,
            overruns: 0,
            sink,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// A started acquisition that has not delivered everything yet
    pub fn is_pending(&self) -> bool {
        self.op_pending
    }

    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    pub fn samples_delivered(&self) -> u32 {
        self.samples_delivered
    }

    pub fn smoothing_log_depth(&self) -> u8 {
        self.smoother.log_depth()
    }

    pub fn is_smoothing_ready(&self) -> bool {
        self.smoother.is_ready()
    }

    pub fn is_fresh(&self) -> bool {
        self.value_fresh
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Latest released value. Smoothed channels report nothing until their
    /// window has filled.
    pub fn latest(&self) -> Option<Sample> {
        self.latest
    }

    /// Reads the latest value, marking it as consumed.
    pub fn take_latest(&mut self) -> Option<Sample> {
        self.value_fresh = false;
        self.latest
    }

    /// Starts (or restarts) an acquisition. Parameters of a later call replace
    /// those of an earlier one.
    pub fn activate(
        &mut self,
        acquisition: Acquisition,
        smoothing_log_depth: u8,
    ) -> Result<(), Error> {
        self.smoother.configure(smoothing_log_depth)?;
        self.acquisition = acquisition;
        self.samples_delivered = 0;
        self.latest = None;
        self.value_fresh = false;
        self.active = true;
        self.op_pending = true;
        Ok(())
    }

    pub fn set_smoothing(&mut self, smoothing_log_depth: u8) -> Result<(), Error> {
        self.smoother.configure(smoothing_log_depth)
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.op_pending = false;
    }

    /// Forgets a scan that could not be trusted.
    pub fn discard_scan(&mut self) {
        self.value_fresh = false;
        self.smoother.reset();
    }

    /// Takes one raw conversion out of a completed scan.
    ///
    /// Returns true once the channel has delivered every requested sample and
    /// should be stopped.
    pub fn accept(&mut self, raw: Sample) -> bool {
        debug_assert!(self.active);

        let value = if self.smoother.is_enabled() {
            let warming_up = !self.smoother.is_ready();
            self.smoother.feed(raw);
            if warming_up {
                return false;
            }
            match self.smoother.average() {
                Some(value) => value,
                None => return false,
            }
        } else {
            raw
        };

        self.latest = Some(value);
        self.value_fresh = true;

        // Single-shot requests are read through `latest`
        if self.acquisition != Acquisition::Count(1) {
            if let Some(sink) = &mut self.sink {
                if sink.push(value) {
                    self.value_fresh = false;
                } else {
                    self.overruns = self.overruns.saturating_add(1);
                    warn!("Channel {} sample buffer full, {} overruns", self.id, self.overruns);
                }
            }
        }

        self.samples_delivered = self.samples_delivered.saturating_add(1);

        match self.acquisition {
            Acquisition::FreeRunning => false,
            Acquisition::Count(n) => self.samples_delivered >= n,
        }
    }
}
