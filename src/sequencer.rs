//! Scan list bookkeeping and hardware re-programming of the converter.

use heapless::Vec;

use crate::channel::{ChannelId, ChannelMask};
use crate::config::{TriggerTimer, MAX_SCAN_LEN};
use crate::hal::AdcPlatform;

/// State of the one converter unit the sampler drives.
pub struct DeviceState {
    running: bool,
    clocked: bool,
    active: ChannelMask,
    scan_list: Vec<ChannelId, MAX_SCAN_LEN>,
    /// Channel membership changed since the hardware was last programmed
    stale: bool,
    timer: TriggerTimer,
}

impl DeviceState {
    pub const fn new(timer: TriggerTimer) -> Self {
        Self {
            running: false,
            clocked: false,
            active: ChannelMask::empty(),
            scan_list: Vec::new(),
            stale: false,
            timer,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Scans are started by the trigger timer rather than by software
    pub fn is_clocked(&self) -> bool {
        self.clocked
    }

    pub fn active(&self) -> ChannelMask {
        self.active
    }

    /// Channels in the order the hardware scans them, as last programmed
    pub fn scan_list(&self) -> &[ChannelId] {
        &self.scan_list
    }

    pub fn timer(&self) -> TriggerTimer {
        self.timer
    }

    pub fn needs_rebuild(&self) -> bool {
        self.stale
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub(crate) fn set_clocked(&mut self, clocked: bool) {
        self.clocked = clocked;
    }

    pub(crate) fn activate(&mut self, id: ChannelId) {
        if !self.active.contains(id) {
            self.active.insert(id);
            self.stale = true;
        }
    }

    pub(crate) fn deactivate(&mut self, id: ChannelId) {
        if self.active.contains(id) {
            self.active.remove(id);
            self.stale = true;
        }
    }

    /// Re-programs converter and DMA for the current set of active channels.
    ///
    /// The trigger is switched off before anything is touched: the converter
    /// tolerates configuration changes mid-scan, but not a changed channel
    /// mapping. With no active channels everything is left disabled.
    pub fn rebuild_sequence<P: AdcPlatform>(&mut self, platform: &mut P) {
        platform.disable_trigger();
        platform.stop_transfers();
        platform.reset_converter();

        self.scan_list.clear();
        self.stale = false;

        let max_len = P::MAX_SCAN_LEN.min(MAX_SCAN_LEN);
        for id in self.active.iter() {
            if self.scan_list.len() == max_len || self.scan_list.push(id).is_err() {
                error!("Channel {} does not fit the scan sequence", id);
                continue;
            }
            platform.configure_analog_input(id);
        }

        if self.scan_list.is_empty() {
            trace!("Empty scan sequence, converter left disabled");
            return;
        }

        platform.program_sequence(&self.scan_list);
        platform.start_transfers(self.scan_list.len());

        if self.clocked && self.running {
            platform.enable_trigger();
        }

        trace!("Scan sequence rebuilt with {} channels", self.scan_list.len());
    }
}
