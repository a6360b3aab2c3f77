//! What the sampler needs from the converter, its DMA stream and the trigger
//! timer.
//!
//! Everything here is register plumbing without policy. The ordering rules
//! (trigger off before reconfiguring, flags cleared before re-enabling) live
//! in the sequencer and the sampler, so they can be exercised against a mock.

use crate::channel::ChannelId;
use crate::clock::TimerSetting;
use crate::config::{Sample, TriggerTimer};

pub trait AdcPlatform {
    /// Largest value of both the trigger timer's period and its prescaler
    const MAX_COUNT: u32;

    /// Longest regular sequence the converter can scan
    const MAX_SCAN_LEN: usize;

    /// Stops timer edges from starting conversions.
    fn disable_trigger(&mut self);

    /// Lets the selected timer start a scan on each of its update events.
    fn enable_trigger(&mut self);

    /// Starts a single scan right away.
    fn software_start(&mut self);

    /// Stops DMA requests from the converter and disables the stream.
    fn stop_transfers(&mut self);

    /// Powers the converter down and brings its configuration back to defaults.
    fn reset_converter(&mut self);

    fn configure_analog_input(&mut self, channel: ChannelId);

    /// Programs `scan` as the regular sequence, first element at rank one,
    /// and powers the converter up.
    fn program_sequence(&mut self, scan: &[ChannelId]);

    /// Points the stream at the scratch buffer for `len` conversions in
    /// circular mode, clears stale flags and enables converter DMA requests.
    fn start_transfers(&mut self, len: usize);

    /// Acknowledges a finished transfer.
    fn clear_completion(&mut self);

    fn enable_completion_interrupt(&mut self);

    fn disable_completion_interrupt(&mut self);

    fn completion_interrupt_enabled(&self) -> bool;

    /// Loads the trigger timer, or stops it for software triggering.
    fn configure_timer(&mut self, timer: TriggerTimer, setting: Option<TimerSetting>);

    /// Conversions of the last completed scan, in sequence order.
    fn scan(&self) -> &[Sample];
}
