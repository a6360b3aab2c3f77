//! The sampler context: channel lifecycle from task context and the scan
//! completion handler run from the DMA interrupt.

use fugit::HertzU32;

use crate::channel::{Acquisition, ChannelId, ChannelState};
use crate::clock::Trigger;
use crate::config::{Sample, SamplerConfig, MAX_SCAN_LEN, MAX_SMOOTHING_LOG, NUM_CHANNELS};
use crate::error::Error;
use crate::hal::AdcPlatform;
use crate::sequencer::DeviceState;
use crate::stream::SampleSinks;

/// Owns the converter and all channel and device state.
///
/// Task context calls the configuration methods, the DMA completion interrupt
/// calls [`Sampler::on_scan_complete`]. Every task context method that touches
/// state shared with the interrupt does so with the completion interrupt
/// masked, so both may hold the sampler behind the same lock or share it
/// through any other scheme that prevents them running at the same time.
pub struct Sampler<'a, P: AdcPlatform, const CAP: usize> {
    platform: P,
    config: SamplerConfig,
    device: DeviceState,
    channels: [ChannelState<'a, CAP>; NUM_CHANNELS],
}

impl<'a, P: AdcPlatform, const CAP: usize> Sampler<'a, P, CAP> {
    pub fn new(
        platform: P,
        config: SamplerConfig,
        mut sinks: SampleSinks<'a, CAP>,
    ) -> Result<Self, Error> {
        let channels = core::array::from_fn(|i| {
            let id = ChannelId::from_index(i);
            ChannelState::new(id, sinks.take(id))
        });

        let mut this = Self {
            platform,
            config,
            device: DeviceState::new(config.timer),
            channels,
        };

        this.platform.disable_completion_interrupt();
        this.device.rebuild_sequence(&mut this.platform);
        this.set_clock(config.sample_rate)?;

        Ok(this)
    }

    /// Tears the sampler down, handing back the hardware.
    pub fn release(mut self) -> P {
        self.shutdown();
        self.platform
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn channel(&self, id: ChannelId) -> &ChannelState<'a, CAP> {
        &self.channels[id.index()]
    }

    pub fn is_running(&self) -> bool {
        self.device.is_running()
    }

    pub fn active_channel_count(&self) -> u32 {
        self.device.active().len() as u32
    }

    /// Runs `f` with the completion interrupt masked, unmasking it afterwards
    /// if it was enabled before and the device is still running.
    fn with_completion_masked<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_enabled = self.platform.completion_interrupt_enabled();
        if was_enabled {
            self.platform.disable_completion_interrupt();
        }

        let result = f(self);

        if was_enabled
            && self.device.is_running()
            && !self.platform.completion_interrupt_enabled()
        {
            self.platform.enable_completion_interrupt();
        }
        result
    }

    /// Starts acquiring `sample_count` samples (zero for free-running) on
    /// `id`, averaging over `2^smoothing_log_depth` conversions.
    ///
    /// Starting an active channel restarts it with the new parameters. When
    /// the device is already running the new channel joins the scan at the
    /// next completion; otherwise the device is started right away.
    pub fn start_channel(
        &mut self,
        id: ChannelId,
        sample_count: u32,
        smoothing_log_depth: u8,
    ) -> Result<(), Error> {
        if smoothing_log_depth > MAX_SMOOTHING_LOG {
            return Err(Error::InvalidSmoothing);
        }

        let joining = !self.device.active().contains(id);
        if joining && self.device.active().len() >= P::MAX_SCAN_LEN.min(MAX_SCAN_LEN) {
            return Err(Error::SequenceFull);
        }

        self.with_completion_masked(|this| {
            let acquisition = Acquisition::from_count(sample_count);
            this.channels[id.index()].activate(acquisition, smoothing_log_depth)?;
            this.device.activate(id);
            debug!("Channel {} started, {} samples", id, sample_count);

            if !this.device.is_running() {
                this.device.rebuild_sequence(&mut this.platform);
                this.device.set_running(true);
                this.platform.clear_completion();
                this.platform.enable_completion_interrupt();
                this.arm();
                info!("Sampler running");
            }
            Ok(())
        })
    }

    /// Stops `id`. Stopping an inactive channel does nothing.
    ///
    /// The scan sequence is rebuilt at the next completion; the stopped
    /// channel receives nothing from the scans in between.
    pub fn stop_channel(&mut self, id: ChannelId) {
        self.with_completion_masked(|this| this.stop(id))
    }

    fn stop(&mut self, id: ChannelId) {
        let channel = &mut self.channels[id.index()];
        if !channel.is_active() {
            return;
        }

        channel.deactivate();
        self.device.deactivate(id);
        debug!("Channel {} stopped after {} samples", id, channel.samples_delivered());

        if self.device.active().is_empty() {
            self.platform.disable_trigger();
            self.platform.disable_completion_interrupt();
            self.device.set_running(false);
            info!("Sampler idle");
        }
    }

    /// Stops every channel, leaving the device idle.
    pub fn shutdown(&mut self) {
        self.with_completion_masked(|this| {
            for id in this.device.active().iter() {
                this.stop(id);
            }
        })
    }

    /// Sets the scan rate, zero selecting software triggering, and returns the
    /// rate actually achieved.
    pub fn set_clock(&mut self, frequency: HertzU32) -> Result<HertzU32, Error> {
        let trigger = Trigger::for_rate(self.config.timer_clock, frequency, P::MAX_COUNT)?;

        self.with_completion_masked(|this| {
            let was_clocked = this.device.is_clocked();
            this.platform.disable_trigger();

            let setting = match trigger {
                Trigger::Software => None,
                Trigger::Timer(setting) => Some(setting),
            };
            this.platform.configure_timer(this.device.timer(), setting);
            this.device.set_clocked(trigger.is_clocked());

            if this.device.is_running() {
                if trigger.is_clocked() {
                    this.platform.enable_trigger();
                } else if was_clocked {
                    // Nothing is in flight to start the next scan
                    this.platform.software_start();
                }
            }
        });

        let actual = trigger.frequency(self.config.timer_clock);
        info!("Scan rate {} Hz requested, {} Hz set", frequency.to_Hz(), actual.to_Hz());
        Ok(actual)
    }

    /// Changes the smoothing window of a started channel, discarding what it
    /// accumulated. Nothing is released until the new window has filled.
    ///
    /// Starting a channel sets its window anew, so an inactive channel is
    /// refused with [`Error::NotRunning`] instead of keeping a depth the next
    /// start would overwrite.
    pub fn set_smoothing(&mut self, id: ChannelId, smoothing_log_depth: u8) -> Result<(), Error> {
        if smoothing_log_depth > MAX_SMOOTHING_LOG {
            return Err(Error::InvalidSmoothing);
        }
        if !self.channels[id.index()].is_active() {
            return Err(Error::NotRunning);
        }

        self.with_completion_masked(|this| {
            this.channels[id.index()].set_smoothing(smoothing_log_depth)
        })
    }

    /// Starts a scan by software, on top of whatever trigger is configured.
    pub fn trigger_scan(&mut self) -> Result<(), Error> {
        if !self.device.is_running() {
            return Err(Error::NotRunning);
        }
        self.platform.software_start();
        Ok(())
    }

    /// Latest value of `id`, or `None` if it has not produced one since it
    /// was last started.
    pub fn read_latest(&mut self, id: ChannelId) -> Option<Sample> {
        self.with_completion_masked(|this| this.channels[id.index()].take_latest())
    }

    /// A value arrived that has not been read or queued yet
    pub fn is_fresh(&self, id: ChannelId) -> bool {
        self.channels[id.index()].is_fresh()
    }

    pub fn samples_delivered(&self, id: ChannelId) -> u32 {
        self.channels[id.index()].samples_delivered()
    }

    pub fn overruns(&self, id: ChannelId) -> u32 {
        self.channels[id.index()].overruns()
    }

    fn arm(&mut self) {
        if self.device.is_clocked() {
            self.platform.enable_trigger();
        } else {
            self.platform.software_start();
        }
    }

    /// Handles the end of a scan. Must be called from the DMA transfer
    /// complete interrupt.
    ///
    /// Hands each conversion to its channel, stops channels that got all
    /// they asked for, picks up membership changes and, in software trigger
    /// mode, starts the next scan.
    pub fn on_scan_complete(&mut self) {
        self.platform.clear_completion();

        if !self.device.is_running() {
            trace!("Completion while idle ignored");
            return;
        }

        let scan_len = self.device.scan_list().len();
        let captured = self.platform.scan().len();
        if captured < scan_len {
            error!("Short scan: {} of {} conversions", captured, scan_len);
        }

        for pos in 0..scan_len {
            let id = self.device.scan_list()[pos];
            let channel = &mut self.channels[id.index()];

            // Stopped since the sequence was programmed
            if !channel.is_active() {
                continue;
            }

            match self.platform.scan().get(pos).copied() {
                Some(raw) => {
                    if channel.accept(raw) {
                        self.stop(id);
                    }
                }
                None => channel.discard_scan(),
            }
        }

        if self.device.is_running() {
            if self.device.needs_rebuild() {
                self.device.rebuild_sequence(&mut self.platform);
            }
            if !self.device.is_clocked() {
                self.platform.software_start();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TimerSetting;
    use crate::config::TriggerTimer;
    use crate::hal::mock::{Call, MockAdc};
    use crate::stream::{self, SampleBuffers};

    const CAP: usize = 32;

    fn id(n: u8) -> ChannelId {
        ChannelId::new(n).unwrap()
    }

    fn buffers() -> Box<SampleBuffers<CAP>> {
        Box::new(stream::buffers())
    }

    fn software_config() -> SamplerConfig {
        SamplerConfig {
            timer_clock: HertzU32::MHz(1),
            timer: TriggerTimer::Tim2,
            sample_rate: HertzU32::Hz(0),
        }
    }

    /// Sampler without sample queues, scanning on software triggers.
    fn software_sampler<const S: usize>() -> Sampler<'static, MockAdc<S>, CAP> {
        Sampler::new(MockAdc::new(), software_config(), SampleSinks::none()).unwrap()
    }

    /// One scan worth of hardware: capture and fire the completion.
    fn complete_scan<const S: usize>(
        sampler: &mut Sampler<'_, MockAdc<S>, CAP>,
        value: impl Fn(ChannelId) -> Sample,
    ) {
        sampler.platform.capture(value);
        sampler.on_scan_complete();
    }

    #[test]
    fn init_leaves_device_idle() {
        let sampler = software_sampler::<16>();
        assert!(!sampler.is_running());
        assert_eq!(sampler.active_channel_count(), 0);
        assert!(!sampler.platform().interrupt_enabled);
        assert!(!sampler.platform().trigger_enabled);
        assert!(!sampler.platform().converter_on);
    }

    #[test]
    fn counted_acquisition_stops_after_last_sample() {
        let mut buffers = buffers();
        let (sinks, mut streams) = stream::split(&mut buffers);
        let mut sampler = Sampler::new(MockAdc::<16>::new(), software_config(), sinks).unwrap();

        sampler.start_channel(id(5), 3, 0).unwrap();
        assert!(sampler.is_running());
        assert!(sampler.platform().interrupt_enabled);
        assert_eq!(sampler.platform().software_starts(), 1);

        let mut n = 0;
        while sampler.is_running() {
            n += 1;
            complete_scan(&mut sampler, |_| n * 10);
            assert!(n <= 3, "Channel kept running");
        }

        assert_eq!(sampler.samples_delivered(id(5)), 3);
        assert!(!sampler.channel(id(5)).is_active());
        assert!(!sampler.channel(id(5)).is_pending());
        assert!(!sampler.platform().interrupt_enabled);
        assert!(streams.drain(id(5)).eq([10, 20, 30]));

        // A late completion delivers nothing more
        sampler.on_scan_complete();
        assert_eq!(sampler.samples_delivered(id(5)), 3);
        assert_eq!(streams.samples_ready(id(5)), 0);
    }

    #[test]
    fn single_shot_is_read_as_latest_value() {
        let mut sampler = software_sampler::<16>();

        assert_eq!(sampler.read_latest(id(0)), None);

        sampler.start_channel(id(0), 1, 0).unwrap();
        assert_eq!(sampler.read_latest(id(0)), None);

        complete_scan(&mut sampler, |_| 1234);
        assert!(!sampler.is_running());
        assert!(sampler.is_fresh(id(0)));
        assert_eq!(sampler.read_latest(id(0)), Some(1234));
        assert!(!sampler.is_fresh(id(0)));
    }

    #[test]
    fn restarting_an_active_channel_does_not_duplicate_it() {
        let mut sampler = software_sampler::<16>();

        sampler.start_channel(id(2), 10, 0).unwrap();
        sampler.start_channel(id(2), 2, 0).unwrap();
        assert_eq!(sampler.active_channel_count(), 1);
        assert_eq!(sampler.device().scan_list(), &[id(2)]);
        assert_eq!(sampler.channel(id(2)).acquisition(), Acquisition::Count(2));

        complete_scan(&mut sampler, |_| 1);
        complete_scan(&mut sampler, |_| 2);
        assert!(!sampler.is_running());
        assert_eq!(sampler.samples_delivered(id(2)), 2);
    }

    #[test]
    fn channel_joining_a_running_device_is_scanned_after_next_completion() {
        let mut sampler = software_sampler::<16>();

        sampler.start_channel(id(3), 0, 0).unwrap();
        sampler.start_channel(id(1), 0, 0).unwrap();
        assert_eq!(sampler.device().scan_list(), &[id(3)]);
        assert!(sampler.device().needs_rebuild());

        complete_scan(&mut sampler, |id| id.get() as Sample);
        assert_eq!(sampler.device().scan_list(), &[id(1), id(3)]);
        assert_eq!(sampler.samples_delivered(id(1)), 0);

        complete_scan(&mut sampler, |id| id.get() as Sample);
        assert_eq!(sampler.samples_delivered(id(1)), 1);
        assert_eq!(sampler.samples_delivered(id(3)), 2);
        assert_eq!(sampler.read_latest(id(1)), Some(1));
        assert_eq!(sampler.read_latest(id(3)), Some(3));
    }

    #[test]
    fn stopping_one_channel_leaves_the_other_alone() {
        let mut buffers = buffers();
        let (sinks, mut streams) = stream::split(&mut buffers);
        let mut sampler = Sampler::new(MockAdc::<16>::new(), software_config(), sinks).unwrap();

        sampler.start_channel(id(4), 0, 0).unwrap();
        sampler.start_channel(id(9), 0, 0).unwrap();
        complete_scan(&mut sampler, |_| 0);
        assert_eq!(streams.flush(id(4)), 1);

        for n in 1..=3 {
            complete_scan(&mut sampler, |id| id.get() as Sample * 100 + n);
        }
        sampler.stop_channel(id(4));
        assert!(sampler.is_running());
        assert_eq!(sampler.active_channel_count(), 1);

        // Still programmed with both channels, only 9 may receive data
        complete_scan(&mut sampler, |id| id.get() as Sample * 100 + 4);
        assert_eq!(sampler.device().scan_list(), &[id(9)]);
        complete_scan(&mut sampler, |id| id.get() as Sample * 100 + 5);

        assert_eq!(sampler.samples_delivered(id(4)), 4);
        assert_eq!(sampler.samples_delivered(id(9)), 5);
        assert!(streams.drain(id(4)).eq([401, 402, 403]));
        assert!(streams.drain(id(9)).eq([901, 902, 903, 904, 905]));
    }

    #[test]
    fn last_stop_idles_the_device() {
        let mut sampler = software_sampler::<16>();
        sampler.set_clock(HertzU32::kHz(1)).unwrap();

        sampler.start_channel(id(6), 0, 0).unwrap();
        assert!(sampler.platform().trigger_enabled);

        sampler.stop_channel(id(6));
        assert!(!sampler.is_running());
        assert!(!sampler.platform().trigger_enabled);
        assert!(!sampler.platform().interrupt_enabled);

        // Stopping again is harmless
        sampler.stop_channel(id(6));
        assert!(!sampler.is_running());
    }

    #[test]
    fn task_context_calls_mask_the_completion_interrupt() {
        let mut sampler = software_sampler::<16>();
        sampler.start_channel(id(0), 0, 0).unwrap();
        sampler.start_channel(id(1), 0, 0).unwrap();
        sampler.platform.take_calls();

        sampler.stop_channel(id(1));
        assert_eq!(
            sampler.platform.take_calls(),
            [Call::DisableInterrupt, Call::EnableInterrupt]
        );
        assert!(sampler.platform().interrupt_enabled);
    }

    #[test]
    fn stop_from_within_completion_is_safe_for_every_channel() {
        let mut sampler = software_sampler::<16>();
        for n in 0..4 {
            sampler.start_channel(id(n), 1, 0).unwrap();
        }
        complete_scan(&mut sampler, |_| 0);
        complete_scan(&mut sampler, |id| id.get() as Sample);

        assert!(!sampler.is_running());
        for n in 0..4 {
            assert_eq!(sampler.samples_delivered(id(n)), 1);
            assert_eq!(sampler.read_latest(id(n)), Some(n as Sample));
        }
    }

    #[test]
    fn smoothing_releases_nothing_before_window_fills() {
        let mut buffers = buffers();
        let (sinks, mut streams) = stream::split(&mut buffers);
        let mut sampler = Sampler::new(MockAdc::<16>::new(), software_config(), sinks).unwrap();

        sampler.start_channel(id(7), 2, 3).unwrap();
        for _ in 0..8 {
            complete_scan(&mut sampler, |_| 80);
            assert_eq!(streams.samples_ready(id(7)), 0);
            assert_eq!(sampler.read_latest(id(7)), None);
        }
        assert!(sampler.channel(id(7)).is_smoothing_ready());

        complete_scan(&mut sampler, |_| 160);
        complete_scan(&mut sampler, |_| 160);
        assert!(!sampler.is_running());
        assert!(streams.drain(id(7)).eq([90, 100]));
    }

    #[test]
    fn changing_smoothing_mid_stream_restarts_warm_up() {
        let mut buffers = buffers();
        let (sinks, mut streams) = stream::split(&mut buffers);
        let mut sampler = Sampler::new(MockAdc::<16>::new(), software_config(), sinks).unwrap();
        assert!(sampler.channel(id(6)).has_sink());

        sampler.start_channel(id(6), 0, 0).unwrap();
        complete_scan(&mut sampler, |_| 10);
        complete_scan(&mut sampler, |_| 10);
        assert_eq!(sampler.samples_delivered(id(6)), 2);

        sampler.set_smoothing(id(6), 2).unwrap();
        assert_eq!(sampler.channel(id(6)).smoothing_log_depth(), 2);
        assert!(!sampler.channel(id(6)).is_smoothing_ready());

        // Four new raw samples fill the window, the one completing it is held back
        for _ in 0..4 {
            complete_scan(&mut sampler, |_| 20);
            assert_eq!(sampler.samples_delivered(id(6)), 2);
        }
        assert!(sampler.channel(id(6)).is_smoothing_ready());
        assert!(streams.drain(id(6)).eq([10, 10]));

        complete_scan(&mut sampler, |_| 40);
        assert_eq!(sampler.samples_delivered(id(6)), 3);
        assert!(streams.drain(id(6)).eq([25]));

        assert_eq!(
            sampler.set_smoothing(id(6), MAX_SMOOTHING_LOG + 1),
            Err(Error::InvalidSmoothing)
        );
        assert_eq!(sampler.channel(id(6)).smoothing_log_depth(), 2);
    }

    #[test]
    fn smoothing_of_an_idle_channel_is_refused() {
        let mut sampler = software_sampler::<16>();
        assert!(!sampler.channel(id(3)).has_sink());

        assert_eq!(sampler.set_smoothing(id(3), 2), Err(Error::NotRunning));
        assert_eq!(sampler.channel(id(3)).smoothing_log_depth(), 0);

        sampler.start_channel(id(3), 0, 1).unwrap();
        sampler.stop_channel(id(3));
        assert_eq!(sampler.set_smoothing(id(3), 2), Err(Error::NotRunning));
        assert_eq!(sampler.channel(id(3)).smoothing_log_depth(), 1);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let mut sampler = software_sampler::<2>();

        assert_eq!(
            sampler.start_channel(id(0), 0, MAX_SMOOTHING_LOG + 1),
            Err(Error::InvalidSmoothing)
        );
        assert_eq!(sampler.trigger_scan(), Err(Error::NotRunning));
        assert_eq!(sampler.set_clock(HertzU32::MHz(2)), Err(Error::ClockUnachievable));

        sampler.start_channel(id(0), 0, 0).unwrap();
        sampler.start_channel(id(1), 0, 0).unwrap();
        assert_eq!(sampler.start_channel(id(2), 0, 0), Err(Error::SequenceFull));
        // Restarting a member is still fine
        sampler.start_channel(id(1), 5, 0).unwrap();
        assert_eq!(sampler.active_channel_count(), 2);
        assert_eq!(sampler.trigger_scan(), Ok(()));
    }

    #[test]
    fn short_scan_clears_affected_channels() {
        let mut sampler = software_sampler::<16>();
        sampler.start_channel(id(0), 0, 0).unwrap();
        sampler.start_channel(id(1), 0, 0).unwrap();
        complete_scan(&mut sampler, |_| 0);
        complete_scan(&mut sampler, |id| id.get() as Sample + 10);
        assert!(sampler.is_fresh(id(1)));

        // Only the first conversion made it
        sampler.platform.scratch.truncate(1);
        sampler.on_scan_complete();

        assert_eq!(sampler.samples_delivered(id(0)), 3);
        assert_eq!(sampler.samples_delivered(id(1)), 1);
        assert!(!sampler.is_fresh(id(1)));
        assert!(sampler.is_running());
    }

    #[test]
    fn clock_changes_rearm_a_running_device() {
        let mut sampler = software_sampler::<16>();
        sampler.start_channel(id(0), 0, 0).unwrap();
        sampler.platform.take_calls();

        let actual = sampler.set_clock(HertzU32::kHz(1)).unwrap();
        assert_eq!(actual, HertzU32::kHz(1));
        assert!(sampler.device().is_clocked());
        assert!(sampler.platform().trigger_enabled);
        let setting = TimerSetting {
            prescaler: 1,
            period: 1000,
        };
        let timer = Call::Timer(TriggerTimer::Tim2, Some(setting));
        assert!(sampler.platform.take_calls().contains(&timer));

        // Clocked scans need no software start
        complete_scan(&mut sampler, |_| 1);
        assert_eq!(sampler.platform().software_starts(), 0);

        let actual = sampler.set_clock(HertzU32::Hz(0)).unwrap();
        assert_eq!(actual, HertzU32::Hz(0));
        assert!(!sampler.platform().trigger_enabled);
        assert_eq!(sampler.platform().software_starts(), 1);
    }

    #[test]
    fn shutdown_stops_everything() {
        let mut sampler = software_sampler::<16>();
        for n in [1, 5, 11] {
            sampler.start_channel(id(n), 0, 0).unwrap();
        }
        sampler.shutdown();
        assert!(!sampler.is_running());
        assert_eq!(sampler.active_channel_count(), 0);
        assert!(ChannelId::all().all(|id| !sampler.channel(id).is_active()));

        let adc = sampler.release();
        assert!(!adc.interrupt_enabled);
        assert!(!adc.trigger_enabled);
    }

    /// Channel 2, five samples, 1 kHz from a 1 MHz timer clock.
    #[test]
    fn five_samples_at_one_kilohertz() {
        let mut buffers = buffers();
        let (sinks, mut streams) = stream::split(&mut buffers);
        let config = SamplerConfig {
            sample_rate: HertzU32::kHz(1),
            ..software_config()
        };
        let mut sampler = Sampler::new(MockAdc::<16>::new(), config, sinks).unwrap();
        assert!(sampler.device().is_clocked());

        sampler.start_channel(id(2), 5, 0).unwrap();
        assert!(sampler.platform().trigger_enabled);

        let mut completions = 0;
        let mut value = 100;
        while sampler.is_running() {
            complete_scan(&mut sampler, |_| value);
            completions += 1;
            value += 1;
        }

        assert_eq!(completions, 5);
        assert_eq!(sampler.samples_delivered(id(2)), 5);
        assert!(!sampler.platform().trigger_enabled);
        assert_eq!(sampler.platform().software_starts(), 0);
        assert!(streams.drain(id(2)).eq(100..105));
        assert!(streams.drain(id(2)).next().is_none());
    }
}
