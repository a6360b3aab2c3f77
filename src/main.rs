#![no_main]
#![no_std]
#![feature(type_alias_impl_trait)]

use defmt::unwrap;
use defmt_rtt as _;
use panic_probe as _;
use rtic::{app, Mutex};
use rtic_monotonics::systick::{ExtU64, Systick};
use rtic_monotonics::Monotonic;
use static_cell::StaticCell;
use stm32f7xx_hal::prelude::*;

use sampler_firmware::{
    channel::ChannelId,
    config::{Sample, SamplerConfig, TriggerTimer, MAX_SCAN_LEN},
    error::Error,
    stm32::{AdcPeripherals, ScanBuffer, Stm32Adc},
    stream::{self, SampleBuffers, SampleStreams},
    Sampler,
};

/// Samples each channel can queue before the report task drains them
const STREAM_CAPACITY: usize = 256;

type AppSampler = Sampler<'static, Stm32Adc, STREAM_CAPACITY>;

defmt::timestamp!(
    "{=u64:ms}",
    Systick::now().duration_since_epoch().to_millis()
);

/// Starts a single-shot acquisition of `id` and waits for its value.
async fn read_blocking(
    sampler: &mut impl Mutex<T = AppSampler>,
    id: ChannelId,
) -> Result<Sample, Error> {
    sampler.lock(|sampler| sampler.start_channel(id, 1, 0))?;

    loop {
        if let Some(value) = sampler.lock(|sampler| sampler.read_latest(id)) {
            return Ok(value);
        }
        Systick::delay(1u64.millis()).await;
    }
}

#[app(device = stm32f7xx_hal::pac, dispatchers = [CAN1_RX0])]
mod app {
    use super::*;

    static SCAN_BUFFER: StaticCell<ScanBuffer> = StaticCell::new();
    static SAMPLE_BUFFERS: StaticCell<SampleBuffers<STREAM_CAPACITY>> = StaticCell::new();

    #[shared]
    struct Shared {
        sampler: AppSampler,
    }

    #[local]
    struct Local {
        streams: SampleStreams<'static, STREAM_CAPACITY>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        let p = cx.device;

        let mut rcc = p.RCC.constrain();
        let clocks = rcc.cfgr.sysclk(216.MHz()).hclk(216.MHz()).freeze();

        // Setup systick to be used for delays
        let systick_token = rtic_monotonics::create_systick_token!();
        Systick::start(cx.core.SYST, clocks.sysclk().to_Hz(), systick_token);

        let scan_buffer = SCAN_BUFFER.init([0; MAX_SCAN_LEN]);
        let sample_buffers = SAMPLE_BUFFERS.init_with(stream::buffers);
        let (sinks, streams) = stream::split(sample_buffers);

        let adc = Stm32Adc::init(
            scan_buffer,
            AdcPeripherals {
                adc1: p.ADC1,
                adc_common: p.ADC_COMMON,
                dma2: p.DMA2,
                tim2: p.TIM2,
                tim4: p.TIM4,
                gpioa: p.GPIOA,
                gpiob: p.GPIOB,
                gpioc: p.GPIOC,
            },
            &mut rcc.apb1,
            &mut rcc.apb2,
            &mut rcc.ahb1,
        );

        let config = SamplerConfig {
            // TIM2 and TIM4 both hang off APB1
            timer_clock: clocks.timclk1(),
            timer: TriggerTimer::Tim2,
            ..SamplerConfig::default()
        };
        let sampler = unwrap!(Sampler::new(adc, config, sinks));

        let timer_clock = config.timer_clock.to_Hz();
        defmt::info!("Sampler initialized, timer clock {} Hz", timer_clock);

        acquire::spawn().unwrap_or_else(|_| defmt::panic!("Failed to start acquire"));

        (Shared { sampler }, Local { streams })
    }

    /// Reads a reference input once, then keeps two channels streaming and
    /// reports what they delivered every second.
    #[task(shared = [sampler], local = [streams], priority = 0)]
    async fn acquire(mut cx: acquire::Context) {
        let reference = unwrap!(ChannelId::new(0));
        let inputs = [unwrap!(ChannelId::new(3)), unwrap!(ChannelId::new(8))];

        match read_blocking(&mut cx.shared.sampler, reference).await {
            Ok(value) => defmt::info!("Reference: {}", value),
            Err(e) => defmt::error!("Reference read failed: {}", e),
        }

        let rate = cx
            .shared
            .sampler
            .lock(|sampler| sampler.set_clock(1000.Hz()));
        match rate {
            Ok(rate) => defmt::info!("Sampling at {} Hz", rate.to_Hz()),
            Err(e) => defmt::error!("Cannot sample at 1 kHz: {}", e),
        }

        cx.shared.sampler.lock(|sampler| {
            for id in inputs {
                if let Err(e) = sampler.start_channel(id, 0, 4) {
                    defmt::error!("Channel {} not started: {}", id, e);
                }
            }
        });

        let streams = cx.local.streams;
        loop {
            Systick::delay(1000u64.millis()).await;

            for id in inputs {
                let (count, sum) = streams
                    .drain(id)
                    .fold((0u32, 0u32), |(n, sum), v| (n + 1, sum + u32::from(v)));
                let overruns = cx.shared.sampler.lock(|sampler| sampler.overruns(id));

                if count > 0 {
                    defmt::info!(
                        "Channel {}: {} samples, mean {}, {} overruns",
                        id,
                        count,
                        sum / count,
                        overruns
                    );
                } else {
                    defmt::warn!("Channel {}: no samples", id);
                }
            }
        }
    }

    #[task(binds = DMA2_STREAM0, shared = [sampler], priority = 1)]
    fn on_dma2_stream0(mut cx: on_dma2_stream0::Context) {
        cx.shared.sampler.lock(|sampler| sampler.on_scan_complete());
    }
}
