//! [`AdcPlatform`] on the STM32F767: ADC1 scanning a regular sequence, DMA2
//! stream 0 moving the conversions and TIM2 or TIM4 TRGO starting each scan.

use core::sync::atomic::{fence, Ordering};

use stm32f7xx_hal::{
    pac,
    rcc::{self, Enable},
};

use crate::channel::ChannelId;
use crate::clock::TimerSetting;
use crate::config::{Port, Sample, TriggerTimer, ANALOG_PINS, MAX_SCAN_LEN, SAMPLE_BITS};
use crate::hal::AdcPlatform;

/// Destination of the DMA transfers, one slot per sequence rank.
pub type ScanBuffer = [Sample; MAX_SCAN_LEN];

/// DMA2 request channel of ADC1 on stream 0
const DMA_CHANNEL_ADC1: u8 = 0;

/// FEIF0, DMEIF0, TEIF0, HTIF0 and TCIF0 in LIFCR
const STREAM0_FLAGS: u32 = 0x3D;

/// 56 ADC clock cycles
const SAMPLE_TIME: u32 = 0b011;

/// SMPRx value selecting [`SAMPLE_TIME`] for `count` channels.
const fn sample_times(count: u32) -> u32 {
    let mut bits = 0;
    let mut i = 0;
    while i < count {
        bits |= SAMPLE_TIME << (3 * i);
        i += 1;
    }
    bits
}

/// RES field of CR1 for a conversion width of `bits`.
const fn resolution_bits(bits: u32) -> u8 {
    match bits {
        12 => 0b00,
        10 => 0b01,
        8 => 0b10,
        _ => 0b11,
    }
}

/// SQR3, SQR2 and SQR1 values, in that order, converting `scan` rank by rank.
fn sequence_registers(scan: &[ChannelId]) -> [u32; 3] {
    // Five bits per rank: SQR3 holds ranks 1 to 6, SQR2 7 to 12, SQR1 13 to 16
    let mut sqr = [0u32; 3];
    for (rank, id) in scan.iter().enumerate() {
        sqr[rank / 6] |= u32::from(id.get()) << (5 * (rank % 6));
    }
    // Sequence length minus one
    sqr[2] |= (scan.len().saturating_sub(1) as u32) << 20;
    sqr
}

/// Peripherals the sampler takes over.
pub struct AdcPeripherals {
    pub adc1: pac::ADC1,
    pub adc_common: pac::ADC_COMMON,
    pub dma2: pac::DMA2,
    pub tim2: pac::TIM2,
    pub tim4: pac::TIM4,
    pub gpioa: pac::GPIOA,
    pub gpiob: pac::GPIOB,
    pub gpioc: pac::GPIOC,
}

pub struct Stm32Adc {
    adc1: pac::ADC1,
    dma2: pac::DMA2,
    tim2: pac::TIM2,
    tim4: pac::TIM4,
    gpioa: pac::GPIOA,
    gpiob: pac::GPIOB,
    gpioc: pac::GPIOC,
    buffer: &'static mut ScanBuffer,
    scan_len: usize,
    timer: TriggerTimer,
}

impl Stm32Adc {
    pub fn init(
        buffer: &'static mut ScanBuffer,
        p: AdcPeripherals,
        apb1: &mut rcc::APB1,
        apb2: &mut rcc::APB2,
        ahb1: &mut rcc::AHB1,
    ) -> Self {
        <pac::DMA2 as Enable>::enable(ahb1);
        <pac::GPIOA as Enable>::enable(ahb1);
        <pac::GPIOB as Enable>::enable(ahb1);
        <pac::GPIOC as Enable>::enable(ahb1);
        <pac::ADC1 as Enable>::enable(apb2);
        <pac::TIM2 as Enable>::enable(apb1);
        <pac::TIM4 as Enable>::enable(apb1);

        // ADCCLK = PCLK2 / 8, below the 36 MHz limit with PCLK2 at 108 MHz
        p.adc_common.ccr.modify(|_, w| w.adcpre().bits(0b11));

        let mut this = Self {
            adc1: p.adc1,
            dma2: p.dma2,
            tim2: p.tim2,
            tim4: p.tim4,
            gpioa: p.gpioa,
            gpiob: p.gpiob,
            gpioc: p.gpioc,
            buffer,
            scan_len: 0,
            timer: TriggerTimer::Tim2,
        };

        this.disable_completion_interrupt();
        this.stop_transfers();
        this.reset_converter();

        this
    }
}

/// Switches a pin of any GPIO port to analog mode without pull resistors.
macro_rules! into_analog {
    ($gpio:expr, $pin:expr) => {{
        let shift = u32::from($pin) * 2;
        $gpio
            .moder
            .modify(|r, w| unsafe { w.bits(r.bits() | (0b11 << shift)) });
        $gpio
            .pupdr
            .modify(|r, w| unsafe { w.bits(r.bits() & !(0b11 << shift)) });
    }};
}

/// Loads prescaler and period and lets every update event drive TRGO, or
/// stops the timer when there is no setting.
macro_rules! load_timer {
    ($tim:expr, $setting:expr) => {{
        let tim = &$tim;
        tim.cr1.modify(|_, w| w.cen().disabled());

        if let Some(setting) = $setting {
            tim.psc.write(|w| unsafe { w.bits(setting.prescaler - 1) });
            tim.arr.write(|w| unsafe { w.bits(setting.period - 1) });
            tim.cr2.modify(|_, w| w.mms().update());
            // Latch the new prescaler right away
            tim.egr.write(|w| w.ug().set_bit());
            tim.cr1.modify(|_, w| w.cen().enabled());
        }
    }};
}

impl AdcPlatform for Stm32Adc {
    /// 16 bit prescaler, and TIM4 has a 16 bit counter
    const MAX_COUNT: u32 = 0x1_0000;
    const MAX_SCAN_LEN: usize = 16;

    fn disable_trigger(&mut self) {
        self.adc1.cr2.modify(|_, w| w.exten().disabled());
    }

    fn enable_trigger(&mut self) {
        let extsel = self.timer.extsel();
        self.adc1
            .cr2
            .modify(|_, w| unsafe { w.exten().rising_edge().extsel().bits(extsel) });
    }

    fn software_start(&mut self) {
        self.adc1.cr2.modify(|_, w| w.swstart().set_bit());
    }

    fn stop_transfers(&mut self) {
        self.adc1.cr2.modify(|_, w| w.dma().disabled());

        let stream = &self.dma2.st[0];
        stream.cr.modify(|_, w| w.en().disabled());
        // The stream finishes its current beat before it reports disabled
        while stream.cr.read().en().bit_is_set() {}

        self.dma2.lifcr.write(|w| unsafe { w.bits(STREAM0_FLAGS) });
    }

    fn reset_converter(&mut self) {
        let adc1 = &self.adc1;
        // Power down ADC1
        adc1.cr2.modify(|_, w| w.adon().clear_bit());

        adc1.cr1.reset();
        adc1.cr2.reset();
        adc1.sqr1.reset();
        adc1.sqr2.reset();
        adc1.sqr3.reset();
        adc1.sr.reset();
    }

    fn configure_analog_input(&mut self, channel: ChannelId) {
        let (port, pin) = ANALOG_PINS[channel.index()];
        match port {
            Port::A => into_analog!(self.gpioa, pin),
            Port::B => into_analog!(self.gpiob, pin),
            Port::C => into_analog!(self.gpioc, pin),
        }
    }

    fn program_sequence(&mut self, scan: &[ChannelId]) {
        let adc1 = &self.adc1;

        let sqr = sequence_registers(scan);
        adc1.sqr3.write(|w| unsafe { w.bits(sqr[0]) });
        adc1.sqr2.write(|w| unsafe { w.bits(sqr[1]) });
        adc1.sqr1.write(|w| unsafe { w.bits(sqr[2]) });

        adc1.smpr2.write(|w| unsafe { w.bits(sample_times(10)) });
        adc1.smpr1.write(|w| unsafe { w.bits(sample_times(9)) });

        // Scan the whole sequence per trigger
        let res = resolution_bits(SAMPLE_BITS);
        adc1.cr1
            .modify(|_, w| w.scan().set_bit().discen().clear_bit().res().bits(res));
        // One scan per trigger, end of conversion flagged per sequence
        adc1.cr2
            .modify(|_, w| w.cont().single().eocs().clear_bit().align().right());

        // Power up ADC1
        adc1.cr2.modify(|_, w| w.adon().enabled());
    }

    fn start_transfers(&mut self, len: usize) {
        let len = len.min(MAX_SCAN_LEN);
        let stream = &self.dma2.st[0];

        stream.cr.modify(|_, w| {
            w.chsel()
                .bits(DMA_CHANNEL_ADC1)
                .dbm()
                .disabled()
                // Wrap back to the first rank after each scan
                .circ()
                .enabled()
                .msize()
                .bits16()
                .psize()
                .bits16()
                .minc()
                .incremented()
                .pinc()
                .fixed()
                .dir()
                .peripheral_to_memory()
                .pfctrl()
                .dma()
        });

        stream.ndtr.write(|w| w.ndt().bits(len as u16));
        stream
            .par
            .write(|w| unsafe { w.pa().bits(self.adc1.dr.as_ptr() as u32) });
        stream
            .m0ar
            .write(|w| unsafe { w.m0a().bits(self.buffer.as_mut_ptr() as u32) });

        self.dma2.lifcr.write(|w| unsafe { w.bits(STREAM0_FLAGS) });
        self.scan_len = len;

        stream.cr.modify(|_, w| w.en().enabled());
        self.adc1
            .cr2
            .modify(|_, w| w.dma().enabled().dds().continuous());
    }

    fn clear_completion(&mut self) {
        self.dma2
            .lifcr
            .write(|w| w.ctcif0().set_bit().chtif0().set_bit());
    }

    // The stream's TCIE bit rather than the NVIC: RTIC owns the NVIC mask of
    // bound interrupts.
    fn enable_completion_interrupt(&mut self) {
        self.dma2.st[0].cr.modify(|_, w| w.tcie().enabled());
    }

    fn disable_completion_interrupt(&mut self) {
        self.dma2.st[0].cr.modify(|_, w| w.tcie().disabled());
    }

    fn completion_interrupt_enabled(&self) -> bool {
        self.dma2.st[0].cr.read().tcie().bit_is_set()
    }

    fn configure_timer(&mut self, timer: TriggerTimer, setting: Option<TimerSetting>) {
        self.timer = timer;
        match timer {
            TriggerTimer::Tim2 => load_timer!(self.tim2, setting),
            TriggerTimer::Tim4 => load_timer!(self.tim4, setting),
        }
    }

    fn scan(&self) -> &[Sample] {
        // Pairs with the DMA writes that preceded the completion flag
        fence(Ordering::Acquire);
        &self.buffer[..self.scan_len]
    }
}
