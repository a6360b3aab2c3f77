use crate::config::{Sample, MAX_SMOOTHING_LOG};
use crate::error::Error;

const WINDOW: usize = 1 << MAX_SMOOTHING_LOG;

/// Moving average over the last `2^depth` raw samples.
///
/// The output is only valid once the window has been filled completely; until
/// then [`Smoother::is_ready`] stays false and [`Smoother::average`] returns
/// `None`.
pub struct Smoother {
    log_depth: u8,
    window: [Sample; WINDOW],
    pos: usize,
    filled: usize,
    sum: u32,
}

impl Smoother {
    pub const fn new() -> Self {
        Self {
            log_depth: 0,
            window: [0; WINDOW],
            pos: 0,
            filled: 0,
            sum: 0,
        }
    }

    /// Changes the window size and forgets everything accumulated so far.
    pub fn configure(&mut self, log_depth: u8) -> Result<(), Error> {
        if log_depth > MAX_SMOOTHING_LOG {
            return Err(Error::InvalidSmoothing);
        }
        self.log_depth = log_depth;
        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.filled = 0;
        self.sum = 0;
    }

    pub fn log_depth(&self) -> u8 {
        self.log_depth
    }

    pub fn is_enabled(&self) -> bool {
        self.log_depth > 0
    }

    fn len(&self) -> usize {
        1 << self.log_depth
    }

    /// A disabled smoother passes samples through and is always ready.
    pub fn is_ready(&self) -> bool {
        !self.is_enabled() || self.filled == self.len()
    }

    /// Adds a raw sample, evicting the oldest one once the window is full.
    pub fn feed(&mut self, raw: Sample) {
        let len = self.len();

        if self.filled == len {
            self.sum -= u32::from(self.window[self.pos]);
        } else {
            self.filled += 1;
        }

        self.window[self.pos] = raw;
        self.sum += u32::from(raw);
        self.pos = (self.pos + 1) & (len - 1);
    }

    pub fn average(&self) -> Option<Sample> {
        (self.is_enabled() && self.is_ready()).then(|| (self.sum >> self.log_depth) as Sample)
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new()
    }
}
