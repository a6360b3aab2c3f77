use core::fmt;

/// Everything that can go wrong when configuring the sampler from task context.
///
/// Nothing in here ever reaches interrupt context; the completion handler logs
/// and repairs state instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Error {
    /// Channel id is not one of the board's analog inputs
    InvalidChannel,
    /// The converter cannot scan any more channels at once
    SequenceFull,
    /// Requested rate is zero after rounding or out of the timer's range
    ClockUnachievable,
    /// The operation needs a running device
    NotRunning,
    /// Smoothing window larger than the supported maximum
    InvalidSmoothing,
    /// The timer cannot trigger the converter
    InvalidTimer,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidChannel => "invalid channel",
            Error::SequenceFull => "scan sequence is full",
            Error::ClockUnachievable => "sampling rate not achievable",
            Error::NotRunning => "sampler is not running",
            Error::InvalidSmoothing => "smoothing depth too large",
            Error::InvalidTimer => "timer cannot trigger the converter",
        };
        f.write_str(msg)
    }
}
