//! Per-channel sample queues between the completion interrupt and task
//! context.
//!
//! Each channel gets its own ring buffer so every buffer has exactly one
//! producer. The producers go to the [`Sampler`](crate::sampler::Sampler),
//! the consumers stay with the application as [`SampleStreams`].

use crate::channel::ChannelId;
use crate::config::{Sample, NUM_CHANNELS};
use crate::ring_buffer::{Consumer, Drain, Producer, RingBuffer};

pub type SampleBuffers<const CAP: usize> = [RingBuffer<Sample, CAP>; NUM_CHANNELS];

/// Producer halves, one per channel, handed to the sampler.
pub struct SampleSinks<'a, const CAP: usize> {
    producers: [Option<Producer<'a, Sample, CAP>>; NUM_CHANNELS],
}

impl<'a, const CAP: usize> SampleSinks<'a, CAP> {
    /// No queues at all; samples are only available as latest values.
    pub fn none() -> Self {
        Self {
            producers: core::array::from_fn(|_| None),
        }
    }

    pub(crate) fn take(&mut self, id: ChannelId) -> Option<Producer<'a, Sample, CAP>> {
        self.producers[id.index()].take()
    }
}

/// Consumer halves, one per channel, drained from task context.
pub struct SampleStreams<'a, const CAP: usize> {
    consumers: [Consumer<'a, Sample, CAP>; NUM_CHANNELS],
}

impl<'a, const CAP: usize> SampleStreams<'a, CAP> {
    /// Pops every queued sample of `id`, oldest first.
    pub fn drain(&mut self, id: ChannelId) -> Drain<'_, 'a, Sample, CAP> {
        self.consumers[id.index()].drain()
    }

    pub fn pop(&mut self, id: ChannelId) -> Option<Sample> {
        self.consumers[id.index()].pop()
    }

    /// Number of samples queued for `id`
    pub fn samples_ready(&self, id: ChannelId) -> usize {
        self.consumers[id.index()].len()
    }

    /// Discards everything queued for `id`, returning how much that was.
    pub fn flush(&mut self, id: ChannelId) -> usize {
        self.consumers[id.index()].flush()
    }
}

/// One empty ring buffer per channel.
pub fn buffers<const CAP: usize>() -> SampleBuffers<CAP> {
    core::array::from_fn(|_| RingBuffer::new())
}

/// Splits one ring buffer per channel into the sampler's and the
/// application's halves.
pub fn split<const CAP: usize>(
    buffers: &mut SampleBuffers<CAP>,
) -> (SampleSinks<'_, CAP>, SampleStreams<'_, CAP>) {
    let mut sinks = SampleSinks::none();
    let mut next = 0;

    let consumers = buffers.each_mut().map(|buffer| {
        let (producer, consumer) = RingBuffer::split(buffer);
        sinks.producers[next] = Some(producer);
        next += 1;
        consumer
    });

    (sinks, SampleStreams { consumers })
}
