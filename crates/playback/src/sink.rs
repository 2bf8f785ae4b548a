//! Consumer callbacks invoked from the streaming thread.

use crossbeam::channel::{self, Receiver};
use rp_common::Sample;
use tracing::trace;

/// What a [`crate::PlaybackEngine::subscribe`] channel carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Sample(Sample),
    EndOfFile,
}

pub(crate) type SampleHandler = Box<dyn FnMut(Sample) + Send>;
pub(crate) type EofHandler = Box<dyn FnMut() + Send>;

#[derive(Default)]
pub(crate) struct Sinks {
    sample: Option<SampleHandler>,
    eof: Option<EofHandler>,
}

impl Sinks {
    pub fn set_sample(&mut self, handler: SampleHandler) {
        self.sample = Some(handler);
    }

    pub fn set_eof(&mut self, handler: EofHandler) {
        self.eof = Some(handler);
    }

    pub fn has_eof_handler(&self) -> bool {
        self.eof.is_some()
    }

    pub fn deliver(&mut self, sample: Sample) {
        match self.sample.as_mut() {
            Some(handler) => handler(sample),
            None => trace!(kind = ?sample.kind(), "No sample handler, sample dropped"),
        }
    }

    pub fn end_of_file(&mut self) {
        if let Some(handler) = self.eof.as_mut() {
            handler();
        }
    }
}

/// Handlers that forward into an unbounded channel.
pub(crate) fn channel_handlers() -> (SampleHandler, EofHandler, Receiver<PlaybackEvent>) {
    let (tx, rx) = channel::unbounded();
    let eof_tx = tx.clone();
    let on_sample: SampleHandler = Box::new(move |sample| {
        let _ = tx.send(PlaybackEvent::Sample(sample));
    });
    let on_eof: EofHandler = Box::new(move || {
        let _ = eof_tx.send(PlaybackEvent::EndOfFile);
    });
    (on_sample, on_eof, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_common::{SampleHeader, TimeSample};

    fn time_sample() -> Sample {
        Sample::Time(TimeSample {
            header: SampleHeader {
                capture_time: 42,
                offset: 0,
            },
            source: 0,
            frame_number: 1,
            timestamp: 0.042,
        })
    }

    #[test]
    fn channel_handlers_forward_events_in_order() {
        let (on_sample, on_eof, rx) = channel_handlers();
        let mut sinks = Sinks::default();
        assert!(!sinks.has_eof_handler());
        sinks.set_sample(on_sample);
        sinks.set_eof(on_eof);
        assert!(sinks.has_eof_handler());

        sinks.deliver(time_sample());
        sinks.end_of_file();

        assert_eq!(rx.try_recv().unwrap(), PlaybackEvent::Sample(time_sample()));
        assert_eq!(rx.try_recv().unwrap(), PlaybackEvent::EndOfFile);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_handlers_are_ignored() {
        let mut sinks = Sinks::default();
        sinks.deliver(time_sample());
        sinks.end_of_file();
    }

    #[test]
    fn closed_receiver_does_not_panic() {
        let (on_sample, _on_eof, rx) = channel_handlers();
        drop(rx);
        let mut sinks = Sinks::default();
        sinks.set_sample(on_sample);
        sinks.deliver(time_sample());
    }
}
