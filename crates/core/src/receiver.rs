//! Receiving role: listen, record each session, return to listening.
//!
//! ```text
//! wait for first frame --> begin recording --> stream --> teardown --+
//!        ^                      | no codec                          |
//!        +----------------------+-----------------------------------+
//! ```
//!
//! Teardown releases the recording sink, then the source handle, then the
//! preview. Two signals are checked once per streaming iteration: the stop
//! key ends the current session only, while the process-wide cancel token
//! ends the loop after a full teardown. An abandoned session pauses for the
//! open retry delay before listening again.

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::{ReceiverConfig, RetryPolicy};
use crate::link::ReconnectingSource;
use crate::media::{Frame, Preview, SinkFactory, SourceFactory};
use crate::recorder::{Recording, SessionEnd, SessionRecorder, SessionSummary};

/// Counters for a finished [`Receiver::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Sessions that were recorded.
    pub sessions: u64,
    /// Sessions dropped because no recording sink opened.
    pub abandoned: u64,
    /// Frames written across all sessions.
    pub frames: u64,
    /// Source handles replaced after a silent wait window.
    pub reacquisitions: u64,
    pub last_session: Option<SessionSummary>,
}

pub struct Receiver<F, K, P, C>
where
    F: SourceFactory,
    K: SinkFactory,
    P: Preview,
    C: Clock,
{
    port: u16,
    link: ReconnectingSource<F, C>,
    recorder: SessionRecorder<K>,
    preview: P,
    retry: RetryPolicy,
    cancel: CancelToken,
    stop_key: CancelToken,
    stats: ReceiverStats,
}

impl<F, K, P, C> Receiver<F, K, P, C>
where
    F: SourceFactory,
    K: SinkFactory,
    P: Preview,
    C: Clock,
{
    pub fn new(
        config: &ReceiverConfig,
        sources: F,
        sinks: K,
        preview: P,
        clock: C,
        cancel: CancelToken,
    ) -> Self {
        Self {
            port: config.port,
            link: ReconnectingSource::new(sources, clock, config.retry),
            recorder: SessionRecorder::new(sinks, config.output.clone(), config.record_fps),
            preview,
            retry: config.retry,
            cancel,
            stop_key: CancelToken::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// End the current session, not the run, when `stop_key` is raised.
    ///
    /// The token is reset at the start of every session.
    pub fn with_stop_key(mut self, stop_key: CancelToken) -> Self {
        self.stop_key = stop_key;
        self
    }

    /// Run until cancelled. Every handle is released before returning.
    pub fn run(&mut self) -> ReceiverStats {
        tracing::info!(port = self.port, "listening for stream");

        loop {
            let Some(first) = self.link.wait_for_first_frame(&self.cancel) else {
                break;
            };

            let mut recording = match self.recorder.begin(&first) {
                Ok(recording) => recording,
                Err(e) => {
                    tracing::error!(error = %e, "cannot record session, returning to listening");
                    self.link.release();
                    self.stats.abandoned += 1;
                    self.link.clock().sleep(self.retry.open_retry_delay);
                    continue;
                }
            };
            self.stats.sessions += 1;
            if let Some(reason) = self.stop_key.reset() {
                tracing::debug!(%reason, "ignoring stop key pressed between sessions");
            }

            let end = self.stream(&mut recording, first);

            let summary = recording.finish(end);
            self.link.release();
            self.preview.close();

            self.stats.frames += summary.frames_written;
            self.stats.last_session = Some(summary);

            if end == SessionEnd::Cancelled {
                break;
            }
            tracing::info!(port = self.port, "returning to listening");
        }

        self.link.release();
        self.preview.close();
        self.stats.reacquisitions = self.link.replacements();

        tracing::info!(
            sessions = self.stats.sessions,
            abandoned = self.stats.abandoned,
            frames = self.stats.frames,
            "receiver stopped"
        );
        self.stats.clone()
    }

    fn stream(&mut self, recording: &mut Recording<K::Sink>, first: Frame) -> SessionEnd {
        let mut preview_ok = true;
        let mut frame = first;

        loop {
            recording.write(&frame);

            if preview_ok {
                if let Err(e) = self.preview.show(&frame) {
                    tracing::warn!(error = %e, "preview unavailable for this session");
                    self.preview.close();
                    preview_ok = false;
                }
            }

            if self.cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            if self.stop_key.is_cancelled() {
                tracing::info!("session stopped by operator");
                return SessionEnd::Stopped;
            }

            match self.link.next_frame() {
                Some(next) => frame = next,
                None => return SessionEnd::EndOfStream,
            }
        }
    }
}
