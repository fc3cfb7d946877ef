//! Sending role: capture, transmit, preview, manage the receiver process.
//!
//! Startup sequence:
//!
//! 1. Open the capture source and read one frame to learn the geometry.
//! 2. Open the transmit sink (primary encoder, then one fallback).
//! 3. Send a short warm-up burst so a listener can settle.
//! 4. Launch the downstream process and wait for it to settle.
//! 5. Capture, preview and transmit until cancelled or capture fails.
//!
//! Teardown releases capture, transmit and preview, then stops the
//! downstream process group. Failures to stop it are logged only.

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::SenderConfig;
use crate::error::{Result, UdpcastError};
use crate::media::{
    Codec, CodecPreference, Frame, FrameSink, FrameSource, Preview, SinkFactory, SinkRequest,
    SourceFactory, open_with_fallback,
};
use crate::process::{Downstream, Launcher, StopOutcome};

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderEnd {
    Cancelled,
    /// The capture source stopped producing frames.
    CaptureLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStats {
    /// Encoder used for the stream, `None` in preview-only mode.
    pub codec: Option<Codec>,
    pub warmup_sent: u32,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub downstream: Option<StopOutcome>,
    pub end: SenderEnd,
}

pub struct Sender<F, K, P, C>
where
    F: SourceFactory,
    K: SinkFactory,
    P: Preview,
    C: Clock,
{
    config: SenderConfig,
    capture: F,
    transmit: K,
    preview: P,
    launcher: Option<Box<dyn Launcher>>,
    clock: C,
    cancel: CancelToken,
}

struct Handles<S, T> {
    capture: S,
    transmit: Option<T>,
    downstream: Option<Box<dyn Downstream>>,
}

impl<F, K, P, C> Sender<F, K, P, C>
where
    F: SourceFactory,
    K: SinkFactory,
    P: Preview,
    C: Clock,
{
    pub fn new(
        config: SenderConfig,
        capture: F,
        transmit: K,
        preview: P,
        clock: C,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            capture,
            transmit,
            preview,
            launcher: None,
            clock,
            cancel,
        }
    }

    /// Launch a downstream process once the warm-up burst has been sent.
    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn run(&mut self) -> Result<SenderStats> {
        let mut capture = match self.capture.acquire() {
            Ok(capture) if capture.is_open() => capture,
            Ok(mut capture) => {
                tracing::error!(device = self.config.device, "capture device did not open");
                capture.release();
                return Err(UdpcastError::CaptureUnavailable);
            }
            Err(e) => {
                tracing::error!(device = self.config.device, error = %e, "capture device did not open");
                return Err(UdpcastError::CaptureUnavailable);
            }
        };

        let first = match capture.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(_) => {
                tracing::error!(device = self.config.device, "no initial frame from capture device");
                capture.release();
                return Err(UdpcastError::NoFirstFrame);
            }
        };
        let (width, height) = first.dimensions();

        let request = SinkRequest {
            path: None,
            codec: CodecPreference::TRANSMIT.primary,
            width,
            height,
            fps: self.config.fps,
        };
        let (transmit, codec) =
            match open_with_fallback(&mut self.transmit, CodecPreference::TRANSMIT, &request) {
                Ok((sink, codec)) => {
                    tracing::info!(
                        host = %self.config.host,
                        port = self.config.port,
                        %codec,
                        width,
                        height,
                        "transmit pipeline opened"
                    );
                    (Some(sink), Some(codec))
                }
                Err(e) if self.config.allow_preview_only => {
                    tracing::warn!(error = %e, "no transmit pipeline, continuing with preview only");
                    (None, None)
                }
                Err(e) => {
                    tracing::error!(error = %e, "no transmit pipeline");
                    capture.release();
                    return Err(UdpcastError::TransmitUnavailable);
                }
            };

        let mut handles = Handles {
            capture,
            transmit,
            downstream: None,
        };
        let mut stats = SenderStats {
            codec,
            warmup_sent: 0,
            frames_captured: 1,
            frames_sent: 0,
            downstream: None,
            end: SenderEnd::Cancelled,
        };

        stats.end = self.stream(&mut handles, &mut stats);
        stats.downstream = self.teardown(handles);

        tracing::info!(
            captured = stats.frames_captured,
            sent = stats.frames_sent,
            end = ?stats.end,
            "sender stopped"
        );
        Ok(stats)
    }

    fn stream(&mut self, handles: &mut Handles<F::Source, K::Sink>, stats: &mut SenderStats) -> SenderEnd {
        tracing::info!(frames = self.config.warmup_frames, "sending warm-up burst");
        for _ in 0..self.config.warmup_frames {
            if self.cancel.is_cancelled() {
                return SenderEnd::Cancelled;
            }
            let Some(frame) = read(&mut handles.capture) else {
                break;
            };
            stats.frames_captured += 1;
            if transmit(&mut handles.transmit, &frame) {
                stats.frames_sent += 1;
            }
            stats.warmup_sent += 1;
            self.clock.sleep(self.config.warmup_interval);
        }

        if let Some(launcher) = self.launcher.as_mut() {
            match launcher.launch() {
                Ok(downstream) => handles.downstream = Some(downstream),
                Err(e) => tracing::error!(error = %e, "receiver not started, streaming anyway"),
            }
        }
        self.clock.sleep(self.config.settle_delay);

        tracing::info!(host = %self.config.host, port = self.config.port, "live stream started");
        let mut preview_ok = true;
        loop {
            if self.cancel.is_cancelled() {
                return SenderEnd::Cancelled;
            }

            let Some(frame) = read(&mut handles.capture) else {
                tracing::error!(device = self.config.device, "capture stopped producing frames");
                return SenderEnd::CaptureLost;
            };
            stats.frames_captured += 1;

            if preview_ok {
                if let Err(e) = self.preview.show(&frame) {
                    tracing::warn!(error = %e, "preview unavailable, streaming without it");
                    self.preview.close();
                    preview_ok = false;
                }
            }
            if transmit(&mut handles.transmit, &frame) {
                stats.frames_sent += 1;
            }
        }
    }

    fn teardown(&mut self, handles: Handles<F::Source, K::Sink>) -> Option<StopOutcome> {
        let Handles {
            mut capture,
            transmit,
            downstream,
        } = handles;

        capture.release();
        if let Some(mut sink) = transmit {
            sink.release();
        }
        self.preview.close();

        let mut downstream = downstream?;
        let pid = downstream.id();
        match downstream.stop() {
            Ok(outcome) => {
                tracing::info!(pid, ?outcome, "receiver process stopped");
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed to stop receiver process");
                None
            }
        }
    }
}

fn read<S: FrameSource>(capture: &mut S) -> Option<Frame> {
    match capture.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "capture read failed");
            None
        }
    }
}

fn transmit<T: FrameSink>(sink: &mut Option<T>, frame: &Frame) -> bool {
    let Some(sink) = sink.as_mut() else {
        return false;
    };
    match sink.write_frame(frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "frame not transmitted");
            false
        }
    }
}
