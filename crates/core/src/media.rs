//! Frames and pipeline handles.
//!
//! The heavy lifting (capture, H.264 encode/decode, RTP, jitter buffering,
//! muxing) lives in an external media subsystem. This module defines the
//! seams the sender and receiver loops talk to:
//!
//! | Trait | Direction | Opened by |
//! |-------|-----------|-----------|
//! | [`FrameSource`] | pull | [`SourceFactory::acquire`] |
//! | [`FrameSink`] | push | [`SinkFactory::open`] |
//! | [`Preview`] | push | lazily, on first [`Preview::show`] |
//!
//! Every handle has exactly one owner, the loop that opened it, and must be
//! released by that owner on every exit path. Implementations make
//! `release` idempotent so that a `Drop` fallback never double-frees.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, UdpcastError};

/// A decoded video frame in packed BGRx layout (4 bytes per pixel, no padding).
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// A frame of the given size filled with zeroes.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        Self::new(width, height, vec![0; len])
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Encoder used by a sink pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264 through x264.
    X264,
    /// H.264 through libav (`avenc_h264`).
    LibavH264,
    /// Motion JPEG.
    Mjpeg,
}

impl Codec {
    pub fn name(self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::LibavH264 => "avenc_h264",
            Self::Mjpeg => "mjpeg",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A primary codec and the single alternate tried when it fails to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecPreference {
    pub primary: Codec,
    pub fallback: Codec,
}

impl CodecPreference {
    /// x264 for recordings, falling back to MJPEG.
    pub const RECORDING: Self = Self {
        primary: Codec::X264,
        fallback: Codec::Mjpeg,
    };

    /// x264 for the UDP stream, falling back to libav's H.264 encoder.
    pub const TRANSMIT: Self = Self {
        primary: Codec::X264,
        fallback: Codec::LibavH264,
    };
}

/// Parameters for opening a [`FrameSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRequest {
    /// Output file, for sinks that persist to disk.
    pub path: Option<PathBuf>,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// A pull-direction pipeline handle.
pub trait FrameSource {
    /// Explicit open check. A handle may be constructed and still be unusable.
    fn is_open(&self) -> bool;

    /// Pull one frame. `Ok(None)` is the failure flag: during the wait phase
    /// it means "not yet started", during streaming it means end-of-stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Tear down the underlying pipeline. Idempotent.
    fn release(&mut self);
}

/// A push-direction pipeline handle.
pub trait FrameSink {
    fn is_open(&self) -> bool;

    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize and tear down. For file sinks this flushes end-of-stream so
    /// the container is complete. Idempotent.
    fn release(&mut self);
}

/// A live preview window.
pub trait Preview {
    /// Display a frame, opening the window on first use.
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// Close the window if open. Idempotent.
    fn close(&mut self);
}

impl<P: Preview + ?Sized> Preview for Box<P> {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        (**self).show(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Opens [`FrameSource`] handles bound to a fixed configuration.
pub trait SourceFactory {
    type Source: FrameSource;

    fn acquire(&mut self) -> Result<Self::Source>;
}

/// Opens [`FrameSink`] handles for a given codec and frame geometry.
pub trait SinkFactory {
    type Sink: FrameSink;

    fn open(&mut self, request: &SinkRequest) -> Result<Self::Sink>;
}

/// A preview that never opens a window, for headless runs.
#[derive(Debug, Default)]
pub struct NoPreview;

impl Preview for NoPreview {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Open a sink with `preference.primary`, then exactly once with
/// `preference.fallback`.
///
/// A sink that is constructed but fails its open check is released before
/// the next attempt. Returns the opened sink and the codec it was opened with.
pub fn open_with_fallback<F: SinkFactory>(
    factory: &mut F,
    preference: CodecPreference,
    base: &SinkRequest,
) -> Result<(F::Sink, Codec)> {
    for codec in [preference.primary, preference.fallback] {
        let request = SinkRequest {
            codec,
            ..base.clone()
        };
        match factory.open(&request) {
            Ok(sink) if sink.is_open() => {
                if codec != preference.primary {
                    tracing::warn!(
                        primary = %preference.primary,
                        fallback = %codec,
                        "primary codec unavailable, using fallback"
                    );
                }
                return Ok((sink, codec));
            }
            Ok(mut sink) => {
                tracing::warn!(%codec, "sink failed open check");
                sink.release();
            }
            Err(e) => {
                tracing::warn!(%codec, error = %e, "sink failed to open");
            }
        }
    }

    Err(UdpcastError::NoUsableCodec {
        primary: preference.primary,
        fallback: preference.fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPreview, MockSinkFactory, SinkBehavior};

    fn request() -> SinkRequest {
        SinkRequest {
            path: None,
            codec: Codec::X264,
            width: 64,
            height: 48,
            fps: 20,
        }
    }

    #[test]
    fn blank_frame_size() {
        let frame = Frame::blank(4, 2);
        assert_eq!(frame.data.len(), 32);
        assert_eq!(frame.dimensions(), (4, 2));
    }

    #[test]
    fn primary_codec_used_when_available() {
        let mut factory = MockSinkFactory::default();
        let (_, codec) = open_with_fallback(&mut factory, CodecPreference::RECORDING, &request())
            .expect("open");
        assert_eq!(codec, Codec::X264);
        assert_eq!(factory.attempts(), vec![Codec::X264]);
    }

    #[test]
    fn exactly_one_fallback_attempt() {
        let mut factory = MockSinkFactory::default();
        factory.set(Codec::X264, SinkBehavior::Fail);
        factory.set(Codec::Mjpeg, SinkBehavior::Fail);

        let err = open_with_fallback(&mut factory, CodecPreference::RECORDING, &request())
            .err()
            .expect("both codecs fail");
        assert!(matches!(
            err,
            UdpcastError::NoUsableCodec {
                primary: Codec::X264,
                fallback: Codec::Mjpeg
            }
        ));
        assert_eq!(factory.attempts(), vec![Codec::X264, Codec::Mjpeg]);
    }

    #[test]
    fn unopened_sink_is_released_before_fallback() {
        let mut factory = MockSinkFactory::default();
        factory.set(Codec::X264, SinkBehavior::NotOpen);

        let (_, codec) = open_with_fallback(&mut factory, CodecPreference::TRANSMIT, &request())
            .expect("fallback opens");
        assert_eq!(codec, Codec::LibavH264);
        assert_eq!(factory.released(), 1);
    }

    #[test]
    fn boxed_preview_forwards() {
        let inner = MockPreview::default();
        let stats = inner.stats();
        let mut preview: Box<dyn Preview> = Box::new(inner);

        preview.show(&Frame::blank(2, 2)).expect("show");
        preview.close();
        let stats = stats.lock();
        assert_eq!((stats.shown, stats.opened, stats.closed), (1, 1, 1));
    }

    #[test]
    fn codec_display() {
        assert_eq!(Codec::LibavH264.to_string(), "avenc_h264");
    }
}
