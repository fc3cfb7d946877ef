//! GStreamer pipelines behind the `udpcast` handle traits.
//!
//! Each factory parses a `gst-launch` style description (see [`pipeline`]),
//! exchanges packed BGRx frames through `appsink`/`appsrc`, and tears the
//! pipeline down to `Null` on release.
//!
//! | Type | Trait | Pipeline |
//! |------|-------|----------|
//! | [`UdpReceiveFactory`] | `SourceFactory` | `udpsrc ! rtpjitterbuffer ! rtph264depay ! avdec_h264 ! appsink` |
//! | [`CameraFactory`] | `SourceFactory` | `v4l2src ! videoconvert ! appsink` |
//! | [`TransmitFactory`] | `SinkFactory` | `appsrc ! x264enc ! rtph264pay ! udpsink` |
//! | [`RecordingFactory`] | `SinkFactory` | `appsrc ! x264enc ! h264parse ! matroskamux ! filesink` |
//! | [`WindowPreview`] | `Preview` | `appsrc ! videoconvert ! autovideosink` |
//!
//! Call [`init`] once before opening anything.

mod handle;
pub mod pipeline;
mod preview;
mod sink;
mod source;

pub use preview::WindowPreview;
pub use sink::{AppSrcSink, RecordingFactory, Timing, TransmitFactory};
pub use source::{AppSinkSource, CameraFactory, ReadTimeouts, UdpReceiveFactory};

use udpcast::{Result, UdpcastError};

/// Initialize GStreamer.
pub fn init() -> Result<()> {
    gst::init().map_err(|e| UdpcastError::Pipeline(format!("gstreamer init: {e}")))?;
    tracing::debug!(version = %gst::version_string(), "gstreamer initialized");
    Ok(())
}
