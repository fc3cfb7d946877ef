//! Appsrc-backed frame sinks: the UDP transmit pipeline and file recordings.

use std::time::Duration;

use gst::prelude::*;
use udpcast::media::SinkRequest;
use udpcast::{Frame, FrameSink, Result, SinkFactory, UdpcastError};

use crate::handle::{self, pipeline_error};
use crate::pipeline;

/// How long a recording may take to flush its container on release.
const EOS_TIMEOUT: Duration = Duration::from_secs(5);

/// How buffers pushed into the pipeline are timestamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// Running time on arrival, for live outputs.
    Live,
    /// Frame index over the nominal rate, for files.
    Nominal,
}

/// A running pipeline that starts with `appsrc name=src`.
pub struct AppSrcSink {
    pipeline: Option<gst::Pipeline>,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    frame_duration: Option<gst::ClockTime>,
    drain_on_release: bool,
    frames: u64,
}

impl AppSrcSink {
    /// Launch `description` with BGRx input of the given geometry.
    ///
    /// `configure` runs after parsing and before the pipeline starts.
    pub fn open(
        description: &str,
        width: u32,
        height: u32,
        fps: u32,
        timing: Timing,
        configure: impl FnOnce(&gst::Pipeline) -> Result<()>,
    ) -> Result<Self> {
        let pipeline = handle::launch(description)?;
        let appsrc = handle::element::<gst_app::AppSrc>(&pipeline, "src")?;

        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Bgrx, width, height)
            .fps(gst::Fraction::new(fps as i32, 1))
            .build()
            .map_err(|e| pipeline_error("video info", e))?;
        let caps = info.to_caps().map_err(|e| pipeline_error("caps", e))?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);

        configure(&pipeline)?;
        handle::play(&pipeline)?;

        let frame_duration = match timing {
            Timing::Nominal if fps > 0 => Some(gst::ClockTime::from_nseconds(
                1_000_000_000 / u64::from(fps),
            )),
            _ => None,
        };

        Ok(Self {
            pipeline: Some(pipeline),
            appsrc,
            width,
            height,
            frame_duration,
            drain_on_release: timing == Timing::Nominal,
            frames: 0,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for AppSrcSink {
    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(pipeline) = &self.pipeline else {
            return Err(UdpcastError::Pipeline("sink already released".to_string()));
        };
        handle::check_bus(pipeline)?;

        if frame.dimensions() != (self.width, self.height) {
            return Err(UdpcastError::Pipeline(format!(
                "frame is {}x{}, sink expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
        if let Some(duration) = self.frame_duration {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| UdpcastError::Pipeline("buffer is shared".to_string()))?;
            buffer.set_pts(gst::ClockTime::from_nseconds(duration.nseconds() * self.frames));
            buffer.set_duration(duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| pipeline_error("push", e))?;
        self.frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };

        if self.drain_on_release {
            match self.appsrc.end_of_stream() {
                Ok(_) => {
                    if let Err(e) = handle::wait_for_eos(&pipeline, EOS_TIMEOUT) {
                        tracing::warn!(error = %e, "output may be truncated");
                    }
                }
                Err(e) => tracing::warn!(error = ?e, "failed to send end-of-stream"),
            }
        }

        handle::shutdown(&pipeline);
        tracing::debug!(pipeline = %pipeline.name(), frames = self.frames, "sink pipeline released");
    }
}

impl Drop for AppSrcSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens the RTP/H.264 transmit pipeline towards `host:port`.
#[derive(Debug, Clone)]
pub struct TransmitFactory {
    pub host: String,
    pub port: u16,
    pub bitrate_kbps: u32,
}

impl SinkFactory for TransmitFactory {
    type Sink = AppSrcSink;

    fn open(&mut self, request: &SinkRequest) -> Result<AppSrcSink> {
        let description = pipeline::transmit(request.codec, &self.host, self.port, self.bitrate_kbps)?;
        tracing::debug!(codec = %request.codec, host = %self.host, port = self.port, "opening transmit pipeline");
        AppSrcSink::open(
            &description,
            request.width,
            request.height,
            request.fps,
            Timing::Live,
            |_| Ok(()),
        )
    }
}

/// Opens Matroska recordings at the requested path.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory;

impl SinkFactory for RecordingFactory {
    type Sink = AppSrcSink;

    fn open(&mut self, request: &SinkRequest) -> Result<AppSrcSink> {
        let path = request
            .path
            .as_deref()
            .ok_or_else(|| UdpcastError::Pipeline("recording needs an output path".to_string()))?;
        tracing::debug!(codec = %request.codec, path = %path.display(), "opening recording pipeline");

        AppSrcSink::open(
            &pipeline::record(request.codec),
            request.width,
            request.height,
            request.fps,
            Timing::Nominal,
            |pipeline| {
                let file = handle::element::<gst::Element>(pipeline, "file")?;
                file.set_property("location", path.to_string_lossy().into_owned());
                Ok(())
            },
        )
    }
}
