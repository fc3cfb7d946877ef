//! Appsink-backed frame sources.

use std::time::Duration;

use gst::prelude::*;
use udpcast::{Frame, FrameSource, Result, SourceFactory, UdpcastError};

use crate::handle::{self, pipeline_error};
use crate::pipeline;

/// How long a single read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTimeouts {
    /// Before the first frame arrives. Keep this short for UDP: the caller
    /// polls, and the wait window is measured outside the read.
    pub first_frame: Duration,
    /// Once frames are flowing. A read that times out here ends the stream.
    pub streaming: Duration,
}

impl ReadTimeouts {
    /// Timeouts for an incoming UDP stream.
    pub const UDP: Self = Self {
        first_frame: Duration::from_millis(10),
        streaming: Duration::from_secs(2),
    };

    /// Timeouts for a local camera, which may take a while to start.
    pub const CAMERA: Self = Self {
        first_frame: Duration::from_secs(3),
        streaming: Duration::from_secs(2),
    };
}

/// A running pipeline that ends in `appsink name=sink`.
pub struct AppSinkSource {
    pipeline: Option<gst::Pipeline>,
    appsink: gst_app::AppSink,
    timeouts: ReadTimeouts,
    started: bool,
}

impl AppSinkSource {
    pub fn open(description: &str, timeouts: ReadTimeouts) -> Result<Self> {
        let pipeline = handle::launch(description)?;
        let appsink = handle::element::<gst_app::AppSink>(&pipeline, "sink")?;
        handle::play(&pipeline)?;
        tracing::debug!(pipeline = %pipeline.name(), "source pipeline playing");

        Ok(Self {
            pipeline: Some(pipeline),
            appsink,
            timeouts,
            started: false,
        })
    }
}

impl FrameSource for AppSinkSource {
    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(None);
        };
        handle::check_bus(pipeline)?;

        let timeout = if self.started {
            self.timeouts.streaming
        } else {
            self.timeouts.first_frame
        };
        let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            return Ok(None);
        };

        let frame = frame_from_sample(&sample)?;
        self.started = true;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            handle::shutdown(&pipeline);
            tracing::debug!(pipeline = %pipeline.name(), "source pipeline released");
        }
    }
}

impl Drop for AppSinkSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn frame_from_sample(sample: &gst::Sample) -> Result<Frame> {
    let caps = sample
        .caps()
        .ok_or_else(|| UdpcastError::Pipeline("sample without caps".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|e| pipeline_error("caps", e))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| UdpcastError::Pipeline("sample without buffer".to_string()))?;
    let map = buffer.map_readable().map_err(|e| pipeline_error("map", e))?;

    let (width, height) = (info.width(), info.height());
    let data = pack_rows(
        map.as_slice(),
        info.offset()[0],
        info.stride()[0] as usize,
        width,
        height,
    )
    .ok_or_else(|| UdpcastError::Pipeline(format!("short buffer for {width}x{height}")))?;

    Ok(Frame::new(width, height, data))
}

/// Copy a strided BGRx plane into a tightly packed buffer.
fn pack_rows(data: &[u8], offset: usize, stride: usize, width: u32, height: u32) -> Option<Vec<u8>> {
    let row = width as usize * Frame::BYTES_PER_PIXEL;
    let height = height as usize;
    if height == 0 {
        return Some(Vec::new());
    }
    if stride < row || data.len() < offset + stride * (height - 1) + row {
        return None;
    }

    if stride == row {
        return Some(data[offset..offset + row * height].to_vec());
    }
    let mut packed = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = offset + y * stride;
        packed.extend_from_slice(&data[start..start + row]);
    }
    Some(packed)
}

/// Opens the RTP/H.264 receive pipeline on a UDP port.
#[derive(Debug, Clone)]
pub struct UdpReceiveFactory {
    pub port: u16,
    pub timeouts: ReadTimeouts,
}

impl UdpReceiveFactory {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeouts: ReadTimeouts::UDP,
        }
    }
}

impl SourceFactory for UdpReceiveFactory {
    type Source = AppSinkSource;

    fn acquire(&mut self) -> Result<AppSinkSource> {
        tracing::debug!(port = self.port, "opening receive pipeline");
        AppSinkSource::open(&pipeline::receive(self.port), self.timeouts)
    }
}

/// Opens a camera capture pipeline.
#[derive(Debug, Clone)]
pub struct CameraFactory {
    pub device: u32,
    pub timeouts: ReadTimeouts,
}

impl CameraFactory {
    pub fn new(device: u32) -> Self {
        Self {
            device,
            timeouts: ReadTimeouts::CAMERA,
        }
    }
}

impl SourceFactory for CameraFactory {
    type Source = AppSinkSource;

    fn acquire(&mut self) -> Result<AppSinkSource> {
        tracing::debug!(device = self.device, "opening capture pipeline");
        AppSinkSource::open(&pipeline::capture(self.device), self.timeouts)
    }
}
