//! Role configuration.
//!
//! Each role takes its configuration as an explicit struct, so tests can
//! override ports, hosts, paths and timings without touching global state.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeZone};

/// Default UDP port for the media stream.
pub const DEFAULT_PORT: u16 = 6000;

/// Default destination host for the sender.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Timestamp layout used in recording file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Timing of the reconnecting source's wait phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between reads while waiting for the first frame.
    pub poll_interval: Duration,
    /// How long a freshly acquired handle may stay silent before it is replaced.
    pub wait_window: Duration,
    /// Pause between releasing a silent handle and acquiring its replacement.
    pub reacquire_delay: Duration,
    /// Pause after a handle fails to open.
    pub open_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            wait_window: Duration::from_secs(10),
            reacquire_delay: Duration::from_millis(200),
            open_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Where recordings are written and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Directory for recordings, created on demand.
    pub dir: PathBuf,
    /// File name prefix (`<prefix>_<YYYYMMDD-HHMMSS>.<extension>`).
    pub prefix: String,
    /// Container extension without the dot.
    pub extension: String,
}

impl OutputConfig {
    /// Path of a recording started at `timestamp`.
    pub fn path_at<Tz>(&self, timestamp: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.dir.join(format!(
            "{}_{}.{}",
            self.prefix,
            timestamp.format(TIMESTAMP_FORMAT),
            self.extension
        ))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("recordings"),
            prefix: "receiver".to_string(),
            extension: "mkv".to_string(),
        }
    }
}

/// Configuration for the receiving role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// UDP port to listen on.
    pub port: u16,
    pub output: OutputConfig,
    /// Nominal frame rate written into recordings.
    pub record_fps: u32,
    pub retry: RetryPolicy,
    /// Open a live preview window per session.
    pub preview: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            output: OutputConfig::default(),
            record_fps: 20,
            retry: RetryPolicy::default(),
            preview: true,
        }
    }
}

/// Configuration for the sending role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Capture device index (`/dev/video<N>`).
    pub device: u32,
    /// Destination host for the UDP stream.
    pub host: String,
    /// Destination UDP port.
    pub port: u16,
    /// Nominal frame rate handed to the encoder.
    pub fps: u32,
    /// Encoder bitrate in kbit/s.
    pub bitrate_kbps: u32,
    /// Frames sent before the downstream process is launched.
    pub warmup_frames: u32,
    /// Pause between warm-up frames.
    pub warmup_interval: Duration,
    /// Pause after launching the downstream process.
    pub settle_delay: Duration,
    /// Show a local preview window.
    pub preview: bool,
    /// Keep capturing and previewing when no transmit pipeline opens.
    /// When false the sender fails with
    /// [`TransmitUnavailable`](crate::UdpcastError::TransmitUnavailable).
    pub allow_preview_only: bool,
    /// Launch the receiver as a child process.
    pub spawn_receiver: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            device: 0,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            fps: 20,
            bitrate_kbps: 500,
            warmup_frames: 10,
            warmup_interval: Duration::from_millis(50),
            settle_delay: Duration::from_secs(1),
            preview: true,
            allow_preview_only: false,
            spawn_receiver: true,
        }
    }
}
