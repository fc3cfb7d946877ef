pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod link;
pub mod media;
pub mod process;
pub mod receiver;
pub mod recorder;
pub mod sender;

#[cfg(test)]
mod testing;

pub use cancel::{CancelReason, CancelToken};
pub use clock::{Clock, SystemClock};
pub use config::{OutputConfig, ReceiverConfig, RetryPolicy, SenderConfig};
pub use error::{Result, UdpcastError};
pub use link::ReconnectingSource;
pub use media::{Codec, Frame, FrameSink, FrameSource, Preview, SinkFactory, SourceFactory};
pub use process::{ChildProcess, CommandLauncher, StopOutcome};
pub use receiver::{Receiver, ReceiverStats};
pub use recorder::{SessionEnd, SessionRecorder, SessionSummary};
pub use sender::{Sender, SenderStats};
