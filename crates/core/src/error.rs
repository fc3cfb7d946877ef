//! Error types for the udpcast library.

use crate::media::Codec;

/// Errors that can occur while sending, receiving or recording a stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Pipeline**: [`Pipeline`](Self::Pipeline): the media subsystem could
///   not build or start a pipeline handle.
/// - **Sender**: [`CaptureUnavailable`](Self::CaptureUnavailable),
///   [`NoFirstFrame`](Self::NoFirstFrame),
///   [`TransmitUnavailable`](Self::TransmitUnavailable).
/// - **Recorder**: [`NoUsableCodec`](Self::NoUsableCodec).
/// - **Process**: [`Launch`](Self::Launch), [`Signal`](Self::Signal).
#[derive(Debug, thiserror::Error)]
pub enum UdpcastError {
    /// Underlying I/O error (output directory, file metadata, process spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline could not be constructed, linked or set to playing.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// The capture device did not open.
    #[error("capture source unavailable")]
    CaptureUnavailable,

    /// The capture device opened but never produced a frame.
    #[error("capture source produced no initial frame")]
    NoFirstFrame,

    /// Neither the primary nor the fallback encoder could open a transmit pipeline.
    #[error("transmit pipeline unavailable")]
    TransmitUnavailable,

    /// Both the primary and the fallback codec failed to open a sink.
    #[error("no usable codec (tried {primary} and {fallback})")]
    NoUsableCodec { primary: Codec, fallback: Codec },

    /// The downstream process could not be started.
    #[error("failed to launch downstream process: {0}")]
    Launch(String),

    /// Signalling the downstream process group failed for a reason other
    /// than the process having already exited.
    #[error("failed to signal downstream process: {0}")]
    Signal(std::io::Error),
}

/// Convenience alias for `Result<T, UdpcastError>`.
pub type Result<T> = std::result::Result<T, UdpcastError>;
