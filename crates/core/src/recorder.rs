//! Session recording.
//!
//! A session starts with the first frame after a (re)connect. Its geometry
//! comes from that frame and its file name from the wall-clock start time:
//!
//! ```text
//! <dir>/<prefix>_<YYYYMMDD-HHMMSS>.<extension>
//! ```
//!
//! Names have one-second granularity. When a second session starts within
//! the same second, a `-1`, `-2`, ... suffix keeps the earlier file intact.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::config::OutputConfig;
use crate::error::Result;
use crate::media::{Codec, CodecPreference, Frame, FrameSink, SinkFactory, SinkRequest, open_with_fallback};

/// One continuous run of received frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub started_at: DateTime<Local>,
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
    pub codec: Codec,
    pub frames_written: u64,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The source stopped producing frames.
    EndOfStream,
    /// The stop key ended this session; the receiver keeps listening.
    Stopped,
    /// An interrupt stopped the whole run.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub codec: Codec,
    pub frames_written: u64,
    pub end: SessionEnd,
}

/// Opens a recording sink for each new session.
pub struct SessionRecorder<K: SinkFactory> {
    factory: K,
    output: OutputConfig,
    fps: u32,
    preference: CodecPreference,
}

impl<K: SinkFactory> SessionRecorder<K> {
    pub fn new(factory: K, output: OutputConfig, fps: u32) -> Self {
        Self {
            factory,
            output,
            fps,
            preference: CodecPreference::RECORDING,
        }
    }

    pub fn with_preference(mut self, preference: CodecPreference) -> Self {
        self.preference = preference;
        self
    }

    pub fn output(&self) -> &OutputConfig {
        &self.output
    }

    /// Start a session now. See [`begin_at`](Self::begin_at).
    pub fn begin(&mut self, first: &Frame) -> Result<Recording<K::Sink>> {
        self.begin_at(first, Local::now())
    }

    /// Start a session whose geometry comes from `first`.
    ///
    /// Opens the sink with the primary codec, then once with the fallback.
    /// When both fail the session is abandoned with
    /// [`NoUsableCodec`](crate::UdpcastError::NoUsableCodec). The first frame
    /// is not written; the caller writes it like any other.
    pub fn begin_at(&mut self, first: &Frame, started_at: DateTime<Local>) -> Result<Recording<K::Sink>> {
        let path = resolve_output_path(&self.output, &started_at)?;
        let (width, height) = first.dimensions();

        let request = SinkRequest {
            path: Some(path.clone()),
            codec: self.preference.primary,
            width,
            height,
            fps: self.fps,
        };
        let (sink, codec) = open_with_fallback(&mut self.factory, self.preference, &request)?;

        tracing::info!(path = %path.display(), width, height, %codec, "recording started");

        Ok(Recording {
            session: StreamSession {
                started_at,
                width,
                height,
                path,
                codec,
                frames_written: 0,
            },
            sink: Some(sink),
            opened: Instant::now(),
        })
    }
}

/// An open recording. Owns its sink until [`finish`](Self::finish).
pub struct Recording<S: FrameSink> {
    session: StreamSession,
    sink: Option<S>,
    opened: Instant,
}

impl<S: FrameSink> Recording<S> {
    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Write a frame. Failures are logged and the frame is not counted.
    pub fn write(&mut self, frame: &Frame) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.write_frame(frame) {
            Ok(()) => self.session.frames_written += 1,
            Err(e) => tracing::warn!(path = %self.session.path.display(), error = %e, "frame not recorded"),
        }
    }

    /// Finalize the container and release the sink.
    pub fn finish(mut self, end: SessionEnd) -> SessionSummary {
        self.close();
        tracing::info!(
            path = %self.session.path.display(),
            frames = self.session.frames_written,
            elapsed_ms = self.opened.elapsed().as_millis() as u64,
            ?end,
            "recording saved"
        );
        SessionSummary {
            path: self.session.path.clone(),
            codec: self.session.codec,
            frames_written: self.session.frames_written,
            end,
        }
    }

    fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
    }
}

impl<S: FrameSink> Drop for Recording<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create the output directory if needed and pick a file name that does not
/// overwrite an earlier recording.
pub fn resolve_output_path(output: &OutputConfig, started_at: &DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(&output.dir)?;

    let base = output.path_at(started_at);
    if !base.exists() {
        return Ok(base);
    }

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 1u32;
    loop {
        let candidate = with_suffix(&base, &stem, n, &output.extension);
        if !candidate.exists() {
            tracing::warn!(
                existing = %base.display(),
                path = %candidate.display(),
                "recording name already taken, adding suffix"
            );
            return Ok(candidate);
        }
        n += 1;
    }
}

fn with_suffix(base: &Path, stem: &str, n: u32, extension: &str) -> PathBuf {
    base.with_file_name(format!("{stem}-{n}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UdpcastError;
    use crate::testing::{MockSinkFactory, SinkBehavior};
    use chrono::TimeZone;

    fn output(dir: &Path) -> OutputConfig {
        OutputConfig {
            dir: dir.join("recordings"),
            prefix: "receiver".to_string(),
            extension: "mkv".to_string(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 6, 1, h, m, s)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn creates_missing_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = output(tmp.path());
        let path = resolve_output_path(&out, &at(12, 0, 1)).expect("path");
        assert!(out.dir.is_dir());
        assert_eq!(path, out.dir.join("receiver_20250601-120001.mkv"));
    }

    #[test]
    fn same_second_gets_suffix() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = output(tmp.path());
        let first = resolve_output_path(&out, &at(9, 30, 0)).expect("path");
        fs::write(&first, b"mkv").expect("write");

        let second = resolve_output_path(&out, &at(9, 30, 0)).expect("path");
        assert_eq!(second, out.dir.join("receiver_20250601-093000-1.mkv"));
        fs::write(&second, b"mkv").expect("write");

        let third = resolve_output_path(&out, &at(9, 30, 0)).expect("path");
        assert_eq!(third, out.dir.join("receiver_20250601-093000-2.mkv"));
    }

    #[test]
    fn session_geometry_from_first_frame() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let factory = MockSinkFactory::default();
        let stats = factory.stats();
        let mut recorder = SessionRecorder::new(factory, output(tmp.path()), 20);

        let recording = recorder
            .begin_at(&Frame::blank(320, 240), at(1, 2, 3))
            .expect("begin");
        assert_eq!(recording.session().width, 320);
        assert_eq!(recording.session().height, 240);
        assert_eq!(recording.session().codec, Codec::X264);

        let request = stats.lock().requests[0].clone();
        assert_eq!(request.fps, 20);
        assert_eq!(request.path.as_deref(), Some(recording.session().path.as_path()));
    }

    #[test]
    fn fallback_codec_is_recorded() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut factory = MockSinkFactory::default();
        factory.set(Codec::X264, SinkBehavior::Fail);
        let mut recorder = SessionRecorder::new(factory, output(tmp.path()), 20);

        let recording = recorder.begin(&Frame::blank(8, 8)).expect("begin");
        assert_eq!(recording.session().codec, Codec::Mjpeg);
    }

    #[test]
    fn no_codec_abandons_session() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut factory = MockSinkFactory::default();
        factory.set(Codec::X264, SinkBehavior::Fail);
        factory.set(Codec::Mjpeg, SinkBehavior::NotOpen);
        let stats = factory.stats();
        let mut recorder = SessionRecorder::new(factory, output(tmp.path()), 20);

        let err = recorder.begin(&Frame::blank(8, 8)).err().expect("abandoned");
        assert!(matches!(err, UdpcastError::NoUsableCodec { .. }));
        assert_eq!(stats.lock().live, 0);
    }

    #[test]
    fn finish_releases_sink_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let factory = MockSinkFactory::default();
        let stats = factory.stats();
        let mut recorder = SessionRecorder::new(factory, output(tmp.path()), 20);

        let mut recording = recorder.begin(&Frame::blank(8, 8)).expect("begin");
        recording.write(&Frame::blank(8, 8));
        recording.write(&Frame::blank(8, 8));
        let summary = recording.finish(SessionEnd::EndOfStream);

        assert_eq!(summary.frames_written, 2);
        assert_eq!(summary.end, SessionEnd::EndOfStream);
        let stats = stats.lock();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.double_released, 0);
    }
}
