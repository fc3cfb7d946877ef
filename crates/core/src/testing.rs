//! Scripted pipeline handles and a manual clock for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::{CancelReason, CancelToken};
use crate::clock::Clock;
use crate::error::{Result, UdpcastError};
use crate::media::{Codec, Frame, FrameSink, FrameSource, Preview, SinkFactory, SinkRequest, SourceFactory};
use crate::process::{Downstream, Launcher, StopOutcome};

type Callback = Box<dyn FnOnce() + Send>;

struct ClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
    callbacks: Vec<(Duration, Option<Callback>)>,
}

/// Clock that only advances when slept on.
#[derive(Clone)]
pub struct ManualClock {
    start: Instant,
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Arc::new(Mutex::new(ClockState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Run `f` the first time the clock reaches `at` past its start.
    pub fn on_elapsed(&self, at: Duration, f: impl FnOnce() + Send + 'static) {
        self.state.lock().callbacks.push((at, Some(Box::new(f))));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.state.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let due: Vec<Callback> = {
            let mut state = self.state.lock();
            state.elapsed += duration;
            state.sleeps.push(duration);
            let elapsed = state.elapsed;
            state
                .callbacks
                .iter_mut()
                .filter(|(at, _)| *at <= elapsed)
                .filter_map(|(_, f)| f.take())
                .collect()
        };
        for f in due {
            f();
        }
    }
}

/// Reads a [`MockSource`] will return, in order.
#[derive(Clone)]
pub struct Script {
    open: bool,
    reads: VecDeque<Option<Frame>>,
}

impl Script {
    /// Opens but never produces a frame.
    pub fn silent() -> Self {
        Self {
            open: true,
            reads: VecDeque::new(),
        }
    }

    /// Fails its open check.
    pub fn unopened() -> Self {
        Self {
            open: false,
            reads: VecDeque::new(),
        }
    }

    /// Produces `n` frames, then fails every read.
    pub fn frames(n: usize) -> Self {
        Self {
            open: true,
            reads: (0..n).map(|_| Some(Frame::blank(8, 6))).collect(),
        }
    }

    /// Fails `n` reads before producing `frames` frames.
    pub fn delayed(n: usize, frames: usize) -> Self {
        let mut script = Self::frames(frames);
        for _ in 0..n {
            script.reads.push_front(None);
        }
        script
    }
}

#[derive(Debug, Default)]
pub struct SourceStats {
    pub acquired: u64,
    pub released: u64,
    pub double_released: u64,
    pub live: u64,
    pub max_live: u64,
    pub acquired_at: Vec<Instant>,
}

pub struct MockSource {
    script: Script,
    released: bool,
    stats: Arc<Mutex<SourceStats>>,
}

impl FrameSource for MockSource {
    fn is_open(&self) -> bool {
        self.script.open
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        assert!(!self.released, "read after release");
        Ok(self.script.reads.pop_front().flatten())
    }

    fn release(&mut self) {
        let mut stats = self.stats.lock();
        if self.released {
            stats.double_released += 1;
            return;
        }
        self.released = true;
        stats.released += 1;
        stats.live -= 1;
    }
}

/// Hands out scripted sources in order, then silent ones.
pub struct MockSourceFactory {
    scripts: VecDeque<Script>,
    stats: Arc<Mutex<SourceStats>>,
    clock: Option<ManualClock>,
    fail_acquire: u32,
    cancel_after: Option<(u64, CancelToken)>,
}

impl MockSourceFactory {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: scripts.into(),
            stats: Arc::new(Mutex::new(SourceStats::default())),
            clock: None,
            fail_acquire: 0,
            cancel_after: None,
        }
    }

    /// Record acquisition times against `clock`.
    pub fn with_clock(mut self, clock: &ManualClock) -> Self {
        self.clock = Some(clock.clone());
        self
    }

    /// Return `Err` from the first `n` acquisitions.
    pub fn failing(mut self, n: u32) -> Self {
        self.fail_acquire = n;
        self
    }

    /// Cancel `token` once `n` handles have been handed out.
    pub fn cancel_after(mut self, n: u64, token: &CancelToken) -> Self {
        self.cancel_after = Some((n, token.clone()));
        self
    }

    pub fn stats(&self) -> Arc<Mutex<SourceStats>> {
        self.stats.clone()
    }
}

impl SourceFactory for MockSourceFactory {
    type Source = MockSource;

    fn acquire(&mut self) -> Result<MockSource> {
        if self.fail_acquire > 0 {
            self.fail_acquire -= 1;
            return Err(UdpcastError::Pipeline("no udpsrc".to_string()));
        }

        let script = self.scripts.pop_front().unwrap_or_else(Script::silent);
        let acquired = {
            let mut stats = self.stats.lock();
            stats.acquired += 1;
            stats.live += 1;
            stats.max_live = stats.max_live.max(stats.live);
            if let Some(clock) = &self.clock {
                stats.acquired_at.push(clock.now());
            }
            stats.acquired
        };

        if let Some((n, token)) = &self.cancel_after {
            if acquired >= *n {
                token.cancel(CancelReason::Requested);
            }
        }

        Ok(MockSource {
            script,
            released: false,
            stats: self.stats.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBehavior {
    Open,
    NotOpen,
    Fail,
}

#[derive(Debug, Default)]
pub struct SinkStats {
    pub attempts: Vec<Codec>,
    pub requests: Vec<SinkRequest>,
    pub written: u64,
    pub released: u64,
    pub double_released: u64,
    pub live: u64,
}

pub struct MockSink {
    open: bool,
    released: bool,
    stats: Arc<Mutex<SinkStats>>,
}

impl FrameSink for MockSink {
    fn is_open(&self) -> bool {
        self.open
    }

    fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        assert!(!self.released, "write after release");
        self.stats.lock().written += 1;
        Ok(())
    }

    fn release(&mut self) {
        let mut stats = self.stats.lock();
        if self.released {
            stats.double_released += 1;
            return;
        }
        self.released = true;
        stats.released += 1;
        stats.live -= 1;
    }
}

#[derive(Default)]
pub struct MockSinkFactory {
    behaviors: HashMap<Codec, SinkBehavior>,
    stats: Arc<Mutex<SinkStats>>,
}

impl MockSinkFactory {
    pub fn set(&mut self, codec: Codec, behavior: SinkBehavior) {
        self.behaviors.insert(codec, behavior);
    }

    pub fn stats(&self) -> Arc<Mutex<SinkStats>> {
        self.stats.clone()
    }

    pub fn attempts(&self) -> Vec<Codec> {
        self.stats.lock().attempts.clone()
    }

    pub fn released(&self) -> u64 {
        self.stats.lock().released
    }
}

impl SinkFactory for MockSinkFactory {
    type Sink = MockSink;

    fn open(&mut self, request: &SinkRequest) -> Result<MockSink> {
        let behavior = self
            .behaviors
            .get(&request.codec)
            .copied()
            .unwrap_or(SinkBehavior::Open);

        let mut stats = self.stats.lock();
        stats.attempts.push(request.codec);
        stats.requests.push(request.clone());

        if behavior == SinkBehavior::Fail {
            return Err(UdpcastError::Pipeline(format!("no element {}", request.codec)));
        }
        stats.live += 1;
        Ok(MockSink {
            open: behavior == SinkBehavior::Open,
            released: false,
            stats: self.stats.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct PreviewStats {
    pub shown: u64,
    pub failed: u64,
    pub opened: u64,
    pub closed: u64,
}

/// Preview that counts frames and open/close cycles.
#[derive(Default)]
pub struct MockPreview {
    open: bool,
    fail: bool,
    stats: Arc<Mutex<PreviewStats>>,
}

impl MockPreview {
    /// A preview whose window never opens.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> Arc<Mutex<PreviewStats>> {
        self.stats.clone()
    }
}

impl Preview for MockPreview {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        let mut stats = self.stats.lock();
        if self.fail {
            stats.failed += 1;
            return Err(UdpcastError::Pipeline("no display".to_string()));
        }
        if !self.open {
            self.open = true;
            stats.opened += 1;
        }
        stats.shown += 1;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.stats.lock().closed += 1;
        }
    }
}

#[derive(Debug, Default)]
pub struct LaunchStats {
    pub launched: u64,
    pub stopped: u64,
}

/// Launcher whose children only count stop requests.
#[derive(Default)]
pub struct MockLauncher {
    fail_launch: bool,
    fail_stop: bool,
    stats: Arc<Mutex<LaunchStats>>,
}

impl MockLauncher {
    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> Arc<Mutex<LaunchStats>> {
        self.stats.clone()
    }
}

struct MockChild {
    fail_stop: bool,
    stats: Arc<Mutex<LaunchStats>>,
}

impl Downstream for MockChild {
    fn id(&self) -> u32 {
        4242
    }

    fn stop(&mut self) -> Result<StopOutcome> {
        self.stats.lock().stopped += 1;
        if self.fail_stop {
            return Err(UdpcastError::Signal(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        Ok(StopOutcome::Signalled)
    }
}

impl Launcher for MockLauncher {
    fn launch(&mut self) -> Result<Box<dyn Downstream>> {
        if self.fail_launch {
            return Err(UdpcastError::Launch("receiver binary missing".to_string()));
        }
        self.stats.lock().launched += 1;
        Ok(Box::new(MockChild {
            fail_stop: self.fail_stop,
            stats: self.stats.clone(),
        }))
    }
}
