use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use udpcast::media::NoPreview;
use udpcast::{
    CancelReason, CancelToken, CommandLauncher, Preview, Receiver, ReceiverConfig, Sender,
    SenderConfig, SystemClock,
};
use udpcast_gst::{CameraFactory, RecordingFactory, TransmitFactory, UdpReceiveFactory, WindowPreview};

#[derive(Parser)]
#[command(
    name = "udpcast",
    about = "Stream a camera as RTP/H.264 over UDP and record what arrives"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture from a camera, stream it over UDP and start a local receiver
    Send(SendArgs),
    /// Listen for a stream and record each session to its own file
    Receive(ReceiveArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Capture device index (/dev/video<N>) [default: 0]
    #[arg(long)]
    device: Option<u32>,

    /// Destination host [default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,

    /// Destination UDP port [default: 6000]
    #[arg(long, short)]
    port: Option<u16>,

    /// Encoder frame rate [default: 20]
    #[arg(long)]
    fps: Option<u32>,

    /// Encoder bitrate in kbit/s [default: 500]
    #[arg(long)]
    bitrate: Option<u32>,

    /// Frames sent before the receiver is started [default: 10]
    #[arg(long)]
    warmup_frames: Option<u32>,

    /// Keep previewing when no encoder is available
    #[arg(long)]
    allow_preview_only: bool,

    /// Do not open a preview window
    #[arg(long)]
    no_preview: bool,

    /// Do not start a receiver process
    #[arg(long)]
    no_receiver: bool,
}

impl SendArgs {
    fn config(self) -> SenderConfig {
        let mut config = SenderConfig::default();
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate_kbps = bitrate;
        }
        if let Some(frames) = self.warmup_frames {
            config.warmup_frames = frames;
        }
        config.allow_preview_only = self.allow_preview_only;
        config.preview = !self.no_preview;
        config.spawn_receiver = !self.no_receiver;
        config
    }
}

#[derive(Args)]
struct ReceiveArgs {
    /// UDP port to listen on [default: 6000]
    #[arg(long, short)]
    port: Option<u16>,

    /// Directory for recordings [default: recordings]
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Frame rate written into recordings [default: 20]
    #[arg(long)]
    fps: Option<u32>,

    /// Seconds a silent stream may wait before its pipeline is rebuilt [default: 10]
    #[arg(long)]
    wait_window: Option<u64>,

    /// Do not open a preview window
    #[arg(long)]
    no_preview: bool,
}

impl ReceiveArgs {
    fn config(self) -> ReceiverConfig {
        let mut config = ReceiverConfig::default();
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.output_dir {
            config.output.dir = dir;
        }
        if let Some(fps) = self.fps {
            config.record_fps = fps;
        }
        if let Some(secs) = self.wait_window {
            config.retry.wait_window = Duration::from_secs(secs);
        }
        config.preview = !self.no_preview;
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = udpcast_gst::init() {
        tracing::error!(error = %e, "media subsystem unavailable");
        return ExitCode::FAILURE;
    }

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || interrupt.cancel(CancelReason::Interrupt)) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }

    match cli.command {
        Command::Send(args) => {
            watch_stop_key(cancel.clone());
            send(args.config(), cancel)
        }
        Command::Receive(args) => {
            // The stop key ends the current session; only an interrupt ends the receiver.
            let stop_key = CancelToken::new();
            watch_stop_key(stop_key.clone());
            receive(args.config(), cancel, stop_key)
        }
    }
}

/// Raise `cancel` each time `q` is entered on the terminal.
fn watch_stop_key(cancel: CancelToken) {
    let spawned = thread::Builder::new().name("stop-key".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    cancel.cancel(CancelReason::StopKey);
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "stop key unavailable, use Ctrl+C");
    }
}

fn preview(enabled: bool, title: &str) -> Box<dyn Preview> {
    if enabled {
        Box::new(WindowPreview::new(title))
    } else {
        Box::new(NoPreview)
    }
}

fn send(config: SenderConfig, cancel: CancelToken) -> ExitCode {
    let launcher = if config.spawn_receiver {
        match std::env::current_exe() {
            Ok(exe) => Some(
                CommandLauncher::new(exe)
                    .arg("receive")
                    .arg("--port")
                    .arg(config.port.to_string()),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "cannot locate own executable, receiver not started");
                None
            }
        }
    } else {
        None
    };

    let capture = CameraFactory::new(config.device);
    let transmit = TransmitFactory {
        host: config.host.clone(),
        port: config.port,
        bitrate_kbps: config.bitrate_kbps,
    };
    let window = preview(config.preview, "udpcast sender");

    let mut sender = Sender::new(config, capture, transmit, window, SystemClock, cancel);
    if let Some(launcher) = launcher {
        sender = sender.with_launcher(Box::new(launcher));
    }

    match sender.run() {
        Ok(stats) => {
            tracing::info!(
                codec = stats.codec.map(|c| c.name()).unwrap_or("none"),
                frames = stats.frames_sent,
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "sender failed");
            ExitCode::FAILURE
        }
    }
}

fn receive(config: ReceiverConfig, cancel: CancelToken, stop_key: CancelToken) -> ExitCode {
    let sources = UdpReceiveFactory::new(config.port);
    let window = preview(config.preview, "udpcast receiver");

    let mut receiver = Receiver::new(&config, sources, RecordingFactory, window, SystemClock, cancel)
        .with_stop_key(stop_key);
    let stats = receiver.run();

    tracing::info!(
        sessions = stats.sessions,
        abandoned = stats.abandoned,
        frames = stats.frames,
        "done"
    );
    if let Some(last) = stats.last_session {
        tracing::info!(path = %last.path.display(), "last recording");
    }
    ExitCode::SUCCESS
}
