use udpcast::{Frame, FrameSink, Preview, Result};

use crate::pipeline;
use crate::sink::{AppSrcSink, Timing};

/// A titled `autovideosink` window, opened on the first frame.
///
/// The window pipeline is rebuilt when the frame geometry changes.
pub struct WindowPreview {
    title: String,
    window: Option<AppSrcSink>,
}

impl WindowPreview {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
        }
    }

    pub fn is_showing(&self) -> bool {
        self.window.is_some()
    }
}

impl Preview for WindowPreview {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        if self
            .window
            .as_ref()
            .is_some_and(|w| w.dimensions() != frame.dimensions())
        {
            self.close();
        }

        if self.window.is_none() {
            let window = AppSrcSink::open(
                &pipeline::preview(&self.title),
                frame.width,
                frame.height,
                0,
                Timing::Live,
                |_| Ok(()),
            )?;
            tracing::debug!(title = %self.title, width = frame.width, height = frame.height, "preview opened");
            self.window = Some(window);
        }
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };

        // A window closed by the user reports an error here; drop it so the
        // next call starts from scratch.
        if let Err(e) = window.write_frame(frame) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut window) = self.window.take() {
            window.release();
            tracing::debug!(title = %self.title, "preview closed");
        }
    }
}

impl Drop for WindowPreview {
    fn drop(&mut self) {
        self.close();
    }
}
