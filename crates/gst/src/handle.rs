//! Launch, inspect and tear down parsed pipelines.

use std::fmt::Display;
use std::time::Duration;

use gst::prelude::*;
use udpcast::{Result, UdpcastError};

pub(crate) fn pipeline_error(context: &str, e: impl Display) -> UdpcastError {
    UdpcastError::Pipeline(format!("{context}: {e}"))
}

/// Parse `description` into a pipeline. Missing elements surface here.
pub(crate) fn launch(description: &str) -> Result<gst::Pipeline> {
    let element = gst::parse::launch(description).map_err(|e| pipeline_error("parse", e))?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| UdpcastError::Pipeline("description did not produce a pipeline".to_string()))
}

/// Look up the element called `name` as a `T`.
pub(crate) fn element<T: IsA<gst::Element>>(pipeline: &gst::Pipeline, name: &str) -> Result<T> {
    pipeline
        .by_name(name)
        .and_then(|e| e.dynamic_cast::<T>().ok())
        .ok_or_else(|| UdpcastError::Pipeline(format!("no element named {name}")))
}

/// Move the pipeline to Playing, tearing it down again on failure.
pub(crate) fn play(pipeline: &gst::Pipeline) -> Result<()> {
    if let Err(e) = pipeline.set_state(gst::State::Playing) {
        let detail = pop_error(pipeline).unwrap_or_else(|| e.to_string());
        shutdown(pipeline);
        return Err(UdpcastError::Pipeline(format!("failed to start: {detail}")));
    }
    Ok(())
}

/// Fail if an error message is waiting on the bus.
pub(crate) fn check_bus(pipeline: &gst::Pipeline) -> Result<()> {
    match pop_error(pipeline) {
        Some(detail) => Err(UdpcastError::Pipeline(detail)),
        None => Ok(()),
    }
}

fn pop_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(match err.debug() {
            Some(debug) => format!("{} ({debug})", err.error()),
            None => err.error().to_string(),
        }),
        _ => None,
    }
}

/// Wait up to `timeout` for end-of-stream to reach the sinks.
pub(crate) fn wait_for_eos(pipeline: &gst::Pipeline, timeout: Duration) -> Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    let timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);

    for msg in bus.iter_timed(timeout) {
        match msg.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(UdpcastError::Pipeline(err.error().to_string()));
            }
            _ => {}
        }
    }
    Err(UdpcastError::Pipeline(format!("no end-of-stream after {timeout}")))
}

pub(crate) fn shutdown(pipeline: &gst::Pipeline) {
    if let Err(e) = pipeline.set_state(gst::State::Null) {
        tracing::warn!(pipeline = %pipeline.name(), error = %e, "failed to stop pipeline");
    }
}
