//! `gst-launch` style pipeline descriptions.
//!
//! Every pipeline exchanges raw BGRx frames with the application through an
//! element named `sink` (appsink) or `src` (appsrc). Recording pipelines name
//! their file sink `file`; its location is set as a property after parsing so
//! paths never need quoting.

use udpcast::{Codec, Result, UdpcastError};

/// RTP payload type for the H.264 stream.
pub const PAYLOAD_TYPE: u8 = 96;

/// Raw video caps exchanged with appsink/appsrc.
pub const RAW_CAPS: &str = "video/x-raw,format=BGRx";

/// Receive RTP/H.264 on `port`, decode, and expose frames on `sink`.
pub fn receive(port: u16) -> String {
    format!(
        "udpsrc port={port} caps=\"application/x-rtp,media=video,encoding-name=H264,payload={PAYLOAD_TYPE}\" ! \
         rtpjitterbuffer ! rtph264depay ! avdec_h264 ! videoconvert ! {RAW_CAPS} ! \
         appsink name=sink sync=false max-buffers=4 drop=false"
    )
}

/// Capture from camera `device` and expose frames on `sink`.
pub fn capture(device: u32) -> String {
    format!(
        "{} ! videoconvert ! {RAW_CAPS} ! appsink name=sink sync=false max-buffers=2 drop=true",
        camera_element(device)
    )
}

#[cfg(target_os = "linux")]
fn camera_element(device: u32) -> String {
    format!("v4l2src device=/dev/video{device}")
}

#[cfg(target_os = "macos")]
fn camera_element(device: u32) -> String {
    format!("avfvideosrc device-index={device}")
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn camera_element(_device: u32) -> String {
    "autovideosrc".to_string()
}

/// Encode frames pushed on `src` and send them as RTP/H.264 to `host:port`.
pub fn transmit(codec: Codec, host: &str, port: u16, bitrate_kbps: u32) -> Result<String> {
    let encoder = match codec {
        Codec::X264 => format!("x264enc tune=zerolatency bitrate={bitrate_kbps} speed-preset=superfast"),
        Codec::LibavH264 => format!("avenc_h264 bitrate={}", bitrate_kbps * 1000),
        Codec::Mjpeg => {
            return Err(UdpcastError::Pipeline(format!(
                "{codec} cannot be carried in an H.264 RTP stream"
            )));
        }
    };

    Ok(format!(
        "appsrc name=src format=time is-live=true do-timestamp=true ! videoconvert ! {encoder} ! \
         rtph264pay config-interval=1 pt={PAYLOAD_TYPE} ! udpsink host={host} port={port} sync=false"
    ))
}

/// Encode frames pushed on `src` into a Matroska file written by `file`.
pub fn record(codec: Codec) -> String {
    let encoder = match codec {
        Codec::X264 => "x264enc tune=zerolatency speed-preset=superfast ! h264parse",
        Codec::LibavH264 => "avenc_h264 ! h264parse",
        Codec::Mjpeg => "jpegenc",
    };

    format!("appsrc name=src format=time ! videoconvert ! {encoder} ! matroskamux ! filesink name=file")
}

/// Display frames pushed on `src` in a window titled `title`.
pub fn preview(title: &str) -> String {
    let title = title.replace('"', "");
    format!(
        "appsrc name=src format=time is-live=true do-timestamp=true ! \
         taginject tags=\"title=\\\"{title}\\\"\" ! videoconvert ! autovideosink sync=false"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_binds_port_with_rtp_caps() {
        let desc = receive(6000);
        assert!(desc.starts_with("udpsrc port=6000 "));
        assert!(desc.contains("encoding-name=H264,payload=96"));
        assert!(desc.contains("rtpjitterbuffer ! rtph264depay ! avdec_h264"));
        assert!(desc.ends_with("appsink name=sink sync=false max-buffers=4 drop=false"));
    }

    #[test]
    fn transmit_primary_encoder() {
        let desc = transmit(Codec::X264, "127.0.0.1", 6000, 500).expect("h264");
        assert!(desc.contains("x264enc tune=zerolatency bitrate=500 speed-preset=superfast"));
        assert!(desc.contains("rtph264pay config-interval=1 pt=96"));
        assert!(desc.ends_with("udpsink host=127.0.0.1 port=6000 sync=false"));
    }

    #[test]
    fn transmit_fallback_encoder_uses_bits_per_second() {
        let desc = transmit(Codec::LibavH264, "10.0.0.2", 7000, 500).expect("h264");
        assert!(desc.contains("avenc_h264 bitrate=500000"));
        assert!(desc.contains("host=10.0.0.2 port=7000"));
    }

    #[test]
    fn transmit_rejects_mjpeg() {
        assert!(transmit(Codec::Mjpeg, "127.0.0.1", 6000, 500).is_err());
    }

    #[test]
    fn record_codecs() {
        assert!(record(Codec::X264).contains("x264enc"));
        assert!(record(Codec::Mjpeg).contains("jpegenc ! matroskamux"));
        assert!(record(Codec::Mjpeg).ends_with("filesink name=file"));
    }

    #[test]
    fn preview_title_is_tagged() {
        let desc = preview("udpcast \"receiver\"");
        assert!(desc.contains("taginject tags=\"title=\\\"udpcast receiver\\\"\""));
        assert!(desc.ends_with("autovideosink sync=false"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn capture_uses_v4l2_device_index() {
        assert!(capture(2).starts_with("v4l2src device=/dev/video2 !"));
    }
}
