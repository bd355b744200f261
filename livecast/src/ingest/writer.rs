//! Track-to-disk persistence.
//!
//! Video RTP is depacketized into an IVF container the encoder can read
//! offline; audio goes into an Ogg file. Each writer lives for the life
//! of its track and is closed when the track ends.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use webrtc::media::io::Writer;
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::track::track_remote::TrackRemote;
use tracing::{debug, warn};

/// Opus always runs at 48 kHz on the wire.
const OPUS_SAMPLE_RATE: u32 = 48000;

/// IVF fourcc for the track's codec. Defaults to VP8, the codec
/// browsers negotiate by default.
pub(super) fn fourcc_for_mime(mime_type: &str) -> [u8; 4] {
    if mime_type.to_lowercase().contains("vp9") {
        *b"VP90"
    } else {
        *b"VP80"
    }
}

/// Drain a video track into an IVF file until the track ends.
pub(super) async fn persist_video(
    stream_id: &str,
    track: Arc<TrackRemote>,
    path: &Path,
    frame_rate: u32,
) {
    let mime_type = track.codec().capability.mime_type.clone();
    let header = IVFFileHeader {
        signature: *b"DKIF",
        version: 0,
        header_size: 32,
        four_cc: fourcc_for_mime(&mime_type),
        width: 1280,
        height: 720,
        timebase_denominator: frame_rate,
        timebase_numerator: 1,
        num_frames: 900,
        unused: 0,
    };

    let file = match File::create(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(stream_id, path = %path.display(), error = %e, "Failed to create video file");
            return;
        }
    };
    let mut writer = match IVFWriter::new(file, &header) {
        Ok(writer) => writer,
        Err(e) => {
            warn!(stream_id, error = %e, "Failed to initialize IVF writer");
            return;
        }
    };

    debug!(stream_id, mime_type, path = %path.display(), "Persisting video track");
    drain_track(stream_id, track, &mut writer).await;
}

/// Drain an audio track into an Ogg file until the track ends.
pub(super) async fn persist_audio(stream_id: &str, track: Arc<TrackRemote>, path: &Path) {
    let file = match File::create(path) {
        Ok(file) => file,
        Err(e) => {
            warn!(stream_id, path = %path.display(), error = %e, "Failed to create audio file");
            return;
        }
    };
    // Stereo channel layout.
    let mut writer = match OggWriter::new(file, OPUS_SAMPLE_RATE, 2) {
        Ok(writer) => writer,
        Err(e) => {
            warn!(stream_id, error = %e, "Failed to initialize Ogg writer");
            return;
        }
    };

    debug!(stream_id, path = %path.display(), "Persisting audio track");
    drain_track(stream_id, track, &mut writer).await;
}

async fn drain_track<W: Writer>(stream_id: &str, track: Arc<TrackRemote>, writer: &mut W) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if let Err(e) = writer.write_rtp(&packet) {
                    warn!(stream_id, error = %e, "Track write failed, closing writer");
                    break;
                }
            }
            Err(e) => {
                debug!(stream_id, error = %e, "Track ended");
                break;
            }
        }
    }

    if let Err(e) = writer.close() {
        warn!(stream_id, error = %e, "Failed to close track writer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_follows_codec() {
        assert_eq!(fourcc_for_mime("video/VP8"), *b"VP80");
        assert_eq!(fourcc_for_mime("video/VP9"), *b"VP90");
        assert_eq!(fourcc_for_mime("video/vp9"), *b"VP90");
        // Unknown codecs fall back to VP8.
        assert_eq!(fourcc_for_mime("video/AV1"), *b"VP80");
    }
}
