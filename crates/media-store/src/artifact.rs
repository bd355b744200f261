//! Artifact classification and object metadata.

use std::path::Path;

use chrono::{DateTime, Utc};

/// Kind of artifact stored under a stream prefix.
///
/// The kind decides the content type and edge cache policy. Playlists
/// must expire almost immediately or players keep fetching a manifest
/// that no longer matches the segment window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// MPEG-TS media segment (`.ts`).
    Segment,
    /// HLS playlist, master or variant (`.m3u8`).
    Playlist,
    /// Anything else uploaded explicitly (thumbnails, recordings).
    Blob,
}

impl ArtifactKind {
    /// Classify a file by extension. Returns `None` for files the
    /// pipeline does not publish.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ts") => Some(Self::Segment),
            Some("m3u8") => Some(Self::Playlist),
            _ => None,
        }
    }

    /// MIME type sent with the upload.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Segment => "video/MP2T",
            Self::Playlist => "application/vnd.apple.mpegurl",
            Self::Blob => "application/octet-stream",
        }
    }

    /// Cache-control header sent with the upload.
    pub fn cache_control(&self) -> &'static str {
        match self {
            Self::Segment => "public, max-age=60",
            Self::Playlist => "public, max-age=2",
            Self::Blob => "public, max-age=3600",
        }
    }
}

/// Attributes of a stored object, as returned by [`crate::MediaStore::list`].
#[derive(Debug, Clone)]
pub struct ObjectAttrs {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification instant, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(
            ArtifactKind::from_path(Path::new("720p/segment_001.ts")),
            Some(ArtifactKind::Segment)
        );
        assert_eq!(
            ArtifactKind::from_path(Path::new("playlist.m3u8")),
            Some(ArtifactKind::Playlist)
        );
        assert_eq!(ArtifactKind::from_path(Path::new("segment_001.tmp")), None);
        assert_eq!(ArtifactKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn playlist_cache_is_shorter_than_segment_cache() {
        let seg = ArtifactKind::Segment.cache_control();
        let pl = ArtifactKind::Playlist.cache_control();
        assert!(seg.contains("max-age=60"));
        assert!(pl.contains("max-age=2"));
    }
}
