//! HLS output watcher and uploader.
//!
//! Watches the encoder's output tree and publishes new segments and
//! playlists to the object store. Uploads run in parallel but are
//! serialized per key, and a playlist is never published before the
//! segments it references.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use media_store::{ArtifactKind, MediaStore};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;

/// Maximum attempts per artifact upload.
const MAX_UPLOAD_ATTEMPTS: u32 = 3;
/// Base delay between retries (doubles each attempt).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
/// How many times a playlist waits for its referenced segments before
/// being published anyway.
const PLAYLIST_WAIT_ATTEMPTS: u32 = 20;
/// Delay between playlist reference checks.
const PLAYLIST_WAIT_DELAY: Duration = Duration::from_millis(250);

/// A classified file from the HLS output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadArtifact {
    path: PathBuf,
    /// Full object key.
    key: String,
    kind: ArtifactKind,
    /// Variant directory name; `None` for the master playlist.
    variant: Option<String>,
    /// Path relative to the output root, used for the uploaded-segment
    /// ledger.
    rel: String,
}

/// State shared between the watch consumer and the per-artifact upload
/// tasks.
struct UploadContext {
    stream_id: String,
    output_root: PathBuf,
    /// Object-key prefix (`<media_prefix>/<stream_id>`).
    key_prefix: String,
    store: Arc<MediaStore>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Root-relative paths of segments whose upload has completed.
    uploaded_segments: DashMap<String, ()>,
}

/// Watches one stream's HLS output directory and uploads artifacts.
pub struct HlsUploader {
    ctx: Arc<UploadContext>,
    token: CancellationToken,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl HlsUploader {
    pub fn new(
        stream_id: impl Into<String>,
        output_root: impl Into<PathBuf>,
        key_prefix: impl Into<String>,
        store: Arc<MediaStore>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            ctx: Arc::new(UploadContext {
                stream_id: stream_id.into(),
                output_root: output_root.into(),
                key_prefix: key_prefix.into(),
                store,
                key_locks: DashMap::new(),
                uploaded_segments: DashMap::new(),
            }),
            token: parent.child_token(),
            watcher: Mutex::new(None),
        }
    }

    /// Begin watching the output root recursively. Returns once the
    /// watch is registered; upload work happens on background tasks.
    ///
    /// Variant subdirectories created after this call are covered by the
    /// recursive watch. Files already on disk are swept once so that
    /// artifacts written before the watch began are not lost.
    pub fn start(&self) -> Result<()> {
        if !self.ctx.output_root.is_dir() {
            return Err(crate::Error::invalid_argument(format!(
                "HLS output root {} does not exist",
                self.ctx.output_root.display()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!("Filesystem watch error: {}", e),
        })?;
        watcher.watch(&self.ctx.output_root, RecursiveMode::Recursive)?;
        *self.watcher.lock() = Some(watcher);

        info!(
            stream_id = %self.ctx.stream_id,
            root = %self.ctx.output_root.display(),
            "HLS uploader watching"
        );

        let ctx = Arc::clone(&self.ctx);
        let token = self.token.clone();
        tokio::spawn(async move {
            sweep_existing(&ctx);
            consume(ctx, rx, token).await;
        });

        Ok(())
    }

    /// Tear down the watcher. Idempotent; in-flight uploads finish on
    /// their own tasks.
    pub fn stop(&self) {
        self.token.cancel();
        if self.watcher.lock().take().is_some() {
            info!(stream_id = %self.ctx.stream_id, "HLS uploader stopped");
        }
    }
}

/// Upload anything already present under the root. The encoder may have
/// produced its first artifacts before the watch registered.
fn sweep_existing(ctx: &Arc<UploadContext>) {
    let mut pending = vec![ctx.output_root.clone()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                enqueue(ctx, &path);
            }
        }
    }
}

async fn consume(
    ctx: Arc<UploadContext>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(stream_id = %ctx.stream_id, "Uploader consumer shutting down");
                break;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if is_publish_event(&event.kind) {
                            for path in &event.paths {
                                enqueue(&ctx, path);
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

fn enqueue(ctx: &Arc<UploadContext>, path: &Path) {
    let Some(artifact) = classify(&ctx.output_root, &ctx.key_prefix, path) else {
        return;
    };
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        upload(&ctx, artifact).await;
    });
}

/// Upload one artifact, serialized against other uploads to the same
/// key so the later writer's bytes always win at the store.
async fn upload(ctx: &UploadContext, artifact: UploadArtifact) {
    let lock = ctx
        .key_locks
        .entry(artifact.key.clone())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone();
    let _guard = lock.lock().await;

    if artifact.kind == ArtifactKind::Playlist {
        wait_for_referenced_segments(ctx, &artifact).await;
    }

    for attempt in 0..MAX_UPLOAD_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1)).await;
        }

        match ctx
            .store
            .put_file(&artifact.path, &artifact.key, artifact.kind)
            .await
        {
            Ok(()) => {
                if artifact.kind == ArtifactKind::Segment {
                    ctx.uploaded_segments.insert(artifact.rel.clone(), ());
                }
                debug!(key = %artifact.key, "Published artifact");
                return;
            }
            Err(e) if e.is_transient() => {
                warn!(
                    key = %artifact.key,
                    attempt = attempt + 1,
                    error = %e,
                    "Transient upload failure, retrying"
                );
            }
            // The encoder deletes segments that age out of the playlist
            // window; a vanished source file is expected churn.
            Err(media_store::StoreError::Io(io))
                if io.kind() == std::io::ErrorKind::NotFound =>
            {
                debug!(key = %artifact.key, "Source file gone before upload, skipping");
                return;
            }
            Err(e) => {
                error!(
                    key = %artifact.key,
                    error = %e,
                    "Dropping artifact after permanent upload failure"
                );
                return;
            }
        }
    }

    error!(
        key = %artifact.key,
        attempts = MAX_UPLOAD_ATTEMPTS,
        "Dropping artifact after exhausting upload retries"
    );
}

/// Hold a playlist until every segment it references has been uploaded,
/// so players never fetch a manifest pointing at a 404. Bounded: after
/// the wait budget the playlist is published anyway rather than
/// deadlocking the stream.
async fn wait_for_referenced_segments(ctx: &UploadContext, artifact: &UploadArtifact) {
    for _ in 0..PLAYLIST_WAIT_ATTEMPTS {
        let Ok(body) = tokio::fs::read_to_string(&artifact.path).await else {
            return;
        };

        let missing = referenced_segments(&body)
            .into_iter()
            .map(|seg| match &artifact.variant {
                Some(variant) => format!("{}/{}", variant, seg),
                None => seg,
            })
            .filter(|rel| !ctx.uploaded_segments.contains_key(rel))
            .count();

        if missing == 0 {
            return;
        }

        debug!(
            key = %artifact.key,
            missing,
            "Playlist waiting for segment uploads"
        );
        tokio::time::sleep(PLAYLIST_WAIT_DELAY).await;
    }

    warn!(
        key = %artifact.key,
        "Publishing playlist before all referenced segments uploaded"
    );
}

/// Events that signal a file worth (re)publishing: creation, the final
/// write close, or a rename into place.
fn is_publish_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Classify a path under the output root into an uploadable artifact.
///
/// `<root>/<variant>/<file>` carries the variant in the key;
/// `<root>/<file>` is the master playlist. The recording tree and
/// unknown extensions are not published.
fn classify(output_root: &Path, key_prefix: &str, path: &Path) -> Option<UploadArtifact> {
    let rel = path.strip_prefix(output_root).ok()?;
    let components: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();

    if components.iter().any(|c| *c == "recording") {
        return None;
    }

    let kind = ArtifactKind::from_path(path)?;

    let (key, variant) = match components.as_slice() {
        [file] => (format!("{}/{}", key_prefix, file), None),
        [variant, file] => (
            format!("{}/{}/{}", key_prefix, variant, file),
            Some((*variant).to_string()),
        ),
        _ => return None,
    };

    Some(UploadArtifact {
        path: path.to_path_buf(),
        key,
        kind,
        variant,
        rel: components.join("/"),
    })
}

/// Segment URIs referenced by a playlist body, in order.
fn referenced_segments(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && line.ends_with(".ts"))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}
