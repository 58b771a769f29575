mod youtube;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub use youtube::YouTubeClient;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("missing publishing credential: {0}")]
    MissingCredentials(&'static str),
    #[error("video file not found: {0}")]
    MissingVideoFile(PathBuf),
    #[error("unexpected platform response: {0}")]
    MalformedResponse(String),
}

impl PublishError {
    /// Network hiccups and server-side errors; client errors are final.
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Http(_) => true,
            PublishError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type PublishResult<T> = Result<T, PublishError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
}

/// Video hosting operations used after assembly.
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    fn name(&self) -> &str;
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> PublishResult<String>;
    async fn set_thumbnail(&self, video_id: &str, image: &Path) -> PublishResult<()>;
    async fn post_comment(&self, video_id: &str, text: &str) -> PublishResult<String>;
    async fn add_to_playlist(&self, playlist_id: &str, video_id: &str) -> PublishResult<()>;
    /// Published videos on the authenticated channel.
    async fn video_count(&self) -> PublishResult<u64>;
    fn video_url(&self, video_id: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct PublicationRequest<'a> {
    pub video: &'a Path,
    pub thumbnail: Option<&'a Path>,
    pub metadata: VideoMetadata,
    pub first_comment: Option<&'a str>,
    pub playlist_ids: &'a [String],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublicationReport {
    pub video_id: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_set: bool,
    pub comment_posted: bool,
    pub playlists_added: Vec<String>,
    pub warnings: Vec<String>,
}

impl PublicationReport {
    pub fn is_published(&self) -> bool {
        self.video_id.is_some()
    }
}

/// Uploads once, then applies each secondary step independently. Nothing
/// after the upload can fail the publication.
#[derive(Clone)]
pub struct Publisher {
    platform: Arc<dyn VideoPlatform>,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("platform", &self.platform.name())
            .finish()
    }
}

impl Publisher {
    pub fn new(platform: Arc<dyn VideoPlatform>) -> Self {
        Self { platform }
    }

    /// Channel video count plus one, or 1 when the count is unavailable.
    pub async fn next_episode_number(&self) -> u32 {
        match self.platform.video_count().await {
            Ok(count) => u32::try_from(count).unwrap_or(u32::MAX - 1) + 1,
            Err(err) => {
                warn!(error = %err, "video count unavailable, numbering from 1");
                1
            }
        }
    }

    pub async fn publish(&self, request: PublicationRequest<'_>) -> PublicationReport {
        let mut report = PublicationReport::default();

        let video_id = match self.platform.upload(request.video, &request.metadata).await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    platform = self.platform.name(),
                    video = %request.video.display(),
                    error = %err,
                    "upload failed, video left on disk"
                );
                report.warnings.push(format!("upload: {err}"));
                return report;
            }
        };
        info!(video_id = %video_id, "upload complete");

        if let Some(thumbnail) = request.thumbnail {
            match self.platform.set_thumbnail(&video_id, thumbnail).await {
                Ok(()) => report.thumbnail_set = true,
                Err(err) => {
                    warn!(video_id = %video_id, error = %err, "thumbnail not set");
                    report.warnings.push(format!("thumbnail: {err}"));
                }
            }
        }

        if let Some(comment) = request.first_comment.filter(|text| !text.trim().is_empty()) {
            match self.platform.post_comment(&video_id, comment).await {
                Ok(_) => report.comment_posted = true,
                Err(err) => {
                    warn!(video_id = %video_id, error = %err, "first comment not posted");
                    report.warnings.push(format!("comment: {err}"));
                }
            }
        }

        for playlist_id in request.playlist_ids {
            let playlist_id = playlist_id.trim();
            if playlist_id.is_empty() {
                continue;
            }
            match self.platform.add_to_playlist(playlist_id, &video_id).await {
                Ok(()) => report.playlists_added.push(playlist_id.to_string()),
                Err(err) => {
                    warn!(playlist_id, error = %err, "playlist insert failed");
                    report.warnings.push(format!("playlist {playlist_id}: {err}"));
                }
            }
        }

        report.video_url = Some(self.platform.video_url(&video_id));
        report.video_id = Some(video_id);
        report
    }
}
