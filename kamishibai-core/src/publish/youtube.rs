use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PublishSection;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};

use super::{PublishError, PublishResult, VideoMetadata, VideoPlatform};

/// YouTube Data API v3 over plain HTTPS, authenticated with a long-lived
/// OAuth refresh token.
pub struct YouTubeClient {
    client: reqwest::Client,
    token_url: String,
    api_base: String,
    upload_base: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    access_token: Mutex<Option<String>>,
    refresh_retry: RetryPolicy,
    upload_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl YouTubeClient {
    pub fn from_config(config: &PublishSection) -> PublishResult<Self> {
        let required = |value: &Option<String>, name: &'static str| {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .ok_or(PublishError::MissingCredentials(name))
        };
        Ok(Self {
            client: reqwest::Client::new(),
            token_url: config.token_url.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            client_id: required(&config.client_id, "client_id")?,
            client_secret: required(&config.client_secret, "client_secret")?,
            refresh_token: required(&config.refresh_token, "refresh_token")?,
            access_token: Mutex::new(None),
            refresh_retry: RetryPolicy::fixed(3, Duration::from_secs(5)),
            upload_retry: RetryPolicy::with_schedule(
                4,
                vec![
                    Duration::from_secs(5),
                    Duration::from_secs(10),
                    Duration::from_secs(15),
                ],
            )
            .with_jitter(config.upload_jitter_seconds),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    async fn token(&self) -> PublishResult<String> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let outcome = self
            .refresh_retry
            .run(
                "oauth-refresh",
                self.sleeper.as_ref(),
                PublishError::is_transient,
                |_| self.refresh(),
            )
            .await
            .map_err(|exhausted| exhausted.error)?;
        info!(attempts = outcome.attempts, "access token refreshed");
        *cached = Some(outcome.result.clone());
        Ok(outcome.result)
    }

    async fn refresh(&self) -> PublishResult<String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = ensure_success(response).await?.json().await?;
        Ok(token.access_token)
    }

    async fn start_upload_session(&self, token: &str, metadata: &VideoMetadata, length: usize) -> PublishResult<String> {
        let response = self
            .client
            .post(format!("{}/videos", self.upload_base))
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", length.to_string())
            .json(&VideoResource::from(metadata))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .ok_or_else(|| PublishError::MalformedResponse("upload session without location".into()))
    }

    async fn send_video(&self, token: &str, session: &str, bytes: Vec<u8>) -> PublishResult<String> {
        let response = self
            .client
            .put(session)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "video/*")
            .body(bytes)
            .send()
            .await?;
        let created: IdResponse = ensure_success(response).await?.json().await?;
        Ok(created.id)
    }
}

impl fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("api_base", &self.api_base)
            .field("upload_base", &self.upload_base)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VideoPlatform for YouTubeClient {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> PublishResult<String> {
        if !video.exists() {
            return Err(PublishError::MissingVideoFile(video.to_path_buf()));
        }
        let bytes = tokio::fs::read(video).await?;
        let token = self.token().await?;
        let session = self.start_upload_session(&token, metadata, bytes.len()).await?;
        debug!(bytes = bytes.len(), "upload session opened");

        let outcome = self
            .upload_retry
            .run(
                "youtube-upload",
                self.sleeper.as_ref(),
                PublishError::is_transient,
                |_| self.send_video(&token, &session, bytes.clone()),
            )
            .await
            .map_err(|exhausted| exhausted.error)?;
        Ok(outcome.result)
    }

    async fn set_thumbnail(&self, video_id: &str, image: &Path) -> PublishResult<()> {
        let bytes = tokio::fs::read(image).await?;
        let mime = match image.extension().and_then(|ext| ext.to_str()) {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "image/png",
        };
        let token = self.token().await?;
        let response = self
            .client
            .post(format!("{}/thumbnails/set", self.upload_base))
            .query(&[("videoId", video_id), ("uploadType", "media")])
            .bearer_auth(&token)
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn post_comment(&self, video_id: &str, text: &str) -> PublishResult<String> {
        let token = self.token().await?;
        let response = self
            .client
            .post(format!("{}/commentThreads", self.api_base))
            .query(&[("part", "snippet")])
            .bearer_auth(&token)
            .json(&CommentThread::new(video_id, text))
            .send()
            .await?;
        let created: IdResponse = ensure_success(response).await?.json().await?;
        Ok(created.id)
    }

    async fn add_to_playlist(&self, playlist_id: &str, video_id: &str) -> PublishResult<()> {
        let token = self.token().await?;
        let response = self
            .client
            .post(format!("{}/playlistItems", self.api_base))
            .query(&[("part", "snippet")])
            .bearer_auth(&token)
            .json(&PlaylistItem::new(playlist_id, video_id))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn video_count(&self) -> PublishResult<u64> {
        let token = self.token().await?;
        let response = self
            .client
            .get(format!("{}/channels", self.api_base))
            .query(&[("part", "statistics"), ("mine", "true")])
            .bearer_auth(&token)
            .send()
            .await?;
        let channels: ChannelListResponse = ensure_success(response).await?.json().await?;
        channels.video_count()
    }

    fn video_url(&self, video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={video_id}")
    }
}

async fn ensure_success(response: reqwest::Response) -> PublishResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PublishError::Status {
        status: status.as_u16(),
        body: body.chars().take(300).collect(),
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct VideoResource<'a> {
    snippet: VideoSnippet<'a>,
    status: VideoStatus<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    category_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus<'a> {
    privacy_status: &'a str,
    self_declared_made_for_kids: bool,
}

impl<'a> From<&'a VideoMetadata> for VideoResource<'a> {
    fn from(metadata: &'a VideoMetadata) -> Self {
        Self {
            snippet: VideoSnippet {
                title: &metadata.title,
                description: &metadata.description,
                tags: &metadata.tags,
                category_id: &metadata.category_id,
            },
            status: VideoStatus {
                privacy_status: &metadata.privacy_status,
                self_declared_made_for_kids: false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CommentThread<'a> {
    snippet: CommentThreadSnippet<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet<'a> {
    video_id: &'a str,
    top_level_comment: TopLevelComment<'a>,
}

#[derive(Debug, Serialize)]
struct TopLevelComment<'a> {
    snippet: CommentSnippet<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet<'a> {
    text_original: &'a str,
}

impl<'a> CommentThread<'a> {
    fn new(video_id: &'a str, text: &'a str) -> Self {
        Self {
            snippet: CommentThreadSnippet {
                video_id,
                top_level_comment: TopLevelComment {
                    snippet: CommentSnippet { text_original: text },
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct PlaylistItem<'a> {
    snippet: PlaylistItemSnippet<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet<'a> {
    playlist_id: &'a str,
    resource_id: ResourceId<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId<'a> {
    kind: &'static str,
    video_id: &'a str,
}

impl<'a> PlaylistItem<'a> {
    fn new(playlist_id: &'a str, video_id: &'a str) -> Self {
        Self {
            snippet: PlaylistItemSnippet {
                playlist_id,
                resource_id: ResourceId {
                    kind: "youtube#video",
                    video_id,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    statistics: ChannelStatistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default)]
    video_count: Option<String>,
}

impl ChannelListResponse {
    fn video_count(&self) -> PublishResult<u64> {
        let raw = self
            .items
            .first()
            .and_then(|item| item.statistics.video_count.as_deref())
            .ok_or_else(|| PublishError::MalformedResponse("channel statistics missing".into()))?;
        raw.parse()
            .map_err(|_| PublishError::MalformedResponse(format!("video count {raw:?}")))
    }
}
