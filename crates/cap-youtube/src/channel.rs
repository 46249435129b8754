//! Channel video listing over the Data API `search` endpoint.
//!
//! A channel is addressed by its display title. The title is resolved to a
//! channel id through the channel of the most relevant matching video, then
//! the channel's videos are searched by id.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{map_transport, YoutubeConfig};
use crate::error::{YoutubeError, YoutubeResult};

/// One video found on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelVideo {
    pub video_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchList {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    id: Option<ResultId>,
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    channel_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

/// Data API search client.
#[derive(Clone)]
pub struct ChannelClient {
    http: Client,
    config: YoutubeConfig,
}

impl ChannelClient {
    pub fn new(config: YoutubeConfig) -> YoutubeResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> YoutubeResult<Self> {
        Self::new(YoutubeConfig::from_env())
    }

    /// Resolve a channel title to its channel id.
    pub async fn channel_id(&self, channel_title: &str) -> YoutubeResult<Option<String>> {
        let found = self
            .search(&[
                ("part", "id,snippet"),
                ("q", channel_title),
                ("maxResults", "1"),
                ("type", "video"),
                ("order", "relevance"),
            ])
            .await?;

        let channel_id = found
            .items
            .into_iter()
            .filter_map(|item| item.snippet.and_then(|s| s.channel_id))
            .next();

        match &channel_id {
            Some(id) => debug!(channel_title, channel_id = %id, "Resolved channel id"),
            None => warn!(channel_title, "No channel id for title"),
        }
        Ok(channel_id)
    }

    /// Videos of a channel, at most `max_videos` of them.
    pub async fn channel_videos(
        &self,
        channel_id: &str,
        max_videos: u32,
    ) -> YoutubeResult<Vec<ChannelVideo>> {
        let max = max_videos.to_string();
        let found = self
            .search(&[
                ("part", "id,snippet"),
                ("channelId", channel_id),
                ("maxResults", max.as_str()),
                ("type", "video"),
            ])
            .await?;

        let videos: Vec<ChannelVideo> = found
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id?.video_id?;
                let snippet = item.snippet.unwrap_or_default();
                Some(ChannelVideo {
                    video_id,
                    title: snippet.title,
                    description: snippet.description,
                })
            })
            .take(max_videos as usize)
            .collect();

        Ok(videos)
    }

    /// Resolve `channel_title` and list its latest videos.
    pub async fn list_channel_videos(
        &self,
        channel_title: &str,
        max_videos: u32,
    ) -> YoutubeResult<Vec<ChannelVideo>> {
        let channel_id = self
            .channel_id(channel_title)
            .await?
            .ok_or_else(|| YoutubeError::ChannelNotFound(channel_title.to_string()))?;

        let videos = self.channel_videos(&channel_id, max_videos).await?;
        info!(
            channel_title,
            channel_id = %channel_id,
            count = videos.len(),
            "Listed channel videos"
        );
        Ok(videos)
    }

    async fn search(&self, params: &[(&str, &str)]) -> YoutubeResult<SearchList> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| YoutubeError::missing_credentials("YOUTUBE_API_KEY is not set"))?;

        let mut url = Url::parse(&format!("{}/search", self.config.api_base))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().copied())
            .append_pair("key", key);

        let response = self.http.get(url).send().await.map_err(map_transport)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(YoutubeError::api(status.as_u16(), message));
        }

        response.json().await.map_err(map_transport)
    }
}
