use super::error::TrackerError;
use super::response::{AnnounceRequest, AnnounceResponse};
use crate::constants::{HTTP_TRACKER_TIMEOUT, USER_AGENT};
use crate::metainfo::percent_encode;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    pub fn new(url: &str) -> Result<Self, TrackerError> {
        Self::with_timeout(url, HTTP_TRACKER_TIMEOUT)
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self, TrackerError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(TrackerError::Http)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn announce(
        &self,
        request: &AnnounceRequest,
    ) -> Result<AnnounceResponse, TrackerError> {
        let url = self.announce_url(request);
        debug!(tracker = %self.url, event = request.event.as_str(), "http announce");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                TrackerError::Timeout
            } else {
                TrackerError::Http(e)
            }
        })?;
        let bytes = response.bytes().await?;

        AnnounceResponse::from_bencode(&bytes)
    }

    /// Builds the GET URL by hand: reqwest's query encoder only accepts
    /// UTF-8, and the info hash and peer ID are raw bytes.
    fn announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.url,
            separator,
            request.info_hash.url_encoded(),
            percent_encode(&request.peer_id),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left
        );

        let event_str = request.event.as_str();
        if !event_str.is_empty() {
            url.push_str(&format!("&event={}", event_str));
        }
        url
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
