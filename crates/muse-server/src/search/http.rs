use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{IndexAck, IndexError, SearchDocument, SearchIndexer};
use crate::config::SearchConfig;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    operation: &'static str,
    payload: IndexPayload<'a>,
}

#[derive(Serialize)]
struct IndexPayload<'a> {
    index: &'a str,
    document: &'a SearchDocument,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    success: bool,
    #[serde(default)]
    data: Option<IndexedData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexedData {
    #[allow(dead_code)]
    id: Option<String>,
    #[serde(default)]
    indexed: bool,
}

/// Client for the search service's `/invoke` endpoint
pub struct HttpSearchIndexer {
    client: Client,
    base_url: String,
    index: String,
}

impl HttpSearchIndexer {
    pub fn new(config: &SearchConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IndexError::Protocol(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        })
    }
}

#[async_trait]
impl SearchIndexer for HttpSearchIndexer {
    #[instrument(skip(self, document), fields(track_id = %document.id))]
    async fn index(&self, document: &SearchDocument) -> Result<IndexAck, IndexError> {
        let url = format!("{}/invoke", self.base_url);
        let request = InvokeRequest {
            operation: "index",
            payload: IndexPayload {
                index: &self.index,
                document,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IndexError::Unavailable(format!("indexer returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Indexer refused document");
            return Ok(IndexAck::Rejected(format!("{}: {}", status, body)));
        }

        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Protocol(e.to_string()))?;

        match body {
            InvokeResponse { success: true, data, .. } => {
                if data.is_some_and(|d| !d.indexed) {
                    debug!("Indexer accepted document without indexing it");
                }
                Ok(IndexAck::Accepted)
            }
            InvokeResponse { error, .. } => Ok(IndexAck::Rejected(
                error.unwrap_or_else(|| "rejected without reason".to_string()),
            )),
        }
    }
}
