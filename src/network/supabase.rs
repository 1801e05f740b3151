use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::types::{Collection, Row};
use crate::config::BackendConfig;

use super::backend::{Backend, BackendError, FeedMessage};
use super::feed;

/// Hosted backend: PostgREST for snapshot reads and inserts, the realtime
/// websocket (one subscription per collection) for the change feed.
pub struct SupabaseBackend {
    http: reqwest::Client,
    config: BackendConfig,
}

impl SupabaseBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.config.url, collection.table())
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn fetch_rows(
        &self,
        collection: Collection,
        room_id: &str,
    ) -> Result<Vec<Row>, BackendError> {
        let filter = format!("eq.{room_id}");
        let response = self
            .http
            .get(self.endpoint(collection))
            .query(&[
                ("select", "*"),
                ("room_id", filter.as_str()),
                ("order", "timestamp.asc"),
            ])
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
            .send()
            .await?;
        let response = require_success(response).await?;

        let values: Vec<serde_json::Value> = response.json().await?;
        let rows = values
            .into_iter()
            .map(|value| Row::decode(collection, value))
            .collect::<serde_json::Result<Vec<Row>>>()?;
        Ok(rows)
    }

    async fn insert_row(&self, collection: Collection, row: Row) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.endpoint(collection))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
            .header("Prefer", "return=minimal")
            .json(&[row])
            .send()
            .await?;
        require_success(response).await?;
        Ok(())
    }

    fn subscribe(
        &self,
        collection: Collection,
        room_id: &str,
        generation: u64,
        feed_tx: mpsc::Sender<FeedMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(feed::run_feed(
            self.config.clone(),
            collection,
            room_id.to_string(),
            generation,
            feed_tx,
        ))
    }
}

async fn require_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_targets_the_collection_table() {
        let backend = SupabaseBackend::new(BackendConfig {
            url: "https://demo.supabase.co".to_string(),
            anon_key: "key".to_string(),
        });
        assert_eq!(
            backend.endpoint(Collection::MessageReactions),
            "https://demo.supabase.co/rest/v1/message_reactions"
        );
    }
}
