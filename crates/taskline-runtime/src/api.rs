//! HTTP client for the task backend: list snapshots, task detail, and the
//! per-task event stream.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::header::ACCEPT;
use serde_json::Value;
use taskline_core::FetchError;
use taskline_core::snapshot::TaskDetail;
use taskline_poll::Fetcher;
use taskline_stream::SseTransport;

/// Fetches one task's detail by correlation id (the hydration source).
pub trait DetailFetcher: Send + Sync + 'static {
    fn fetch_detail(&self, correlation_id: &str) -> BoxFuture<'static, Result<TaskDetail, FetchError>>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("taskline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// GET `path` and decode the body as JSON. Non-success statuses are
    /// classified by [`FetchError::from_status`].
    pub async fn get_json(&self, path: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(self.url(path))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), body.trim()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// A poll fetcher that GETs `path` on every call.
    pub fn fetcher(&self, path: &str) -> Arc<dyn Fetcher> {
        let api = self.clone();
        let path = path.to_owned();
        Arc::new(move || {
            let api = api.clone();
            let path = path.clone();
            async move { api.get_json(&path).await }
        })
    }

    pub fn detail_fetcher(&self, path_template: &str) -> Arc<dyn DetailFetcher> {
        Arc::new(HttpDetailFetcher {
            api: self.clone(),
            path_template: path_template.to_owned(),
        })
    }

    pub fn transport(&self, events_path: &str) -> SseTransport {
        SseTransport::new(self.client.clone(), self.base_url.clone(), events_path)
    }
}

struct HttpDetailFetcher {
    api: ApiClient,
    path_template: String,
}

impl DetailFetcher for HttpDetailFetcher {
    fn fetch_detail(&self, correlation_id: &str) -> BoxFuture<'static, Result<TaskDetail, FetchError>> {
        let api = self.api.clone();
        let path = self.path_template.replace("{id}", correlation_id);
        async move {
            let value = api.get_json(&path).await?;
            serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
        }
        .boxed()
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
