//! Server-sent-events transport over reqwest.

use futures_util::future::{self, BoxFuture};
use futures_util::{FutureExt, StreamExt};
use reqwest::header::ACCEPT;
use sse_stream::SseStream;
use taskline_core::StreamError;

use crate::transport::{FrameStream, PushTransport, RawFrame};

const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";

pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    /// Path template; `{id}` is replaced by the task id.
    events_path: String,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, events_path: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            events_path: events_path.into(),
        }
    }

    pub fn url_for(&self, task_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.events_path.replace("{id}", task_id)
        )
    }
}

impl PushTransport for SseTransport {
    fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream, StreamError>> {
        let url = self.url_for(task_id);
        let request = self.client.get(&url).header(ACCEPT, EVENT_STREAM_MIME_TYPE);
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| StreamError::Transport(e.to_string()))?
                .error_for_status()
                .map_err(|e| StreamError::Transport(e.to_string()))?;

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .map(|ct| String::from_utf8_lossy(ct.as_bytes()).into_owned());
            if !content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with(EVENT_STREAM_MIME_TYPE))
            {
                return Err(StreamError::Transport(format!(
                    "unexpected content type {content_type:?} from {url}"
                )));
            }

            let frames = SseStream::from_bytes_stream(response.bytes_stream())
                .filter_map(|item| {
                    future::ready(match item {
                        // retry-only / comment frames carry nothing to apply
                        Ok(sse) if sse.event.is_none() && sse.data.is_none() => None,
                        Ok(sse) => Some(Ok(RawFrame {
                            event: sse.event,
                            data: sse.data.unwrap_or_default(),
                        })),
                        Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
                    })
                })
                .boxed();
            Ok(frames)
        }
        .boxed()
    }
}
