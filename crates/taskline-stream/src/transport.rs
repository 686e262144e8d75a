use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use taskline_core::StreamError;

/// One named frame as it came off the wire, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub event: Option<String>,
    pub data: String,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

pub type FrameStream = BoxStream<'static, Result<RawFrame, StreamError>>;

/// Opens the push connection for one task id.
///
/// The returned stream ends when the server closes the connection; an `Err`
/// item is a transport failure and ends the connection too.
pub trait PushTransport: Send + Sync + 'static {
    fn open(&self, task_id: &str) -> BoxFuture<'static, Result<FrameStream, StreamError>>;
}
