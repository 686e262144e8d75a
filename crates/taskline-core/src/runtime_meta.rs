//! Runtime metadata attached to stream events: which provider/model/endpoint
//! served the task and, if it failed, a classified error.

use serde::{Deserialize, Serialize};

/// Known runtime failure classes, with `RuntimeError` as the catch-all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum RuntimeErrorClass {
    RateLimited { message: Option<String> },
    Timeout { message: Option<String> },
    Unauthorized { message: Option<String> },
    ProviderUnavailable { message: Option<String> },
    ContextOverflow { message: Option<String> },
    Cancelled { message: Option<String> },
    RuntimeError { message: Option<String> },
}

impl RuntimeErrorClass {
    /// Map a wire class token onto a known variant. Unknown tokens keep the
    /// token itself as the message when no message was sent.
    pub fn classify(class: Option<&str>, message: Option<String>) -> Self {
        let token = class.map(|c| c.trim().to_ascii_lowercase());
        match token.as_deref() {
            Some("rate_limited" | "rate_limit" | "429") => Self::RateLimited { message },
            Some("timeout" | "timed_out" | "deadline_exceeded") => Self::Timeout { message },
            Some("unauthorized" | "forbidden" | "auth" | "401" | "403") => {
                Self::Unauthorized { message }
            }
            Some("provider_unavailable" | "unavailable" | "overloaded" | "503") => {
                Self::ProviderUnavailable { message }
            }
            Some("context_overflow" | "context_length_exceeded") => {
                Self::ContextOverflow { message }
            }
            Some("cancelled" | "canceled") => Self::Cancelled { message },
            Some("runtime_error") | None => Self::RuntimeError { message },
            Some(other) => Self::RuntimeError {
                message: message.or_else(|| Some(other.to_owned())),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::Cancelled { .. } => "cancelled",
            Self::RuntimeError { .. } => "runtime_error",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::RateLimited { message }
            | Self::Timeout { message }
            | Self::Unauthorized { message }
            | Self::ProviderUnavailable { message }
            | Self::ContextOverflow { message }
            | Self::Cancelled { message }
            | Self::RuntimeError { message } => message.as_deref(),
        }
    }
}

/// Error as the backend sends it: a bare string or a small object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireRuntimeError {
    Text(String),
    Object {
        #[serde(default, alias = "type", alias = "code")]
        class: Option<String>,
        #[serde(default, alias = "detail")]
        message: Option<String>,
    },
}

impl From<WireRuntimeError> for RuntimeErrorClass {
    fn from(wire: WireRuntimeError) -> Self {
        match wire {
            WireRuntimeError::Text(text) => Self::RuntimeError {
                message: Some(text),
            },
            WireRuntimeError::Object { class, message } => Self::classify(class.as_deref(), message),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireRuntimeMeta {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<WireRuntimeError>,
}

/// Provider/model/endpoint the task ran on, plus its runtime error class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireRuntimeMeta")]
pub struct RuntimeMeta {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub status: Option<String>,
    pub error: Option<RuntimeErrorClass>,
}

impl From<WireRuntimeMeta> for RuntimeMeta {
    fn from(wire: WireRuntimeMeta) -> Self {
        Self {
            provider: wire.provider,
            model: wire.model,
            endpoint: wire.endpoint,
            status: wire.status,
            error: wire.error.map(RuntimeErrorClass::from),
        }
    }
}

impl RuntimeMeta {
    /// Overlay fields present in `newer`; absent fields keep their old value.
    pub fn merge(&mut self, newer: &RuntimeMeta) {
        if newer.provider.is_some() {
            self.provider.clone_from(&newer.provider);
        }
        if newer.model.is_some() {
            self.model.clone_from(&newer.model);
        }
        if newer.endpoint.is_some() {
            self.endpoint.clone_from(&newer.endpoint);
        }
        if newer.status.is_some() {
            self.status.clone_from(&newer.status);
        }
        if newer.error.is_some() {
            self.error.clone_from(&newer.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> RuntimeMeta {
        serde_json::from_value(value).expect("decode runtime meta")
    }

    #[test]
    fn structured_error_is_classified() {
        let meta = decode(json!({
            "provider": "openai",
            "model": "gpt-x",
            "error": {"type": "rate_limit", "message": "slow down"}
        }));
        assert_eq!(meta.provider.as_deref(), Some("openai"));
        assert_eq!(
            meta.error,
            Some(RuntimeErrorClass::RateLimited {
                message: Some("slow down".to_owned())
            })
        );
    }

    #[test]
    fn text_error_falls_back_to_runtime_error() {
        let meta = decode(json!({"error": "segfault in worker"}));
        let err = meta.error.expect("error present");
        assert_eq!(err.as_str(), "runtime_error");
        assert_eq!(err.message(), Some("segfault in worker"));
    }

    #[test]
    fn unknown_class_keeps_token() {
        let err = RuntimeErrorClass::classify(Some("quota_melted"), None);
        assert_eq!(
            err,
            RuntimeErrorClass::RuntimeError {
                message: Some("quota_melted".to_owned())
            }
        );
    }

    #[test]
    fn serialized_meta_decodes_back() {
        let meta = RuntimeMeta {
            provider: Some("anthropic".into()),
            model: None,
            endpoint: Some("/v1/messages".into()),
            status: Some("ok".into()),
            error: Some(RuntimeErrorClass::Timeout {
                message: Some("30s".into()),
            }),
        };
        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(decode(json), meta);
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut meta = decode(json!({"provider": "a", "model": "m1"}));
        meta.merge(&decode(json!({"model": "m2"})));
        assert_eq!(meta.provider.as_deref(), Some("a"));
        assert_eq!(meta.model.as_deref(), Some("m2"));
    }
}
