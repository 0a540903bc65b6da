//! Decrypted messages and the attachment references found inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fully decrypted log record.
///
/// `content` is the decrypted JSON document as produced by the service;
/// only `seq` and `msgid` are carried over from the encrypted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    pub seq: u64,
    pub msgid: String,
    #[serde(alias = "decrypted_content")]
    pub content: Value,
}

impl DecryptedMessage {
    /// Sender identity (`from`), if the content carries one.
    pub fn sender(&self) -> Option<&str> {
        self.content
            .get("from")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Message type (`msgtype`), e.g. `"text"`, `"file"`, `"mixed"`.
    pub fn msgtype(&self) -> Option<&str> {
        self.content.get("msgtype").and_then(Value::as_str)
    }

    /// Send time from `msgtime` (milliseconds since the Unix epoch).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let millis = self.content.get("msgtime").and_then(Value::as_i64)?;
        DateTime::from_timestamp_millis(millis)
    }

    /// All binary attachments referenced by this message.
    ///
    /// Payloads with a missing `sdkfileid` are skipped.
    pub fn attachments(&self) -> Vec<AttachmentRef> {
        let mut refs = Vec::new();

        for kind in AttachmentKind::DIRECT {
            if let Some(payload) = self.content.get(kind.content_key()) {
                if let Some(att) = AttachmentRef::from_payload(kind, payload) {
                    refs.push(att);
                }
            }
        }

        let items = self
            .content
            .get("mixed")
            .and_then(|m| m.get("item"))
            .and_then(Value::as_array);
        for item in items.into_iter().flatten() {
            if item.get("type").and_then(Value::as_str) != Some("image") {
                continue;
            }
            // Mixed-message items carry their payload as a JSON string.
            let payload = match item.get("content") {
                Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(seq = self.seq, error = %e, "Unparseable mixed item");
                        continue;
                    }
                },
                Some(v @ Value::Object(_)) => v.clone(),
                _ => continue,
            };
            if let Some(att) = AttachmentRef::from_payload(AttachmentKind::MixedImage, &payload) {
                refs.push(att);
            }
        }

        refs
    }
}

/// What sort of payload an attachment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    File,
    Image,
    MixedImage,
    Voice,
    Video,
    Emotion,
}

impl AttachmentKind {
    /// Kinds that appear as a top-level content field.
    const DIRECT: [AttachmentKind; 5] = [
        AttachmentKind::File,
        AttachmentKind::Image,
        AttachmentKind::Voice,
        AttachmentKind::Video,
        AttachmentKind::Emotion,
    ];

    fn content_key(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Image | Self::MixedImage => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Emotion => "emotion",
        }
    }

    /// Output sub-directory for attachments of this kind.
    pub fn folder(self) -> &'static str {
        match self {
            Self::File => "files",
            Self::Image => "images",
            Self::MixedImage => "mixed_images",
            Self::Voice => "voices",
            Self::Video => "videos",
            Self::Emotion => "emotions",
        }
    }

    fn default_extension(self) -> &'static str {
        match self {
            Self::File => "bin",
            Self::Image | Self::MixedImage => "jpg",
            Self::Voice => "amr",
            Self::Video => "mp4",
            Self::Emotion => "gif",
        }
    }
}

/// Reference to a binary attachment inside decrypted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub kind: AttachmentKind,
    /// Opaque service identifier (`sdkfileid`).
    pub file_identifier: String,
    /// Name to store the downloaded bytes under.
    pub filename: String,
    /// Expected MD5 of the content (lowercase hex), when the service sends one.
    pub md5sum: Option<String>,
}

impl AttachmentRef {
    fn from_payload(kind: AttachmentKind, payload: &Value) -> Option<Self> {
        let file_identifier = payload
            .get("sdkfileid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?
            .to_string();
        let md5sum = payload
            .get("md5sum")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase);

        let filename = match (kind, payload.get("filename").and_then(Value::as_str)) {
            (AttachmentKind::File, Some(name)) if !name.is_empty() => name.to_string(),
            _ => {
                let stem = md5sum.clone().unwrap_or_else(|| file_identifier.clone());
                let ext = match kind {
                    AttachmentKind::File => payload
                        .get("fileext")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .unwrap_or(kind.default_extension()),
                    // Emotion type 2 is a PNG sticker; type 1 is a GIF.
                    AttachmentKind::Emotion
                        if payload.get("type").and_then(Value::as_i64) == Some(2) =>
                    {
                        "png"
                    }
                    _ => kind.default_extension(),
                };
                format!("{stem}.{ext}")
            }
        };

        Some(Self {
            kind,
            file_identifier,
            filename,
            md5sum,
        })
    }
}
