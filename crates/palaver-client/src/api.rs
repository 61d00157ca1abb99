//! The REST client the reconciliation engine feeds from.
//!
//! Thin reqwest wrapper over the server surface: page fetches, sends
//! (multipart when media is attached), edits, deletes, seen marks. Every
//! payload passes through the wire-normalization layer on the way in.

use chrono::{DateTime, Utc};
use reqwest::multipart;

use palaver_shared::{GroupId, Message, MessageId, UserId};

use crate::error::{ClientError, Result};
use crate::wire::RawMessage;

/// One fetched page, normalized and oldest-first as served.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

pub struct ChatApi {
    base_url: String,
    viewer: UserId,
    http: reqwest::Client,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, viewer: UserId) -> Self {
        Self {
            base_url: base_url.into(),
            viewer,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch one page of a direct conversation. Server-side, this also
    /// bulk-marks the peer's messages to us as seen.
    pub async fn fetch_conversation(
        &self,
        peer: UserId,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<ConversationPage> {
        self.fetch_page(format!("{}/api/chat/{peer}", self.base_url), before, limit)
            .await
    }

    pub async fn fetch_group_conversation(
        &self,
        group: GroupId,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<ConversationPage> {
        self.fetch_page(
            format!("{}/api/chat/group/{group}", self.base_url),
            before,
            limit,
        )
        .await
    }

    async fn fetch_page(
        &self,
        url: String,
        before: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> Result<ConversationPage> {
        let mut request = self.http.get(url).header("x-user-id", self.viewer.to_string());
        if let Some(before) = before {
            request = request.query(&[("before", before.to_rfc3339())]);
        }
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }

        let body = check(request.send().await?).await?;
        parse_page(body)
    }

    /// Send a direct message; multipart whenever media is attached.
    pub async fn send_message(
        &self,
        receiver: UserId,
        content: &str,
        media: Option<MediaAttachment>,
    ) -> Result<Message> {
        self.send_to("receiver", receiver.to_string(), content, media)
            .await
    }

    pub async fn send_group_message(
        &self,
        group: GroupId,
        content: &str,
        media: Option<MediaAttachment>,
    ) -> Result<Message> {
        self.send_to("group", group.to_string(), content, media).await
    }

    async fn send_to(
        &self,
        target_field: &'static str,
        target: String,
        content: &str,
        media: Option<MediaAttachment>,
    ) -> Result<Message> {
        let url = if target_field == "group" {
            format!("{}/api/chat/group", self.base_url)
        } else {
            format!("{}/api/chat", self.base_url)
        };

        let mut form = multipart::Form::new()
            .text(target_field, target)
            .text("content", content.to_string());

        if let Some(media) = media {
            let part = multipart::Part::bytes(media.bytes)
                .file_name(media.file_name)
                .mime_str(&media.content_type)
                .map_err(ClientError::Http)?;
            form = form.part("file", part);
        }

        let response = self
            .http
            .post(url)
            .header("x-user-id", self.viewer.to_string())
            .multipart(form)
            .send()
            .await?;

        let body = check(response).await?;
        parse_message(body["data"].clone())
    }

    pub async fn edit_message(&self, message_id: MessageId, new_content: &str) -> Result<Message> {
        let response = self
            .http
            .put(format!("{}/api/chat/{message_id}", self.base_url))
            .header("x-user-id", self.viewer.to_string())
            .json(&serde_json::json!({ "newContent": new_content }))
            .send()
            .await?;

        let body = check(response).await?;
        parse_message(body)
    }

    /// Delete for everyone. Returns the tombstoned record.
    pub async fn delete_message(&self, message_id: MessageId) -> Result<Message> {
        let response = self
            .http
            .delete(format!("{}/api/chat/{message_id}", self.base_url))
            .header("x-user-id", self.viewer.to_string())
            .send()
            .await?;

        let body = check(response).await?;
        parse_message(body["message"].clone())
    }

    /// Fine-grained seen mark for one message. Idempotent server-side.
    pub async fn mark_seen(&self, message_id: MessageId) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .http
            .put(format!("{}/api/chat/seen/{message_id}", self.base_url))
            .header("x-user-id", self.viewer.to_string())
            .send()
            .await?;

        let body = check(response).await?;
        Ok(serde_json::from_value(body["seenAt"].clone())?)
    }
}

/// Reject non-2xx responses with the server's error message.
async fn check(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;

    if !status.is_success() {
        let message = body["error"]
            .as_str()
            .unwrap_or("request failed")
            .to_string();
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

fn parse_message(value: serde_json::Value) -> Result<Message> {
    let raw: RawMessage = serde_json::from_value(value)?;
    Ok(raw.normalize(Utc::now()))
}

fn parse_page(body: serde_json::Value) -> Result<ConversationPage> {
    let has_more = body["hasMore"].as_bool().unwrap_or(false);
    let raws: Vec<RawMessage> = serde_json::from_value(body["messages"].clone())?;
    let now = Utc::now();
    Ok(ConversationPage {
        messages: raws.into_iter().map(|r| r.normalize(now)).collect(),
        has_more,
    })
}
