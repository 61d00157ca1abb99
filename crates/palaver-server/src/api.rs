use std::sync::{Arc, Mutex};

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use palaver_shared::constants::{DEFAULT_PAGE_LIMIT, MAX_CONTENT_LEN};
use palaver_shared::{Conversation, GroupId, Message, MessageId, MessageKind, UserId};
use palaver_store::Database;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::fanout::Fanout;
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub registry: Arc<PresenceRegistry>,
    pub fanout: Arc<Fanout>,
    pub media: Arc<MediaStore>,
    pub config: Arc<ServerConfig>,
}

/// Authenticated identity, extracted from the `x-user-id` header the auth
/// gateway injects. The core trusts it and performs no further checks.
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<UserId>().ok())
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

pub fn build_router(state: AppState, rate_limiter: RateLimiter) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/chat", post(send_message))
        // GET pages a conversation by peer id; PUT/DELETE act on a
        // message id, mirroring the original route shape.
        .route(
            "/api/chat/:id",
            get(get_conversation).put(edit_message).delete(delete_message),
        )
        .route("/api/chat/seen/:message_id", put(mark_message_seen))
        .route("/api/chat/group", post(send_group_message))
        .route("/api/chat/group/:group_id", get(get_group_conversation))
        .route("/media/:name", get(get_media))
        .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── Sending ───

/// Fields accepted by the multipart send endpoints.
struct SendFields {
    target: Option<String>,
    content: String,
    file: Option<(Vec<u8>, String)>,
}

async fn collect_send_fields(
    multipart: &mut Multipart,
    target_field: &str,
) -> Result<SendFields, ApiError> {
    let mut fields = SendFields {
        target: None,
        content: String::new(),
        file: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation {
            field: "body",
            message: format!("Multipart error: {e}"),
        })?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == target_field {
            fields.target = Some(field.text().await.map_err(|e| ApiError::Validation {
                field: "body",
                message: format!("Failed to read field: {e}"),
            })?);
        } else if name == "content" {
            fields.content = field.text().await.map_err(|e| ApiError::Validation {
                field: "content",
                message: format!("Failed to read field: {e}"),
            })?;
        } else if name == "file" {
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field.bytes().await.map_err(|e| ApiError::Validation {
                field: "file",
                message: format!("Failed to read field: {e}"),
            })?;
            fields.file = Some((data.to_vec(), content_type));
        }
    }

    Ok(fields)
}

/// Persist and fan out one outbound message. The store write is the
/// critical path: if it fails, the whole request fails. The pushes that
/// follow never do.
async fn create_message(
    state: &AppState,
    sender: UserId,
    conversation: Conversation,
    fields: SendFields,
) -> Result<Message, ApiError> {
    if fields.content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::Validation {
            field: "content",
            message: format!("Message content cannot exceed {MAX_CONTENT_LEN} characters"),
        });
    }
    if fields.file.is_none() && fields.content.trim().is_empty() {
        return Err(ApiError::Validation {
            field: "content",
            message: "Message content cannot be empty when no file is attached".to_string(),
        });
    }

    let mut content = fields.content;
    let mut kind = MessageKind::Text;
    let mut media_url = None;

    if let Some((data, content_type)) = fields.file {
        let stored = state.media.store(&data, &content_type).await?;
        kind = stored.kind;
        media_url = Some(stored.url);
        if content.trim().is_empty() {
            content = kind.placeholder_content().to_string();
        }
    }

    let message = Message::new(sender, conversation, content, kind, media_url);

    {
        let db = state.db.lock().expect("db lock poisoned");
        db.insert_message(&message)?;
    }

    state.fanout.message_created(&message);
    Ok(message)
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let fields = collect_send_fields(&mut multipart, "receiver").await?;

    let receiver = fields
        .target
        .as_deref()
        .and_then(|v| v.parse::<UserId>().ok())
        .ok_or(ApiError::Validation {
            field: "receiver",
            message: "Receiver is required".to_string(),
        })?;

    let message = create_message(&state, sender, Conversation::Direct(receiver), fields).await?;

    info!(message = %message.id, sender = %sender, receiver = %receiver, "message sent");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": message })),
    ))
}

async fn send_group_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let fields = collect_send_fields(&mut multipart, "group").await?;

    let group = fields
        .target
        .as_deref()
        .and_then(|v| v.parse::<uuid::Uuid>().ok())
        .map(GroupId)
        .ok_or(ApiError::Validation {
            field: "group",
            message: "Group is required".to_string(),
        })?;

    let is_member = {
        let db = state.db.lock().expect("db lock poisoned");
        db.is_group_member(group, sender)?
    };
    if !is_member {
        return Err(ApiError::Forbidden("not a member of this group".to_string()));
    }

    let message = create_message(&state, sender, Conversation::Group(group), fields).await?;

    info!(message = %message.id, sender = %sender, group = %group, "group message sent");

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "success": true, "data": message })),
    ))
}

// ─── Reading ───

#[derive(Deserialize)]
pub struct PageParams {
    /// Cursor: only messages strictly older than this are returned.
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Fetch one page of a direct conversation.
///
/// Side effect: everything the peer sent the viewer is bulk-marked seen,
/// and the peer is notified. This is the coarse seen path; the
/// per-message visibility path uses `PUT /api/chat/seen/{id}`.
async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(peer_id): Path<UserId>,
    Query(params): Query<PageParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let (page, seen_ids, seen_at) = {
        let db = state.db.lock().expect("db lock poisoned");
        let (seen_ids, seen_at) = db.mark_seen_bulk(viewer, peer_id)?;
        let page = db.conversation_page(
            viewer,
            Conversation::Direct(peer_id),
            params.before,
            limit,
        )?;
        (page, seen_ids, seen_at)
    };

    state.fanout.messages_seen(peer_id, viewer, seen_ids, seen_at);

    Ok(Json(serde_json::json!({
        "messages": page.messages,
        "hasMore": page.has_more,
    })))
}

async fn get_group_conversation(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(group_id): Path<GroupId>,
    Query(params): Query<PageParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);

    let page = {
        let db = state.db.lock().expect("db lock poisoned");
        if !db.is_group_member(group_id, viewer)? {
            return Err(ApiError::Forbidden("not a member of this group".to_string()));
        }
        db.conversation_page(viewer, Conversation::Group(group_id), params.before, limit)?
    };

    Ok(Json(serde_json::json!({
        "messages": page.messages,
        "hasMore": page.has_more,
    })))
}

// ─── Mutations ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditBody {
    pub new_content: String,
}

async fn edit_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
    Json(body): Json<EditBody>,
) -> Result<Json<Message>, ApiError> {
    if body.new_content.trim().is_empty() {
        return Err(ApiError::Validation {
            field: "newContent",
            message: "Edited content cannot be empty".to_string(),
        });
    }
    if body.new_content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::Validation {
            field: "newContent",
            message: format!("Message content cannot exceed {MAX_CONTENT_LEN} characters"),
        });
    }

    let message = {
        let db = state.db.lock().expect("db lock poisoned");
        db.edit_content(message_id, user, &body.new_content)?
    };

    state.fanout.message_edited(&message);

    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = {
        let db = state.db.lock().expect("db lock poisoned");
        db.mark_deleted(message_id, user)?
    };

    state.fanout.message_deleted(&message);

    Ok(Json(serde_json::json!({
        "success": true,
        "message": message,
    })))
}

/// Fine-grained seen marking, driven by client-side visibility tracking.
/// Idempotent: marking an already-seen message is a no-op, not an error.
async fn mark_message_seen(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (sender, transitioned) = {
        let db = state.db.lock().expect("db lock poisoned");
        let sender = db.get_message(message_id)?.sender;
        (sender, db.mark_seen(message_id, user)?)
    };

    if let Some(seen_at) = transitioned {
        state
            .fanout
            .messages_seen(sender, user, vec![message_id], seen_at);
    }

    let seen_at = {
        let db = state.db.lock().expect("db lock poisoned");
        db.get_message(message_id)?.seen_at
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "messageId": message_id,
        "seenAt": seen_at,
    })))
}

// ─── Media ───

async fn get_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let data = state.media.read(&name).await?;

    let content_type = match name.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

pub async fn serve(state: AppState, rate_limiter: RateLimiter, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state, rate_limiter);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use uuid::Uuid;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Mutex::new(
            Database::open_at(&dir.path().join("test.db")).unwrap(),
        ));
        let registry = Arc::new(PresenceRegistry::new(db.clone()));
        let fanout = Arc::new(Fanout::new(registry.clone(), db.clone()));
        let media = Arc::new(
            MediaStore::new(dir.path().join("media"), 1024 * 1024)
                .await
                .unwrap(),
        );
        let state = AppState {
            db,
            registry,
            fanout,
            media,
            config: Arc::new(ServerConfig::default()),
        };
        (state, dir)
    }

    fn insert_direct(state: &AppState, sender: UserId, receiver: UserId, content: &str) -> Message {
        let message = Message::new(
            sender,
            Conversation::Direct(receiver),
            content.to_string(),
            MessageKind::Text,
            None,
        );
        state
            .db
            .lock()
            .unwrap()
            .insert_message(&message)
            .unwrap();
        message
    }

    /// Send to an offline recipient, then have them fetch: the message is
    /// there and the fetch-side effect marked it seen.
    #[tokio::test]
    async fn offline_recipient_reconciles_on_fetch() {
        let (state, _dir) = test_state().await;
        let x = UserId::new();
        let y = UserId::new();

        let message = insert_direct(&state, x, y, "hello");
        // Y is offline; the fanout must absorb this silently.
        state.fanout.message_created(&message);
        assert!(!state.db.lock().unwrap().get_message(message.id).unwrap().seen);

        // X is online when Y finally fetches, so X hears about the seen
        // transition.
        let (x_tx, mut x_rx) = unbounded_channel();
        state.registry.register(x, Uuid::new_v4(), x_tx);

        let response = get_conversation(
            State(state.clone()),
            AuthUser(y),
            Path(x),
            Query(PageParams { before: None, limit: None }),
        )
        .await
        .unwrap();

        let body = response.0;
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["messages"][0]["seen"], true);
        assert_eq!(body["hasMore"], false);

        assert!(state.db.lock().unwrap().get_message(message.id).unwrap().seen);

        let mut seen_notice = false;
        while let Ok(event) = x_rx.try_recv() {
            if let palaver_shared::protocol::ServerEvent::MessagesSeen { by, message_ids, .. } =
                event
            {
                assert_eq!(by, y);
                assert_eq!(message_ids, vec![message.id]);
                seen_notice = true;
            }
        }
        assert!(seen_notice);
    }

    #[tokio::test]
    async fn mark_seen_twice_is_a_noop() {
        let (state, _dir) = test_state().await;
        let x = UserId::new();
        let y = UserId::new();
        let message = insert_direct(&state, x, y, "hello");

        let first = mark_message_seen(
            State(state.clone()),
            AuthUser(y),
            Path(message.id),
        )
        .await
        .unwrap();
        let first_seen_at = first.0["seenAt"].clone();
        assert!(!first_seen_at.is_null());

        let second = mark_message_seen(
            State(state.clone()),
            AuthUser(y),
            Path(message.id),
        )
        .await
        .unwrap();
        assert_eq!(second.0["seenAt"], first_seen_at);
    }

    #[tokio::test]
    async fn editing_someone_elses_message_is_forbidden() {
        let (state, _dir) = test_state().await;
        let x = UserId::new();
        let y = UserId::new();
        let message = insert_direct(&state, x, y, "mine");

        let result = edit_message(
            State(state.clone()),
            AuthUser(y),
            Path(message.id),
            Json(EditBody { new_content: "hijacked".to_string() }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn delete_pushes_tombstone_to_both_sides() {
        let (state, _dir) = test_state().await;
        let x = UserId::new();
        let y = UserId::new();
        let message = insert_direct(&state, x, y, "oops");

        let (x_tx, mut x_rx) = unbounded_channel();
        state.registry.register(x, Uuid::new_v4(), x_tx);
        let (y_tx, mut y_rx) = unbounded_channel();
        state.registry.register(y, Uuid::new_v4(), y_tx);

        delete_message(State(state.clone()), AuthUser(x), Path(message.id))
            .await
            .unwrap();

        for rx in [&mut x_rx, &mut y_rx] {
            let mut saw_tombstone = false;
            while let Ok(event) = rx.try_recv() {
                if let palaver_shared::protocol::ServerEvent::MessageDeleted { message: m } = event
                {
                    assert!(m.deleted);
                    assert_eq!(m.content, palaver_shared::constants::TOMBSTONE_TEXT);
                    assert_eq!(m.media_url, None);
                    saw_tombstone = true;
                }
            }
            assert!(saw_tombstone);
        }
    }
}
