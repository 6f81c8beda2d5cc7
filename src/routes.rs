use std::sync::Arc;

use actix_web::{web, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::Deserialize;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;
use crate::storage::{MediaStore, MediaStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/boards")
                    .route(web::get().to(my_boards))
                    .route(web::post().to(create_board)),
            )
            .service(
                web::resource("/boards/{id}")
                    .route(web::get().to(get_board))
                    .route(web::patch().to(update_board))
                    .route(web::delete().to(delete_board)),
            )
            .service(
                web::resource("/boards/{id}/pin")
                    .route(web::post().to(attach_pin))
                    .route(web::delete().to(detach_pin)),
            )
            .service(
                web::resource("/pins")
                    .route(web::get().to(recent_pins))
                    .route(web::post().to(create_pin)),
            )
            .service(
                web::resource("/pins/{id}")
                    .route(web::get().to(pin_detail))
                    .route(web::delete().to(delete_pin)),
            )
            .service(
                web::resource("/pins/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/pins/{id}/like")
                    .route(web::post().to(like_pin))
                    .route(web::delete().to(unlike_pin)),
            )
            .service(web::resource("/search").route(web::get().to(search_pins)))
            .service(web::resource("/user/{user_id}").route(web::get().to(user_pins)))
            .service(
                web::resource("/upload")
                    .route(web::post().to(upload_media))
                    .route(web::delete().to(delete_media)),
            )
            .service(
                web::resource("/webhooks/identity")
                    .route(web::post().to(crate::webhook::identity_webhook)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub media: Arc<dyn MediaStore>,
}

/// Fixed page size on every list endpoint.
pub const PAGE_LIMIT: i64 = 20;
/// Home feed depth.
const FEED_LIMIT: i64 = 50;

/// The one authorization rule this system has: a Board or Pin is
/// administrable only by the user id stored on it.
fn ensure_owner(owner: &str, auth: &Auth) -> Result<(), ApiError> {
    if owner != auth.user_id() {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachQuery {
    pub pin_id: Option<String>,
}

fn page_of(q: Option<i64>) -> i64 {
    q.unwrap_or(1).max(1)
}

// ---------------- boards ----------------

#[utoipa::path(
    post,
    path = "/api/v1/boards",
    request_body = NewBoard,
    responses(
        (status = 200, description = "Board created", body = Board),
        (status = 400, description = "Name missing"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_board(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewBoard>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("board name is required".into()));
    }
    let description = payload
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let board = data
        .repo
        .create_board(
            auth.user_id(),
            NewBoard { name, description, is_private: payload.is_private },
        )
        .await?;
    Ok(HttpResponse::Ok().json(board))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards",
    responses(
        (status = 200, description = "Caller's boards with pin counts", body = [BoardWithCount]),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn my_boards(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let boards = data.repo.boards_by_user(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(boards))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{id}",
    params(("id" = String, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board with member pins", body = BoardDetail),
        (status = 403, description = "Private board, caller is not the owner"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn get_board(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let detail = data.repo.board_detail(&path.into_inner()).await?;
    if detail.board.is_private {
        let viewer = auth.as_ref().map(|a| a.user_id());
        if viewer != Some(detail.board.user_id.as_str()) {
            return Err(ApiError::Forbidden);
        }
    }
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    patch,
    path = "/api/v1/boards/{id}",
    request_body = UpdateBoard,
    params(("id" = String, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board updated", body = Board),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn update_board(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateBoard>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let board = data.repo.get_board(&id).await?;
    ensure_owner(&board.user_id, &auth)?;

    let payload = payload.into_inner();
    let name = match payload.name {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(ApiError::Validation("board name is required".into()));
            }
            Some(n)
        }
        None => None,
    };
    // present-but-empty clears the description; omitted leaves it alone
    let description = payload
        .description
        .map(|d| d.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));

    let updated = data
        .repo
        .update_board(&id, UpdateBoard { name, description, is_private: payload.is_private })
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/boards/{id}",
    params(("id" = String, Path, description = "Board id")),
    responses(
        (status = 200, description = "Board deleted, member pins detached"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Board not found")
    )
)]
pub async fn delete_board(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let board = data.repo.get_board(&id).await?;
    ensure_owner(&board.user_id, &auth)?;
    data.repo.delete_board(&id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Board deleted successfully"
    })))
}

// ---------------- pin-to-board association ----------------

#[utoipa::path(
    post,
    path = "/api/v1/boards/{id}/pin",
    request_body = AttachPin,
    params(("id" = String, Path, description = "Board id")),
    responses(
        (status = 200, description = "Pin attached", body = PinWithMeta),
        (status = 400, description = "pinId missing"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller does not own the board"),
        (status = 404, description = "Board or pin not found")
    )
)]
pub async fn attach_pin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AttachPin>,
) -> Result<HttpResponse, ApiError> {
    let board_id = path.into_inner();
    let pin_id = payload.pin_id.trim().to_string();
    if pin_id.is_empty() {
        return Err(ApiError::Validation("pinId is required".into()));
    }
    let board = data.repo.get_board(&board_id).await?;
    ensure_owner(&board.user_id, &auth)?;
    // the pin itself may belong to anyone; only the board is the caller's
    data.repo.get_pin(&pin_id).await?;
    let pin = data.repo.set_pin_board(&pin_id, Some(&board_id)).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "pin": pin
    })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/boards/{id}/pin",
    params(
        ("id" = String, Path, description = "Board id"),
        ("pinId" = String, Query, description = "Pin to detach")
    ),
    responses(
        (status = 200, description = "Pin detached"),
        (status = 400, description = "pinId missing or pin not attached to this board"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Board missing or caller does not own it")
    )
)]
pub async fn detach_pin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DetachQuery>,
) -> Result<HttpResponse, ApiError> {
    let board_id = path.into_inner();
    let pin_id = match query.into_inner().pin_id.filter(|p| !p.trim().is_empty()) {
        Some(p) => p,
        None => return Err(ApiError::Validation("pinId is required".into())),
    };
    let board = data
        .repo
        .get_board(&board_id)
        .await
        .map_err(|_| ApiError::Forbidden)?;
    ensure_owner(&board.user_id, &auth)?;
    // the pin must actually sit on the path board: an attacker-controlled
    // pinId must not detach a pin from some unrelated board
    let pin = data
        .repo
        .get_pin(&pin_id)
        .await
        .map_err(|_| ApiError::Validation("pin is not attached to this board".into()))?;
    if pin.board_id.as_deref() != Some(board_id.as_str()) {
        return Err(ApiError::Validation("pin is not attached to this board".into()));
    }
    data.repo.set_pin_board(&pin_id, None).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Pin removed from board"
    })))
}

// ---------------- pins ----------------

#[utoipa::path(
    get,
    path = "/api/v1/pins",
    responses((status = 200, description = "Newest pins", body = [PinWithMeta]))
)]
pub async fn recent_pins(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let pins = data.repo.recent_pins(FEED_LIMIT).await?;
    Ok(HttpResponse::Ok().json(pins))
}

#[utoipa::path(
    post,
    path = "/api/v1/pins",
    request_body = NewPin,
    responses(
        (status = 201, description = "Pin created", body = Pin),
        (status = 400, description = "Missing title or imageUrl"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Target board belongs to someone else"),
        (status = 404, description = "Target board not found")
    )
)]
pub async fn create_pin(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPin>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("pin title is required".into()));
    }
    if payload.image_url.trim().is_empty() {
        return Err(ApiError::Validation("imageUrl is required".into()));
    }
    // lowercased at write time so tag search stays exact-membership
    let tags: Vec<String> = payload
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(board_id) = &payload.board_id {
        let board = data.repo.get_board(board_id).await?;
        ensure_owner(&board.user_id, &auth)?;
    }
    let pin = data
        .repo
        .create_pin(
            auth.user_id(),
            NewPin {
                title,
                description: payload.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
                image_url: payload.image_url.trim().to_string(),
                link: payload.link.filter(|l| !l.trim().is_empty()),
                tags,
                board_id: payload.board_id,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(pin))
}

#[utoipa::path(
    get,
    path = "/api/v1/pins/{id}",
    params(("id" = String, Path, description = "Pin id")),
    responses(
        (status = 200, description = "Pin detail with comments, counts and related pins", body = PinDetailView),
        (status = 404, description = "Pin not found")
    )
)]
pub async fn pin_detail(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(|a| a.user_id());
    let detail = data.repo.pin_detail(&path.into_inner(), viewer).await?;
    Ok(HttpResponse::Ok().json(detail))
}

#[utoipa::path(
    delete,
    path = "/api/v1/pins/{id}",
    params(("id" = String, Path, description = "Pin id")),
    responses(
        (status = 200, description = "Pin deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Pin not found")
    )
)]
pub async fn delete_pin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let pin = data.repo.get_pin(&id).await?;
    ensure_owner(&pin.user_id, &auth)?;
    data.repo.delete_pin(&id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Pin deleted successfully"
    })))
}

// ---------------- comments ----------------

#[utoipa::path(
    get,
    path = "/api/v1/pins/{id}/comments",
    params(("id" = String, Path, description = "Pin id")),
    responses((status = 200, description = "Comments newest-first", body = [CommentWithAuthor]))
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let comments = data.repo.list_comments(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "comments": comments })))
}

/// Maximum comment length in characters, counted after trimming.
const COMMENT_MAX_CHARS: usize = 500;

#[utoipa::path(
    post,
    path = "/api/v1/pins/{id}/comments",
    request_body = NewComment,
    params(("id" = String, Path, description = "Pin id")),
    responses(
        (status = 201, description = "Comment created", body = CommentWithAuthor),
        (status = 400, description = "Text empty or over 500 characters"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Pin not found")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(ApiError::Validation("comment text is required".into()));
    }
    if text.chars().count() > COMMENT_MAX_CHARS {
        return Err(ApiError::Validation("comment must be 500 characters or fewer".into()));
    }
    let comment = data
        .repo
        .create_comment(auth.user_id(), &path.into_inner(), text)
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

// ---------------- likes ----------------

#[utoipa::path(
    post,
    path = "/api/v1/pins/{id}/like",
    params(("id" = String, Path, description = "Pin id")),
    responses(
        (status = 200, description = "Liked; fresh count returned"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Pin not found"),
        (status = 409, description = "Already liked")
    )
)]
pub async fn like_pin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let pin_id = path.into_inner();
    data.repo.create_like(auth.user_id(), &pin_id).await?;
    // recomputed server-side; clients never trust their own increment
    let likes_count = data.repo.count_likes(&pin_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "liked": true,
        "likesCount": likes_count
    })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/pins/{id}/like",
    params(("id" = String, Path, description = "Pin id")),
    responses(
        (status = 200, description = "Unliked; fresh count returned"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No like to remove")
    )
)]
pub async fn unlike_pin(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let pin_id = path.into_inner();
    // removing a like that is not there is a 404, not a silent success
    data.repo.delete_like(auth.user_id(), &pin_id).await?;
    let likes_count = data.repo.count_likes(&pin_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "liked": false,
        "likesCount": likes_count
    })))
}

// ---------------- search & profile ----------------

#[utoipa::path(
    get,
    path = "/api/v1/search",
    params(
        ("q" = Option<String>, Query, description = "Free-text query"),
        ("page" = Option<i64>, Query, description = "1-based page")
    ),
    responses((status = 200, description = "Matching pins, newest-first", body = PinPage))
)]
pub async fn search_pins(
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.clone().unwrap_or_default();
    let q = q.trim();
    if q.is_empty() {
        // blank query means an empty result set, not the universe of pins
        return Ok(HttpResponse::Ok().json(PinPage {
            pins: vec![],
            pagination: PageMeta::empty(PAGE_LIMIT),
        }));
    }
    let page = page_of(query.page);
    let (pins, total) = data.repo.search_pins(q, page, PAGE_LIMIT).await?;
    let pagination = PageMeta::new(page, PAGE_LIMIT, total, pins.len());
    Ok(HttpResponse::Ok().json(PinPage { pins, pagination }))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/{user_id}",
    params(
        ("user_id" = String, Path, description = "Profile user id"),
        ("page" = Option<i64>, Query, description = "1-based page")
    ),
    responses((status = 200, description = "The user's pins, newest-first", body = PinPage))
)]
pub async fn user_pins(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = page_of(query.page);
    let (pins, total) = data
        .repo
        .pins_by_user(&path.into_inner(), page, PAGE_LIMIT)
        .await?;
    let pagination = PageMeta::new(page, PAGE_LIMIT, total, pins.len());
    Ok(HttpResponse::Ok().json(PinPage { pins, pagination }))
}

// ---------------- media ----------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
    pub public_id: String,
}

const MEDIA_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/upload",
    responses(
        (status = 200, description = "Stored; public URL and asset id returned", body = UploadResponse),
        (status = 400, description = "Missing file, bad type, or too large"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Media store failure")
    )
)]
pub async fn upload_media(
    _auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if let Some(name) = field.content_disposition().get_name() {
            if name != "file" { continue; }
        } else { continue; }
        let mut field_stream = field;
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > MEDIA_SIZE_LIMIT {
                return Err(ApiError::Validation("file too large, maximum 10MB".into()));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::Validation("no file provided".into()));
        }
        // sniffed, not trusted from the declared content type
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Err(ApiError::Validation("invalid file type, only images allowed".into()));
        }
        let asset = data.media.upload(&bytes, &mime).await.map_err(|e| {
            log::error!("media upload failed: {e}");
            ApiError::Upstream
        })?;
        return Ok(HttpResponse::Ok().json(UploadResponse {
            success: true,
            url: asset.url,
            public_id: asset.public_id,
        }));
    }
    Err(ApiError::Validation("no file provided".into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/upload",
    request_body = DeleteMediaRequest,
    responses(
        (status = 200, description = "Asset deleted"),
        (status = 400, description = "publicId missing"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown asset"),
        (status = 500, description = "Media store reported non-success")
    )
)]
pub async fn delete_media(
    _auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<DeleteMediaRequest>,
) -> Result<HttpResponse, ApiError> {
    let public_id = payload.public_id.trim();
    if public_id.is_empty() {
        return Err(ApiError::Validation("publicId is required".into()));
    }
    data.media.delete(public_id).await.map_err(|e| match e {
        MediaStoreError::NotFound => ApiError::NotFound,
        MediaStoreError::Other(msg) => {
            log::error!("media delete failed: {msg}");
            ApiError::Upstream
        }
    })?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Media deleted"
    })))
}
