use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Entity identifiers are opaque strings: user ids are issued by the
/// identity provider, everything else is a locally generated UUID.
pub type Id = String;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub image_url: String,
    pub link: Option<String>,
    pub tags: Vec<String>,
    pub board_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

/// One endorsement per (user, pin); the store's unique constraint on the
/// pair is the authoritative guard against duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: Id,
    pub user_id: Id,
    pub pin_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub user_id: Id,
    pub pin_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ---------------- write inputs ----------------

/// Mirrored profile fields pushed by the identity provider; local code never
/// invents a user id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Id,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewBoard {
    pub name: String,
    pub description: Option<String>,
    pub is_private: Option<bool>,
}

/// Partial update: an omitted field keeps its value, an explicit
/// empty/null description clears it. The double `Option` on `description`
/// distinguishes absent-from-the-body from present-but-null.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBoard {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub is_private: Option<bool>,
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPin {
    pub title: String,
    pub description: Option<String>,
    pub image_url: String,
    pub link: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub board_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachPin {
    pub pin_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMediaRequest {
    pub public_id: String,
}

// ---------------- read models ----------------

/// Public author shape embedded in list views.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Id,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Author shape on the pin detail view (adds bio).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetail {
    pub id: Id,
    pub name: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    pub id: Id,
    pub name: String,
}

/// Pin plus the derived data every list view needs. Counts are recomputed
/// from the underlying relations on every read, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PinWithMeta {
    #[serde(flatten)]
    pub pin: Pin,
    pub user: UserSummary,
    pub board: Option<BoardSummary>,
    pub likes_count: i64,
    pub comments_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithAuthor {
    #[serde(flatten)]
    pub comment: Comment,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardWithCount {
    #[serde(flatten)]
    pub board: Board,
    pub pins_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoardDetail {
    #[serde(flatten)]
    pub board: Board,
    pub user: UserSummary,
    pub pins: Vec<PinWithMeta>,
    pub pins_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PinDetailView {
    #[serde(flatten)]
    pub pin: Pin,
    pub user: AuthorDetail,
    pub board: Option<BoardSummary>,
    pub comments: Vec<CommentWithAuthor>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub is_liked: bool,
    pub related_pins: Vec<PinWithMeta>,
}

/// Uniform pagination envelope; `limit` is fixed at 20 on list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl PageMeta {
    pub fn new(page: i64, limit: i64, total: i64, returned: usize) -> Self {
        let skip = (page - 1) * limit;
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
            has_more: skip + (returned as i64) < total,
        }
    }

    /// Zero-page metadata for blank queries.
    pub fn empty(limit: i64) -> Self {
        Self { page: 1, limit, total: 0, total_pages: 0, has_more: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PinPage {
    pub pins: Vec<PinWithMeta>,
    pub pagination: PageMeta,
}
