use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Users exist only as mirrors of identity-provider lifecycle events.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, id: &str, upd: UserUpdate) -> RepoResult<User>;
    /// Removes the user together with their pins, boards, likes and
    /// comments; pins other users parked on the removed boards are detached.
    async fn delete_user(&self, id: &str) -> RepoResult<()>;
    async fn get_user(&self, id: &str) -> RepoResult<User>;
}

#[async_trait]
pub trait BoardRepo: Send + Sync {
    async fn create_board(&self, owner: &str, new: NewBoard) -> RepoResult<Board>;
    async fn get_board(&self, id: &str) -> RepoResult<Board>;
    /// Board with owner summary, member pins newest-first and derived counts.
    async fn board_detail(&self, id: &str) -> RepoResult<BoardDetail>;
    async fn boards_by_user(&self, owner: &str) -> RepoResult<Vec<BoardWithCount>>;
    async fn update_board(&self, id: &str, upd: UpdateBoard) -> RepoResult<Board>;
    /// Detaches member pins, then deletes the board. Pins survive.
    async fn delete_board(&self, id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait PinRepo: Send + Sync {
    async fn create_pin(&self, owner: &str, new: NewPin) -> RepoResult<Pin>;
    async fn get_pin(&self, id: &str) -> RepoResult<Pin>;
    async fn delete_pin(&self, id: &str) -> RepoResult<()>;
    async fn set_pin_board(&self, pin_id: &str, board_id: Option<&str>) -> RepoResult<PinWithMeta>;
    async fn recent_pins(&self, limit: i64) -> RepoResult<Vec<PinWithMeta>>;
    async fn pins_by_user(&self, user_id: &str, page: i64, limit: i64)
        -> RepoResult<(Vec<PinWithMeta>, i64)>;
    /// Case-insensitive substring match on title/description plus exact tag
    /// membership. The page and the total are produced by the same predicate
    /// so pagination metadata cannot drift from the returned rows.
    async fn search_pins(&self, query: &str, page: i64, limit: i64)
        -> RepoResult<(Vec<PinWithMeta>, i64)>;
    async fn pin_detail(&self, id: &str, viewer: Option<&str>) -> RepoResult<PinDetailView>;
}

#[async_trait]
pub trait LikeRepo: Send + Sync {
    /// `Conflict` when the (user, pin) pair already exists, `NotFound` when
    /// the pin is absent.
    async fn create_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()>;
    /// `NotFound` when no such like exists; never a silent no-op.
    async fn delete_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()>;
    async fn count_likes(&self, pin_id: &str) -> RepoResult<i64>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, user_id: &str, pin_id: &str, text: &str)
        -> RepoResult<CommentWithAuthor>;
    async fn list_comments(&self, pin_id: &str) -> RepoResult<Vec<CommentWithAuthor>>;
}

pub trait Repo: UserRepo + BoardRepo + PinRepo + LikeRepo + CommentRepo {}

impl<T> Repo for T where T: UserRepo + BoardRepo + PinRepo + LikeRepo + CommentRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};
    use uuid::Uuid;

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        boards: HashMap<Id, Board>,
        pins: HashMap<Id, Pin>,
        likes: HashMap<Id, Like>,
        comments: HashMap<Id, Comment>,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("PINBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("PINBOARD_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        eprintln!("[inmem] Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        eprintln!("[inmem] Failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    eprintln!("[inmem] No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    eprintln!("[inmem] Failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id() -> Id {
            Uuid::new_v4().to_string()
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    // ---- read-model assembly ------------------------------------------

    fn user_summary(s: &State, id: &str) -> UserSummary {
        s.users
            .get(id)
            .map(|u| UserSummary { id: u.id.clone(), name: u.name.clone(), image: u.image.clone() })
            .unwrap_or_else(|| UserSummary { id: id.to_string(), name: None, image: None })
    }

    fn board_summary(s: &State, id: &str) -> Option<BoardSummary> {
        s.boards.get(id).map(|b| BoardSummary { id: b.id.clone(), name: b.name.clone() })
    }

    fn pin_meta(s: &State, pin: &Pin) -> PinWithMeta {
        PinWithMeta {
            pin: pin.clone(),
            user: user_summary(s, &pin.user_id),
            board: pin.board_id.as_deref().and_then(|b| board_summary(s, b)),
            likes_count: s.likes.values().filter(|l| l.pin_id == pin.id).count() as i64,
            comments_count: s.comments.values().filter(|c| c.pin_id == pin.id).count() as i64,
        }
    }

    fn newest_first(mut pins: Vec<Pin>) -> Vec<Pin> {
        pins.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pins
    }

    fn search_matches(pin: &Pin, needle: &str) -> bool {
        pin.title.to_lowercase().contains(needle)
            || pin.description.as_deref().map(|d| d.to_lowercase().contains(needle)).unwrap_or(false)
            || pin.tags.iter().any(|t| t.eq_ignore_ascii_case(needle))
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.contains_key(&new.id) {
                return Err(RepoError::Conflict);
            }
            let user = User {
                id: new.id,
                email: new.email,
                name: new.name,
                image: new.image,
                bio: None,
                website: None,
                created_at: Utc::now(),
            };
            s.users.insert(user.id.clone(), user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn update_user(&self, id: &str, upd: UserUpdate) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(id).ok_or(RepoError::NotFound)?;
            user.email = upd.email;
            user.name = upd.name;
            user.image = upd.image;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_user(&self, id: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.users.remove(id).is_none() {
                return Err(RepoError::NotFound);
            }
            // pins other users parked on this user's boards get detached
            let owned_boards: Vec<Id> =
                s.boards.values().filter(|b| b.user_id == id).map(|b| b.id.clone()).collect();
            for pin in s.pins.values_mut() {
                if pin.board_id.as_deref().map(|b| owned_boards.iter().any(|ob| ob.as_str() == b)).unwrap_or(false) {
                    pin.board_id = None;
                }
            }
            s.boards.retain(|_, b| b.user_id != id);
            let owned_pins: Vec<Id> =
                s.pins.values().filter(|p| p.user_id == id).map(|p| p.id.clone()).collect();
            s.pins.retain(|_, p| p.user_id != id);
            s.likes.retain(|_, l| l.user_id != id && !owned_pins.contains(&l.pin_id));
            s.comments.retain(|_, c| c.user_id != id && !owned_pins.contains(&c.pin_id));
            drop(s);
            self.persist();
            Ok(())
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(id).cloned().ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl BoardRepo for InMemRepo {
        async fn create_board(&self, owner: &str, new: NewBoard) -> RepoResult<Board> {
            let mut s = self.state.write().unwrap();
            let board = Board {
                id: Self::next_id(),
                user_id: owner.to_string(),
                name: new.name,
                description: new.description,
                is_private: new.is_private.unwrap_or(false),
                created_at: Utc::now(),
            };
            s.boards.insert(board.id.clone(), board.clone());
            drop(s);
            self.persist();
            Ok(board)
        }

        async fn get_board(&self, id: &str) -> RepoResult<Board> {
            let s = self.state.read().unwrap();
            s.boards.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn board_detail(&self, id: &str) -> RepoResult<BoardDetail> {
            let s = self.state.read().unwrap();
            let board = s.boards.get(id).cloned().ok_or(RepoError::NotFound)?;
            let members = newest_first(
                s.pins.values().filter(|p| p.board_id.as_deref() == Some(id)).cloned().collect(),
            );
            let pins: Vec<PinWithMeta> = members.iter().map(|p| pin_meta(&s, p)).collect();
            let pins_count = pins.len() as i64;
            Ok(BoardDetail {
                user: user_summary(&s, &board.user_id),
                board,
                pins,
                pins_count,
            })
        }

        async fn boards_by_user(&self, owner: &str) -> RepoResult<Vec<BoardWithCount>> {
            let s = self.state.read().unwrap();
            let mut boards: Vec<Board> =
                s.boards.values().filter(|b| b.user_id == owner).cloned().collect();
            boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(boards
                .into_iter()
                .map(|b| {
                    let pins_count =
                        s.pins.values().filter(|p| p.board_id.as_deref() == Some(b.id.as_str())).count() as i64;
                    BoardWithCount { board: b, pins_count }
                })
                .collect())
        }

        async fn update_board(&self, id: &str, upd: UpdateBoard) -> RepoResult<Board> {
            let mut s = self.state.write().unwrap();
            let board = s.boards.get_mut(id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name { board.name = name; }
            if let Some(description) = upd.description { board.description = description; }
            if let Some(is_private) = upd.is_private { board.is_private = is_private; }
            let updated = board.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_board(&self, id: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.boards.contains_key(id) {
                return Err(RepoError::NotFound);
            }
            for pin in s.pins.values_mut() {
                if pin.board_id.as_deref() == Some(id) {
                    pin.board_id = None;
                }
            }
            s.boards.remove(id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl PinRepo for InMemRepo {
        async fn create_pin(&self, owner: &str, new: NewPin) -> RepoResult<Pin> {
            let mut s = self.state.write().unwrap();
            if let Some(board_id) = &new.board_id {
                if !s.boards.contains_key(board_id) {
                    return Err(RepoError::NotFound);
                }
            }
            let pin = Pin {
                id: Self::next_id(),
                user_id: owner.to_string(),
                title: new.title,
                description: new.description,
                image_url: new.image_url,
                link: new.link,
                tags: new.tags,
                board_id: new.board_id,
                created_at: Utc::now(),
            };
            s.pins.insert(pin.id.clone(), pin.clone());
            drop(s);
            self.persist();
            Ok(pin)
        }

        async fn get_pin(&self, id: &str) -> RepoResult<Pin> {
            let s = self.state.read().unwrap();
            s.pins.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn delete_pin(&self, id: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.pins.remove(id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.likes.retain(|_, l| l.pin_id != id);
            s.comments.retain(|_, c| c.pin_id != id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn set_pin_board(&self, pin_id: &str, board_id: Option<&str>) -> RepoResult<PinWithMeta> {
            let mut s = self.state.write().unwrap();
            if let Some(bid) = board_id {
                if !s.boards.contains_key(bid) {
                    return Err(RepoError::NotFound);
                }
            }
            let pin = s.pins.get_mut(pin_id).ok_or(RepoError::NotFound)?;
            pin.board_id = board_id.map(|b| b.to_string());
            let updated = pin.clone();
            let meta = pin_meta(&s, &updated);
            drop(s);
            self.persist();
            Ok(meta)
        }

        async fn recent_pins(&self, limit: i64) -> RepoResult<Vec<PinWithMeta>> {
            let s = self.state.read().unwrap();
            let pins = newest_first(s.pins.values().cloned().collect());
            Ok(pins.iter().take(limit as usize).map(|p| pin_meta(&s, p)).collect())
        }

        async fn pins_by_user(&self, user_id: &str, page: i64, limit: i64)
            -> RepoResult<(Vec<PinWithMeta>, i64)>
        {
            let s = self.state.read().unwrap();
            let pins = newest_first(
                s.pins.values().filter(|p| p.user_id == user_id).cloned().collect(),
            );
            let total = pins.len() as i64;
            let skip = ((page - 1) * limit) as usize;
            let page_pins = pins
                .iter()
                .skip(skip)
                .take(limit as usize)
                .map(|p| pin_meta(&s, p))
                .collect();
            Ok((page_pins, total))
        }

        async fn search_pins(&self, query: &str, page: i64, limit: i64)
            -> RepoResult<(Vec<PinWithMeta>, i64)>
        {
            let needle = query.trim().to_lowercase();
            let s = self.state.read().unwrap();
            // one pass produces both the page and the total, so the metadata
            // is consistent with the returned rows by construction
            let matched = newest_first(
                s.pins.values().filter(|p| search_matches(p, &needle)).cloned().collect(),
            );
            let total = matched.len() as i64;
            let skip = ((page - 1) * limit) as usize;
            let page_pins = matched
                .iter()
                .skip(skip)
                .take(limit as usize)
                .map(|p| pin_meta(&s, p))
                .collect();
            Ok((page_pins, total))
        }

        async fn pin_detail(&self, id: &str, viewer: Option<&str>) -> RepoResult<PinDetailView> {
            let s = self.state.read().unwrap();
            let pin = s.pins.get(id).cloned().ok_or(RepoError::NotFound)?;
            let author = s.users.get(&pin.user_id);
            let user = AuthorDetail {
                id: pin.user_id.clone(),
                name: author.and_then(|u| u.name.clone()),
                image: author.and_then(|u| u.image.clone()),
                bio: author.and_then(|u| u.bio.clone()),
            };
            let mut comments: Vec<Comment> =
                s.comments.values().filter(|c| c.pin_id == id).cloned().collect();
            comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let comments: Vec<CommentWithAuthor> = comments
                .into_iter()
                .map(|c| {
                    let user = user_summary(&s, &c.user_id);
                    CommentWithAuthor { comment: c, user }
                })
                .collect();
            let likes_count = s.likes.values().filter(|l| l.pin_id == id).count() as i64;
            let is_liked = viewer
                .map(|v| s.likes.values().any(|l| l.pin_id == id && l.user_id == v))
                .unwrap_or(false);
            let related = newest_first(
                s.pins
                    .values()
                    .filter(|p| {
                        p.id != id
                            && (p.user_id == pin.user_id
                                || p.tags.iter().any(|t| pin.tags.contains(t)))
                    })
                    .cloned()
                    .collect(),
            );
            let related_pins = related.iter().take(20).map(|p| pin_meta(&s, p)).collect();
            Ok(PinDetailView {
                board: pin.board_id.as_deref().and_then(|b| board_summary(&s, b)),
                user,
                comments_count: comments.len() as i64,
                comments,
                likes_count,
                is_liked,
                related_pins,
                pin,
            })
        }
    }

    #[async_trait]
    impl LikeRepo for InMemRepo {
        async fn create_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()> {
            // the write lock makes the check-then-insert atomic; Postgres
            // gets the same guarantee from the unique index instead
            let mut s = self.state.write().unwrap();
            if !s.pins.contains_key(pin_id) {
                return Err(RepoError::NotFound);
            }
            if s.likes.values().any(|l| l.user_id == user_id && l.pin_id == pin_id) {
                return Err(RepoError::Conflict);
            }
            let like = Like {
                id: Self::next_id(),
                user_id: user_id.to_string(),
                pin_id: pin_id.to_string(),
                created_at: Utc::now(),
            };
            s.likes.insert(like.id.clone(), like);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn delete_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let existing: Option<Id> = s
                .likes
                .values()
                .find(|l| l.user_id == user_id && l.pin_id == pin_id)
                .map(|l| l.id.clone());
            match existing {
                Some(id) => {
                    s.likes.remove(&id);
                    drop(s);
                    self.persist();
                    Ok(())
                }
                None => Err(RepoError::NotFound),
            }
        }

        async fn count_likes(&self, pin_id: &str) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            Ok(s.likes.values().filter(|l| l.pin_id == pin_id).count() as i64)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, user_id: &str, pin_id: &str, text: &str)
            -> RepoResult<CommentWithAuthor>
        {
            let mut s = self.state.write().unwrap();
            if !s.pins.contains_key(pin_id) {
                return Err(RepoError::NotFound);
            }
            let comment = Comment {
                id: Self::next_id(),
                user_id: user_id.to_string(),
                pin_id: pin_id.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
            };
            s.comments.insert(comment.id.clone(), comment.clone());
            let user = user_summary(&s, user_id);
            drop(s);
            self.persist();
            Ok(CommentWithAuthor { comment, user })
        }

        async fn list_comments(&self, pin_id: &str) -> RepoResult<Vec<CommentWithAuthor>> {
            let s = self.state.read().unwrap();
            let mut comments: Vec<Comment> =
                s.comments.values().filter(|c| c.pin_id == pin_id).cloned().collect();
            comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(comments
                .into_iter()
                .map(|c| {
                    let user = user_summary(&s, &c.user_id);
                    CommentWithAuthor { comment: c, user }
                })
                .collect())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{Pool, Postgres};
    use uuid::Uuid;

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation: the constraint is the authoritative guard
                Some("23505") => RepoError::Conflict,
                // foreign_key_violation: a referenced row is gone
                Some("23503") => RepoError::NotFound,
                _ => RepoError::Internal(e.to_string()),
            },
            _ => RepoError::Internal(e.to_string()),
        }
    }

    fn next_id() -> Id {
        Uuid::new_v4().to_string()
    }

    /// `%`/`_` are wildcards inside ILIKE patterns; a query containing them
    /// must still mean a literal substring.
    fn like_pattern(needle: &str) -> String {
        let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        format!("%{escaped}%")
    }

    #[derive(sqlx::FromRow)]
    struct PinMetaRow {
        id: String,
        user_id: String,
        title: String,
        description: Option<String>,
        image_url: String,
        link: Option<String>,
        tags: Vec<String>,
        board_id: Option<String>,
        created_at: DateTime<Utc>,
        author_name: Option<String>,
        author_image: Option<String>,
        board_name: Option<String>,
        likes_count: i64,
        comments_count: i64,
    }

    impl From<PinMetaRow> for PinWithMeta {
        fn from(r: PinMetaRow) -> Self {
            PinWithMeta {
                user: UserSummary {
                    id: r.user_id.clone(),
                    name: r.author_name,
                    image: r.author_image,
                },
                board: match (&r.board_id, r.board_name) {
                    (Some(id), Some(name)) => Some(BoardSummary { id: id.clone(), name }),
                    _ => None,
                },
                likes_count: r.likes_count,
                comments_count: r.comments_count,
                pin: Pin {
                    id: r.id,
                    user_id: r.user_id,
                    title: r.title,
                    description: r.description,
                    image_url: r.image_url,
                    link: r.link,
                    tags: r.tags,
                    board_id: r.board_id,
                    created_at: r.created_at,
                },
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct CommentRow {
        id: String,
        user_id: String,
        pin_id: String,
        text: String,
        created_at: DateTime<Utc>,
        author_name: Option<String>,
        author_image: Option<String>,
    }

    impl From<CommentRow> for CommentWithAuthor {
        fn from(r: CommentRow) -> Self {
            CommentWithAuthor {
                user: UserSummary {
                    id: r.user_id.clone(),
                    name: r.author_name,
                    image: r.author_image,
                },
                comment: Comment {
                    id: r.id,
                    user_id: r.user_id,
                    pin_id: r.pin_id,
                    text: r.text,
                    created_at: r.created_at,
                },
            }
        }
    }

    const PIN_META_SELECT: &str = r#"
        SELECT p.id, p.user_id, p.title, p.description, p.image_url, p.link,
               p.tags, p.board_id, p.created_at,
               u.name  AS author_name,
               u.image AS author_image,
               b.name  AS board_name,
               (SELECT COUNT(*) FROM likes    l WHERE l.pin_id = p.id) AS likes_count,
               (SELECT COUNT(*) FROM comments c WHERE c.pin_id = p.id) AS comments_count
        FROM pins p
        JOIN users u ON u.id = p.user_id
        LEFT JOIN boards b ON b.id = p.board_id
    "#;

    // shared by the page query and the count query; diverging predicates
    // would desynchronize pagination metadata from the returned rows
    const SEARCH_PREDICATE: &str = r#"(p.title ILIKE $1
        OR p.description ILIKE $1
        OR EXISTS (SELECT 1 FROM unnest(p.tags) tag WHERE lower(tag) = $2))"#;

    const COMMENT_SELECT: &str = r#"
        SELECT c.id, c.user_id, c.pin_id, c.text, c.created_at,
               u.name  AS author_name,
               u.image AS author_image
        FROM comments c
        JOIN users u ON u.id = c.user_id
    "#;

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "INSERT INTO users (id, email, name, image) VALUES ($1,$2,$3,$4)
                 RETURNING id, email, name, image, bio, website, created_at",
            )
            .bind(&new.id)
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.image)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn update_user(&self, id: &str, upd: UserUpdate) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "UPDATE users SET email = $2, name = $3, image = $4 WHERE id = $1
                 RETURNING id, email, name, image, bio, website, created_at",
            )
            .bind(id)
            .bind(&upd.email)
            .bind(&upd.name)
            .bind(&upd.image)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_user(&self, id: &str) -> RepoResult<()> {
            // FK cascades remove the user's content; boards that other
            // users' pins reference SET NULL the pins on the way out
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "SELECT id, email, name, image, bio, website, created_at FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }
    }

    #[async_trait]
    impl BoardRepo for PgRepo {
        async fn create_board(&self, owner: &str, new: NewBoard) -> RepoResult<Board> {
            sqlx::query_as::<_, Board>(
                "INSERT INTO boards (id, user_id, name, description, is_private)
                 VALUES ($1,$2,$3,$4,$5)
                 RETURNING id, user_id, name, description, is_private, created_at",
            )
            .bind(next_id())
            .bind(owner)
            .bind(&new.name)
            .bind(&new.description)
            .bind(new.is_private.unwrap_or(false))
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn get_board(&self, id: &str) -> RepoResult<Board> {
            sqlx::query_as::<_, Board>(
                "SELECT id, user_id, name, description, is_private, created_at
                 FROM boards WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn board_detail(&self, id: &str) -> RepoResult<BoardDetail> {
            let board = self.get_board(id).await?;
            let owner = sqlx::query_as::<_, UserSummaryRow>(
                "SELECT id, name, image FROM users WHERE id = $1",
            )
            .bind(&board.user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_err)?;
            let rows = sqlx::query_as::<_, PinMetaRow>(&format!(
                "{PIN_META_SELECT} WHERE p.board_id = $1 ORDER BY p.created_at DESC"
            ))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let pins: Vec<PinWithMeta> = rows.into_iter().map(Into::into).collect();
            let pins_count = pins.len() as i64;
            Ok(BoardDetail {
                user: owner.map(Into::into).unwrap_or_else(|| UserSummary {
                    id: board.user_id.clone(),
                    name: None,
                    image: None,
                }),
                board,
                pins,
                pins_count,
            })
        }

        async fn boards_by_user(&self, owner: &str) -> RepoResult<Vec<BoardWithCount>> {
            let rows = sqlx::query_as::<_, BoardCountRow>(
                "SELECT b.id, b.user_id, b.name, b.description, b.is_private, b.created_at,
                        (SELECT COUNT(*) FROM pins p WHERE p.board_id = b.id) AS pins_count
                 FROM boards b WHERE b.user_id = $1 ORDER BY b.created_at DESC",
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(rows.into_iter().map(Into::into).collect())
        }

        async fn update_board(&self, id: &str, upd: UpdateBoard) -> RepoResult<Board> {
            // read-modify-write keeps clear-vs-keep semantics out of SQL
            let current = self.get_board(id).await?;
            let name = upd.name.unwrap_or(current.name);
            let description = match upd.description {
                Some(d) => d,
                None => current.description,
            };
            let is_private = upd.is_private.unwrap_or(current.is_private);
            sqlx::query_as::<_, Board>(
                "UPDATE boards SET name = $2, description = $3, is_private = $4 WHERE id = $1
                 RETURNING id, user_id, name, description, is_private, created_at",
            )
            .bind(id)
            .bind(&name)
            .bind(&description)
            .bind(is_private)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_board(&self, id: &str) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            sqlx::query("UPDATE pins SET board_id = NULL WHERE board_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            let res = sqlx::query("DELETE FROM boards WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            tx.commit().await.map_err(map_err)?;
            Ok(())
        }
    }

    #[derive(sqlx::FromRow)]
    struct UserSummaryRow {
        id: String,
        name: Option<String>,
        image: Option<String>,
    }

    impl From<UserSummaryRow> for UserSummary {
        fn from(r: UserSummaryRow) -> Self {
            UserSummary { id: r.id, name: r.name, image: r.image }
        }
    }

    #[derive(sqlx::FromRow)]
    struct BoardCountRow {
        id: String,
        user_id: String,
        name: String,
        description: Option<String>,
        is_private: bool,
        created_at: DateTime<Utc>,
        pins_count: i64,
    }

    impl From<BoardCountRow> for BoardWithCount {
        fn from(r: BoardCountRow) -> Self {
            BoardWithCount {
                board: Board {
                    id: r.id,
                    user_id: r.user_id,
                    name: r.name,
                    description: r.description,
                    is_private: r.is_private,
                    created_at: r.created_at,
                },
                pins_count: r.pins_count,
            }
        }
    }

    #[async_trait]
    impl PinRepo for PgRepo {
        async fn create_pin(&self, owner: &str, new: NewPin) -> RepoResult<Pin> {
            sqlx::query_as::<_, Pin>(
                "INSERT INTO pins (id, user_id, title, description, image_url, link, tags, board_id)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                 RETURNING id, user_id, title, description, image_url, link, tags, board_id, created_at",
            )
            .bind(next_id())
            .bind(owner)
            .bind(&new.title)
            .bind(&new.description)
            .bind(&new.image_url)
            .bind(&new.link)
            .bind(&new.tags)
            .bind(&new.board_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn get_pin(&self, id: &str) -> RepoResult<Pin> {
            sqlx::query_as::<_, Pin>(
                "SELECT id, user_id, title, description, image_url, link, tags, board_id, created_at
                 FROM pins WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)
        }

        async fn delete_pin(&self, id: &str) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM pins WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn set_pin_board(&self, pin_id: &str, board_id: Option<&str>) -> RepoResult<PinWithMeta> {
            let res = sqlx::query("UPDATE pins SET board_id = $2 WHERE id = $1")
                .bind(pin_id)
                .bind(board_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            let row = sqlx::query_as::<_, PinMetaRow>(&format!("{PIN_META_SELECT} WHERE p.id = $1"))
                .bind(pin_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(row.into())
        }

        async fn recent_pins(&self, limit: i64) -> RepoResult<Vec<PinWithMeta>> {
            let rows = sqlx::query_as::<_, PinMetaRow>(&format!(
                "{PIN_META_SELECT} ORDER BY p.created_at DESC LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(rows.into_iter().map(Into::into).collect())
        }

        async fn pins_by_user(&self, user_id: &str, page: i64, limit: i64)
            -> RepoResult<(Vec<PinWithMeta>, i64)>
        {
            let rows = sqlx::query_as::<_, PinMetaRow>(&format!(
                "{PIN_META_SELECT} WHERE p.user_id = $1 ORDER BY p.created_at DESC LIMIT $2 OFFSET $3"
            ))
            .bind(user_id)
            .bind(limit)
            .bind((page - 1) * limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pins WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            Ok((rows.into_iter().map(Into::into).collect(), total.0))
        }

        async fn search_pins(&self, query: &str, page: i64, limit: i64)
            -> RepoResult<(Vec<PinWithMeta>, i64)>
        {
            let needle = query.trim().to_lowercase();
            let pattern = like_pattern(&needle);
            let rows = sqlx::query_as::<_, PinMetaRow>(&format!(
                "{PIN_META_SELECT} WHERE {SEARCH_PREDICATE} ORDER BY p.created_at DESC LIMIT $3 OFFSET $4"
            ))
            .bind(&pattern)
            .bind(&needle)
            .bind(limit)
            .bind((page - 1) * limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let total: (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM pins p WHERE {SEARCH_PREDICATE}"
            ))
            .bind(&pattern)
            .bind(&needle)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
            Ok((rows.into_iter().map(Into::into).collect(), total.0))
        }

        async fn pin_detail(&self, id: &str, viewer: Option<&str>) -> RepoResult<PinDetailView> {
            let row = sqlx::query_as::<_, PinMetaRow>(&format!("{PIN_META_SELECT} WHERE p.id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            let meta: PinWithMeta = row.into();
            let bio: Option<(Option<String>,)> =
                sqlx::query_as("SELECT bio FROM users WHERE id = $1")
                    .bind(&meta.pin.user_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_err)?;
            let comments = sqlx::query_as::<_, CommentRow>(&format!(
                "{COMMENT_SELECT} WHERE c.pin_id = $1 ORDER BY c.created_at DESC"
            ))
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            let is_liked = match viewer {
                Some(v) => {
                    let found: Option<(i32,)> = sqlx::query_as(
                        "SELECT 1 FROM likes WHERE pin_id = $1 AND user_id = $2",
                    )
                    .bind(id)
                    .bind(v)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_err)?;
                    found.is_some()
                }
                None => false,
            };
            let related = sqlx::query_as::<_, PinMetaRow>(&format!(
                "{PIN_META_SELECT} WHERE p.id <> $1 AND (p.user_id = $2 OR p.tags && $3)
                 ORDER BY p.created_at DESC LIMIT 20"
            ))
            .bind(id)
            .bind(&meta.pin.user_id)
            .bind(&meta.pin.tags)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(PinDetailView {
                user: AuthorDetail {
                    id: meta.pin.user_id.clone(),
                    name: meta.user.name.clone(),
                    image: meta.user.image.clone(),
                    bio: bio.and_then(|b| b.0),
                },
                board: meta.board,
                comments: comments.into_iter().map(Into::into).collect(),
                likes_count: meta.likes_count,
                comments_count: meta.comments_count,
                is_liked,
                related_pins: related.into_iter().map(Into::into).collect(),
                pin: meta.pin,
            })
        }
    }

    #[async_trait]
    impl LikeRepo for PgRepo {
        async fn create_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()> {
            // no pre-check: the unique index on (user_id, pin_id) is the
            // actual safety net, its violation becomes Conflict
            sqlx::query("INSERT INTO likes (id, user_id, pin_id) VALUES ($1,$2,$3)")
                .bind(next_id())
                .bind(user_id)
                .bind(pin_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        }

        async fn delete_like(&self, user_id: &str, pin_id: &str) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND pin_id = $2")
                .bind(user_id)
                .bind(pin_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn count_likes(&self, pin_id: &str) -> RepoResult<i64> {
            let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM likes WHERE pin_id = $1")
                .bind(pin_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(total.0)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, user_id: &str, pin_id: &str, text: &str)
            -> RepoResult<CommentWithAuthor>
        {
            let id = next_id();
            sqlx::query("INSERT INTO comments (id, user_id, pin_id, text) VALUES ($1,$2,$3,$4)")
                .bind(&id)
                .bind(user_id)
                .bind(pin_id)
                .bind(text)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            let row = sqlx::query_as::<_, CommentRow>(&format!("{COMMENT_SELECT} WHERE c.id = $1"))
                .bind(&id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(row.into())
        }

        async fn list_comments(&self, pin_id: &str) -> RepoResult<Vec<CommentWithAuthor>> {
            let rows = sqlx::query_as::<_, CommentRow>(&format!(
                "{COMMENT_SELECT} WHERE c.pin_id = $1 ORDER BY c.created_at DESC"
            ))
            .bind(pin_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(rows.into_iter().map(Into::into).collect())
        }
    }
}
