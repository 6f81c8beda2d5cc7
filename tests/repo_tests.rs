#![cfg(feature = "inmem-store")]

use pinboard::models::{NewBoard, NewPin, NewUser, UpdateBoard, UserUpdate};
use pinboard::repo::{inmem::InMemRepo, RepoError};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use pinboard::repo::{BoardRepo, CommentRepo, LikeRepo, PinRepo, UserRepo};

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    // isolate state: do **not** persist to the default file path
    std::env::set_var("PINBOARD_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

async fn seed_user(r: &InMemRepo, id: &str) {
    r.create_user(NewUser {
        id: id.into(),
        email: format!("{id}@example.com"),
        name: Some(id.to_string()),
        image: None,
    })
    .await
    .unwrap();
}

fn pin_input(title: &str, tags: &[&str]) -> NewPin {
    NewPin {
        title: title.into(),
        description: None,
        image_url: format!("https://media.local/{title}.png"),
        link: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        board_id: None,
    }
}

#[tokio::test]
async fn board_crud_and_partial_update() {
    let r = repo();
    seed_user(&r, "alice").await;

    let b = r
        .create_board(
            "alice",
            NewBoard {
                name: "Travel".into(),
                description: Some("places to go".into()),
                is_private: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(b.user_id, "alice");
    assert!(!b.is_private);

    // rename only: description untouched
    let updated = r
        .update_board(&b.id, UpdateBoard { name: Some("Trips".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(updated.name, "Trips");
    assert_eq!(updated.description.as_deref(), Some("places to go"));

    // explicit clear
    let updated = r
        .update_board(&b.id, UpdateBoard { description: Some(None), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(updated.description, None);

    // privacy toggle
    let updated = r
        .update_board(&b.id, UpdateBoard { is_private: Some(true), ..Default::default() })
        .await
        .unwrap();
    assert!(updated.is_private);

    let err = r.update_board("no-such-board", UpdateBoard::default()).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn deleting_board_detaches_pins() {
    let r = repo();
    seed_user(&r, "alice").await;

    let board = r
        .create_board("alice", NewBoard { name: "Food".into(), description: None, is_private: None })
        .await
        .unwrap();
    let pin = r.create_pin("alice", pin_input("ramen", &["food"])).await.unwrap();
    r.set_pin_board(&pin.id, Some(&board.id)).await.unwrap();

    r.delete_board(&board.id).await.unwrap();

    // the pin survives, only its board reference is gone
    let refetched = r.get_pin(&pin.id).await.unwrap();
    assert_eq!(refetched.board_id, None);
    assert!(matches!(r.get_board(&board.id).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn like_uniqueness_per_user_pin_pair() {
    let r = repo();
    seed_user(&r, "alice").await;
    seed_user(&r, "bob").await;
    let pin = r.create_pin("alice", pin_input("sunset", &[])).await.unwrap();

    r.create_like("bob", &pin.id).await.unwrap();
    let err = r.create_like("bob", &pin.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
    // exactly one like despite the second attempt
    assert_eq!(r.count_likes(&pin.id).await.unwrap(), 1);

    // a different user is a different pair
    r.create_like("alice", &pin.id).await.unwrap();
    assert_eq!(r.count_likes(&pin.id).await.unwrap(), 2);

    r.delete_like("bob", &pin.id).await.unwrap();
    assert_eq!(r.count_likes(&pin.id).await.unwrap(), 1);
    let err = r.delete_like("bob", &pin.id).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    let err = r.create_like("bob", "no-such-pin").await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn comments_are_listed_newest_first() {
    let r = repo();
    seed_user(&r, "alice").await;
    let pin = r.create_pin("alice", pin_input("plants", &[])).await.unwrap();

    let err = r.create_comment("alice", "no-such-pin", "hi").await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    r.create_comment("alice", &pin.id, "first").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    r.create_comment("alice", &pin.id, "second").await.unwrap();

    let comments = r.list_comments(&pin.id).await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].comment.text, "second");
    assert_eq!(comments[1].comment.text, "first");
    assert_eq!(comments[0].user.id, "alice");
}

#[tokio::test]
async fn search_matches_title_description_and_tags() {
    let r = repo();
    seed_user(&r, "alice").await;

    r.create_pin("alice", pin_input("My cat", &[])).await.unwrap();
    let mut descr = pin_input("Sofa", &[]);
    descr.description = Some("a CAT sleeping".into());
    r.create_pin("alice", descr).await.unwrap();
    r.create_pin("alice", pin_input("Garden", &["cat", "green"])).await.unwrap();
    r.create_pin("alice", pin_input("Dog", &["dog"])).await.unwrap();
    // substring of a tag is not membership
    r.create_pin("alice", pin_input("Machine", &["catalog"])).await.unwrap();

    let (pins, total) = r.search_pins("CaT", 1, 20).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(pins.len(), 3);
    // newest-first
    for w in pins.windows(2) {
        assert!(w[0].pin.created_at >= w[1].pin.created_at);
    }

    // page past the end: empty rows, same total
    let (pins, total) = r.search_pins("cat", 2, 20).await.unwrap();
    assert_eq!(total, 3);
    assert!(pins.is_empty());
}

#[tokio::test]
async fn user_lifecycle_mirroring_and_cascade() {
    let r = repo();
    seed_user(&r, "alice").await;
    seed_user(&r, "bob").await;

    // duplicate provider event
    let err = r
        .create_user(NewUser { id: "alice".into(), email: "x@example.com".into(), name: None, image: None })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let updated = r
        .update_user(
            "alice",
            UserUpdate { email: "new@example.com".into(), name: Some("Alice".into()), image: None },
        )
        .await
        .unwrap();
    assert_eq!(updated.email, "new@example.com");

    // alice owns a board holding one of bob's pins
    let board = r
        .create_board("alice", NewBoard { name: "Shared".into(), description: None, is_private: None })
        .await
        .unwrap();
    let bobs_pin = r.create_pin("bob", pin_input("bobs", &[])).await.unwrap();
    r.set_pin_board(&bobs_pin.id, Some(&board.id)).await.unwrap();
    let alices_pin = r.create_pin("alice", pin_input("alices", &[])).await.unwrap();
    r.create_like("bob", &alices_pin.id).await.unwrap();
    r.create_comment("alice", &bobs_pin.id, "nice").await.unwrap();

    r.delete_user("alice").await.unwrap();

    assert!(matches!(r.get_user("alice").await.unwrap_err(), RepoError::NotFound));
    // alice's content is gone
    assert!(matches!(r.get_pin(&alices_pin.id).await.unwrap_err(), RepoError::NotFound));
    assert!(matches!(r.get_board(&board.id).await.unwrap_err(), RepoError::NotFound));
    // bob's pin survives, detached from the deleted board
    let bobs = r.get_pin(&bobs_pin.id).await.unwrap();
    assert_eq!(bobs.board_id, None);
    // alice's comment on bob's pin is gone too
    assert!(r.list_comments(&bobs_pin.id).await.unwrap().is_empty());

    assert!(matches!(r.delete_user("alice").await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn pin_detail_read_model() {
    let r = repo();
    seed_user(&r, "alice").await;
    seed_user(&r, "bob").await;

    let pin = r.create_pin("alice", pin_input("lake", &["nature"])).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let related_by_tag = r.create_pin("bob", pin_input("forest", &["nature"])).await.unwrap();
    let related_by_author = r.create_pin("alice", pin_input("city", &["urban"])).await.unwrap();
    r.create_pin("bob", pin_input("unrelated", &["food"])).await.unwrap();
    r.create_like("bob", &pin.id).await.unwrap();
    r.create_comment("bob", &pin.id, "great shot").await.unwrap();

    let detail = r.pin_detail(&pin.id, Some("bob")).await.unwrap();
    assert_eq!(detail.likes_count, 1);
    assert_eq!(detail.comments_count, 1);
    assert!(detail.is_liked);
    assert_eq!(detail.user.id, "alice");
    let related_ids: Vec<&str> = detail.related_pins.iter().map(|p| p.pin.id.as_str()).collect();
    assert!(related_ids.contains(&related_by_tag.id.as_str()));
    assert!(related_ids.contains(&related_by_author.id.as_str()));
    assert_eq!(related_ids.len(), 2);

    let anon = r.pin_detail(&pin.id, None).await.unwrap();
    assert!(!anon.is_liked);
}
