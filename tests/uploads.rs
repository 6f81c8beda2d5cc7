#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::{test, App};
use async_trait::async_trait;
use pinboard::auth::create_jwt;
use pinboard::repo::inmem::InMemRepo;
use pinboard::routes::{config, AppState};
use pinboard::security::SecurityHeaders;
use pinboard::storage::{MediaAsset, MediaStore, MediaStoreError};
use serial_test::serial;
use sha2::{Digest, Sha256};

/// Records uploads so deletes can be checked against real state.
#[derive(Default)]
struct RecordingMediaStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl MediaStore for RecordingMediaStore {
    async fn upload(&self, bytes: &[u8], _mime: &str) -> Result<MediaAsset, MediaStoreError> {
        let hash = format!("{:x}", Sha256::digest(bytes));
        let key = format!("pins/{}/{}", &hash[0..2], hash);
        self.objects.lock().unwrap().insert(key.clone(), bytes.to_vec());
        Ok(MediaAsset { url: format!("http://media.local/{key}"), public_id: key })
    }

    async fn delete(&self, public_id: &str) -> Result<(), MediaStoreError> {
        match self.objects.lock().unwrap().remove(public_id) {
            Some(_) => Ok(()),
            None => Err(MediaStoreError::NotFound),
        }
    }
}

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("IDENTITY_WEBHOOK_SECRET", "whsec_dGVzdC1rZXk=");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("PINBOARD_DATA_DIR", tmp.path().to_str().unwrap());
}

fn token(user_id: &str) -> String {
    create_jwt(user_id).unwrap()
}

fn png_bytes() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A,
        0x00,0x00,0x00,0x0D, b'I', b'H', b'D', b'R',
        0x00,0x00,0x00,0x01, 0x00,0x00,0x00,0x01, 0x08, 0x06, 0x00,0x00,0x00, 0x1F,0x15,0xC4,0x89,
        0x00,0x00,0x00,0x0A, b'I', b'D', b'A', b'T', 0x78,0x9C, 0x63,0x00,0x01,0x00,0x00,0x05,0x00,0x01, 0x0D,0x0A,0x2D,0xB4,
        0x00,0x00,0x00,0x00, b'I', b'E', b'N', b'D', 0xAE,0x42,0x60,0x82,
    ]
}

fn multipart_body(boundary: &str, payload: &[u8]) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(format!("--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n", boundary).as_bytes());
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

macro_rules! app {
    ($media:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(actix_web::web::Data::new(AppState {
                    repo: Arc::new(InMemRepo::new()),
                    media: $media.clone(),
                }))
                .configure(config),
        )
        .await
    };
}

#[actix_web::test]
#[serial]
async fn upload_then_delete_roundtrip() {
    setup_env();
    let media: Arc<RecordingMediaStore> = Arc::new(RecordingMediaStore::default());
    let app = app!(media);

    let boundary = "BOUNDARYHASH";
    let req = test::TestRequest::post()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={}", boundary)))
        .set_payload(multipart_body(boundary, &png_bytes()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let uploaded: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(uploaded["success"], true);
    let public_id = uploaded["publicId"].as_str().unwrap().to_string();
    assert!(uploaded["url"].as_str().unwrap().ends_with(&public_id));
    assert!(media.objects.lock().unwrap().contains_key(&public_id));

    // delete the asset, then delete it again: the second is a 404
    let req = test::TestRequest::delete()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .set_json(&serde_json::json!({"publicId": public_id}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(media.objects.lock().unwrap().is_empty());

    let req = test::TestRequest::delete()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .set_json(&serde_json::json!({"publicId": public_id}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn upload_rejects_non_image_payloads() {
    setup_env();
    let media: Arc<RecordingMediaStore> = Arc::new(RecordingMediaStore::default());
    let app = app!(media);

    let boundary = "BOUNDARYTEXT";
    let req = test::TestRequest::post()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={}", boundary)))
        .set_payload(multipart_body(boundary, b"just some text, not an image"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert!(media.objects.lock().unwrap().is_empty());

    // anonymous uploads never reach validation
    let req = test::TestRequest::post()
        .uri("/api/v1/upload")
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={}", boundary)))
        .set_payload(multipart_body(boundary, &png_bytes()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    // missing publicId on delete
    let req = test::TestRequest::delete()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {}", token("alice"))))
        .set_json(&serde_json::json!({"publicId": ""}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
