//! Uploads, token refresh and provider error mapping.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::matchers::{any, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use capshare_common::{DestinationSettings, ErrorKind, ShareOptions};
use capshare_destinations::providers::imgbb::API_KEY;
use capshare_destinations::token::{ACCESS_TOKEN, EXPIRY, REFRESH_TOKEN};
use capshare_destinations::{DestinationKind, SettingsStore};

use crate::common::{self, RecordingOpener};

#[tokio::test]
async fn test_missing_token_fails_without_network() {
    let h = common::setup().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let err = h
        .registry
        .share(DestinationKind::Dropbox, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Destination);
    assert_eq!(err.destination_id(), Some("dropbox"));
    assert!(err.message().contains("Missing access token"));
}

#[tokio::test]
async fn test_expired_token_refreshes_once_before_upload() {
    let h = common::setup().await;
    let dropbox = DestinationKind::Dropbox.id();
    h.store.set(&dropbox, ACCESS_TOKEN, Some("stale".into()));
    h.store.set(&dropbox, REFRESH_TOKEN, Some("r1".into()));
    h.store.set(
        &dropbox,
        EXPIRY,
        Some((Utc::now() - Duration::minutes(5)).to_rfc3339().into()),
    );

    Mock::given(method("POST"))
        .and(path("/dropbox/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "token_type": "bearer",
            "expires_in": 14400
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/dropbox-content/2/files/upload"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "id:abc123",
            "name": "shot.png",
            "path_lower": "/shot.png"
        })))
        .expect(2)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/dropbox/2/sharing/create_shared_link_with_settings"))
        .and(body_string_contains("/shot.png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://www.dropbox.com/s/abc/shot.png?dl=0"
        })))
        .expect(2)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let options = ShareOptions::default();
    let first = h
        .registry
        .share(DestinationKind::Dropbox, &file, &options, h.store.as_ref())
        .await
        .unwrap();
    h.registry
        .share(DestinationKind::Dropbox, &file, &options, h.store.as_ref())
        .await
        .unwrap();

    assert_eq!(first.link, "https://www.dropbox.com/s/abc/shot.png?dl=0");
    assert_eq!(first.share_id, "id:abc123");
    assert_eq!(first.destination_id, dropbox);
    assert_eq!(first.dimensions, file.dimensions);
    assert!(!first.anon);

    let settings = h.store.get(&dropbox);
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("fresh"));
    assert_eq!(settings.get_str(REFRESH_TOKEN), Some("r1"));
    let expiry = DateTime::parse_from_rfc3339(settings.get_str(EXPIRY).unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert!(expiry > Utc::now() + Duration::hours(3));
}

#[tokio::test]
async fn test_dropbox_reuses_existing_shared_link() {
    let h = common::setup().await;
    h.store.set_all(
        DestinationKind::Dropbox,
        common::token_settings("a", "r", Duration::hours(1)),
    );

    Mock::given(method("POST"))
        .and(path("/dropbox-content/2/files/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "id:1",
            "path_lower": "/shot.png"
        })))
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/dropbox/2/sharing/create_shared_link_with_settings"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error_summary": "shared_link_already_exists/..",
            "error": {
                ".tag": "shared_link_already_exists",
                "shared_link_already_exists": {
                    "metadata": { "url": "https://www.dropbox.com/s/old/shot.png?dl=0" }
                }
            }
        })))
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::Dropbox, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();

    assert_eq!(share.link, "https://www.dropbox.com/s/old/shot.png?dl=0");
}

#[tokio::test]
async fn test_rejected_refresh_asks_for_login() {
    let h = common::setup().await;
    h.store.set_all(
        DestinationKind::OneDrive,
        common::token_settings("a", "revoked", Duration::minutes(-1)),
    );

    Mock::given(method("POST"))
        .and(path("/onedrive/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "The refresh token has expired"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let err = h
        .registry
        .share(DestinationKind::OneDrive, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Destination);
    assert!(err.message().contains("log in again"));
    assert_eq!(
        h.store.get(&DestinationKind::OneDrive.id()).get_str(ACCESS_TOKEN),
        Some("a")
    );
}

#[tokio::test]
async fn test_onedrive_refresh_rotates_refresh_token() {
    let h = common::setup().await;
    h.store.set_all(
        DestinationKind::OneDrive,
        common::token_settings("old", "r1", Duration::zero()),
    );

    Mock::given(method("POST"))
        .and(path("/onedrive/token"))
        .and(body_string_contains("client_id=graph-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new",
            "refresh_token": "r2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/graph/me/drive/special/approot:/shot.png:/content"))
        .and(header("authorization", "Bearer new"))
        .and(header("content-type", "image/png"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "item-1",
            "name": "shot.png"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graph/me/drive/items/item-1/createLink"))
        .and(body_string_contains("anonymous"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "link": { "type": "view", "webUrl": "https://1drv.ms/i/s!abc" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::OneDrive, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();

    assert_eq!(share.link, "https://1drv.ms/i/s!abc");
    assert_eq!(share.share_id, "item-1");
    let settings = h.store.get(&DestinationKind::OneDrive.id());
    assert_eq!(settings.get_str(REFRESH_TOKEN), Some("r2"));
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("new"));
}

#[tokio::test]
async fn test_imgur_anonymous_upload_and_delete() {
    let h = common::setup().await;

    Mock::given(method("POST"))
        .and(path("/imgur/3/image"))
        .and(header("authorization", "Client-ID imgur-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "AbC",
                "link": "https://i.imgur.com/AbC.png",
                "deletehash": "del123"
            },
            "success": true,
            "status": 200
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/imgur/3/image/del123"))
        .and(header("authorization", "Client-ID imgur-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": true, "success": true, "status": 200
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let options = ShareOptions {
        title: Some("Bug report".to_string()),
        description: None,
    };
    let share = h
        .registry
        .share(DestinationKind::Imgur, &file, &options, h.store.as_ref())
        .await
        .unwrap();

    assert!(share.anon);
    assert_eq!(share.link, "https://i.imgur.com/AbC.png");
    assert_eq!(share.delete_id.as_deref(), Some("del123"));

    h.registry
        .delete(&share, h.store.as_ref(), &RecordingOpener::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_imgur_logged_in_upload_uses_bearer() {
    let h = common::setup().await;
    h.store.set_all(
        DestinationKind::Imgur,
        common::token_settings("imgur-token", "r", Duration::days(10)),
    );

    Mock::given(method("POST"))
        .and(path("/imgur/3/image"))
        .and(header("authorization", "Bearer imgur-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": "X", "link": "https://i.imgur.com/X.png", "deletehash": "d" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::Imgur, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();

    assert!(!share.anon);
}

#[tokio::test]
async fn test_imgur_refresh_applies_fixed_lifetime() {
    let h = common::setup().await;
    h.store.set_all(
        DestinationKind::Imgur,
        common::token_settings("stale", "imgur-refresh", Duration::minutes(-1)),
    );

    Mock::given(method("POST"))
        .and(path("/imgur/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=imgur-refresh"))
        .and(body_string_contains("client_secret=imgur-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "imgur-fresh",
            "refresh_token": "imgur-refresh",
            "token_type": "bearer",
            "expires_in": 3600,
            "account_username": "shooter"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imgur/3/image"))
        .and(header("authorization", "Bearer imgur-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": "Y", "link": "https://i.imgur.com/Y.png", "deletehash": "e" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::Imgur, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();
    assert!(!share.anon);

    // The declared hour is ignored in favour of the fixed 30 days.
    let settings = h.store.get(&DestinationKind::Imgur.id());
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("imgur-fresh"));
    let expiry = DateTime::parse_from_rfc3339(settings.get_str(EXPIRY).unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert!(expiry > Utc::now() + Duration::days(29));
    assert!(expiry < Utc::now() + Duration::days(31));
}

#[tokio::test]
async fn test_gyazo_upload() {
    let h = common::setup().await;
    h.store.set(
        &DestinationKind::Gyazo.id(),
        ACCESS_TOKEN,
        Some("gyazo-token".into()),
    );

    Mock::given(method("POST"))
        .and(path("/gyazo-upload/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "image_id": "g1",
            "permalink_url": "https://gyazo.com/g1",
            "url": "https://i.gyazo.com/g1.png",
            "type": "png"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::Gyazo, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();

    assert_eq!(share.link, "https://gyazo.com/g1");
    assert_eq!(share.share_id, "g1");
}

#[tokio::test]
async fn test_imgbb_upload_sends_api_key() {
    let h = common::setup().await;
    h.store.set(&DestinationKind::ImgBB.id(), API_KEY, Some("k3y".into()));

    Mock::given(method("POST"))
        .and(path("/imgbb/1/upload"))
        .and(query_param("key", "k3y"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "bb1",
                "url_viewer": "https://ibb.co/bb1",
                "url": "https://i.ibb.co/bb1/shot.png",
                "delete_url": "https://ibb.co/bb1/deadbeef"
            },
            "success": true,
            "status": 200
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let share = h
        .registry
        .share(DestinationKind::ImgBB, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap();

    assert_eq!(share.link, "https://ibb.co/bb1");
    assert_eq!(share.delete_id.as_deref(), Some("https://ibb.co/bb1/deadbeef"));
    assert!(!share.anon);
}

#[tokio::test]
async fn test_upload_failures_map_to_kinds() {
    let h = common::setup().await;
    h.store.set(&DestinationKind::Gyazo.id(), ACCESS_TOKEN, Some("t".into()));
    h.store.set(&DestinationKind::ImgBB.id(), API_KEY, Some("k".into()));

    Mock::given(method("POST"))
        .and(path("/gyazo-upload/api/upload"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/imgbb/1/upload"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&h.server)
        .await;

    let file = common::capture(h.dir.path(), "shot.png");
    let options = ShareOptions::default();

    let err = h
        .registry
        .share(DestinationKind::Gyazo, &file, &options, h.store.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Destination);

    let err = h
        .registry
        .share(DestinationKind::ImgBB, &file, &options, h.store.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::User);
}

#[tokio::test]
async fn test_unreadable_file_is_user_error() {
    let h = common::setup().await;
    h.store.set(&DestinationKind::ImgBB.id(), API_KEY, Some("k".into()));

    let mut file = common::capture(h.dir.path(), "shot.png");
    file.path = h.dir.path().join("missing.png");

    let err = h
        .registry
        .share(DestinationKind::ImgBB, &file, &ShareOptions::default(), h.store.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::User);
}

trait SetAll {
    fn set_all(&self, kind: DestinationKind, settings: DestinationSettings);
}

impl<S: SettingsStore> SetAll for S {
    fn set_all(&self, kind: DestinationKind, settings: DestinationSettings) {
        for (key, value) in settings.iter() {
            self.set(&kind.id(), key, Some(value.clone()));
        }
    }
}
