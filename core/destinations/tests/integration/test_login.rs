//! Logins routed from redirect URLs through to persisted tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

use capshare_common::ErrorKind;
use capshare_destinations::config::DEFAULT_REDIRECT_BASE;
use capshare_destinations::token::{ACCESS_TOKEN, ACCOUNT_ID, EXPIRY, REFRESH_TOKEN, USERNAME};
use capshare_destinations::{DestinationKind, OAuthCallbackRouter, SettingsStore};

use crate::common::{self, CollectingSink, Harness, RecordingOpener};

fn router(h: &Harness, sink: Arc<CollectingSink>) -> OAuthCallbackRouter {
    OAuthCallbackRouter::new(
        h.registry.clone(),
        h.store.clone(),
        sink,
        DEFAULT_REDIRECT_BASE,
    )
}

async fn mount_dropbox_account(h: &Harness) {
    Mock::given(method("POST"))
        .and(path("/dropbox/2/users/get_current_account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "account_id": "dbid:42",
            "name": { "display_name": "Shooter" },
            "email": "shooter@example.com"
        })))
        .mount(&h.server)
        .await;
}

#[tokio::test]
async fn test_dropbox_login_through_router() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());
    let opener = RecordingOpener::default();

    Mock::given(method("POST"))
        .and(path("/dropbox/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=c0de"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_id=dropbox-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "db-access",
            "refresh_token": "db-refresh",
            "expires_in": 14400,
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_dropbox_account(&h).await;

    h.registry
        .begin_login(DestinationKind::Dropbox, &opener)
        .await
        .unwrap();
    assert!(h.registry.auth_pending(DestinationKind::Dropbox).await);

    {
        let opened = opener.opened.lock().unwrap();
        let pairs: std::collections::HashMap<_, _> =
            opened[0].query_pairs().into_owned().collect();
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["token_access_type"], "offline");
        assert_eq!(pairs["redirect_uri"], "capshare://oauth/dropbox");
    }

    let state = opener.last_state();
    let completed = router
        .deliver(&format!("capshare://oauth/dropbox?code=c0de&state={}", state))
        .await;

    assert_eq!(completed, Some(DestinationKind::Dropbox));
    assert!(sink.errors.lock().unwrap().is_empty());
    assert!(!h.registry.auth_pending(DestinationKind::Dropbox).await);

    let settings = h.store.get(&DestinationKind::Dropbox.id());
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("db-access"));
    assert_eq!(settings.get_str(REFRESH_TOKEN), Some("db-refresh"));
    assert_eq!(settings.get_str(ACCOUNT_ID), Some("dbid:42"));
    assert_eq!(settings.get_str(USERNAME), Some("Shooter"));
    let expiry = DateTime::parse_from_rfc3339(settings.get_str(EXPIRY).unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert!(expiry > Utc::now() + Duration::hours(3));

    let available = h.registry.list_available(false, h.store.as_ref());
    assert!(available.contains(&DestinationKind::Dropbox));
}

#[tokio::test]
async fn test_second_login_invalidates_first_callback() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());
    let opener = RecordingOpener::default();

    Mock::given(method("POST"))
        .and(path("/dropbox/oauth2/token"))
        .and(body_string_contains("code=first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "wrong",
            "refresh_token": "wrong",
            "token_type": "bearer"
        })))
        .expect(0)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dropbox/oauth2/token"))
        .and(body_string_contains("code=second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "right",
            "refresh_token": "right-refresh",
            "token_type": "bearer",
            "expires_in": 14400
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_dropbox_account(&h).await;

    h.registry
        .begin_login(DestinationKind::Dropbox, &opener)
        .await
        .unwrap();
    let first_state = opener.last_state();
    h.registry
        .begin_login(DestinationKind::Dropbox, &opener)
        .await
        .unwrap();
    let second_state = opener.last_state();
    assert_ne!(first_state, second_state);

    // The stale callback consumes the pending state and fails.
    let completed = router
        .deliver(&format!(
            "capshare://oauth/dropbox?code=first&state={}",
            first_state
        ))
        .await;
    assert_eq!(completed, None);
    {
        let errors = sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Destination);
        assert_eq!(errors[0].destination_id(), Some("dropbox"));
    }
    assert!(!h.registry.auth_pending(DestinationKind::Dropbox).await);

    h.registry
        .begin_login(DestinationKind::Dropbox, &opener)
        .await
        .unwrap();
    let third_state = opener.last_state();
    let completed = router
        .deliver(&format!(
            "capshare://oauth/dropbox?code=second&state={}",
            third_state
        ))
        .await;

    assert_eq!(completed, Some(DestinationKind::Dropbox));
    assert_eq!(
        h.store.get(&DestinationKind::Dropbox.id()).get_str(ACCESS_TOKEN),
        Some("right")
    );
}

#[tokio::test]
async fn test_callback_without_login_is_rejected() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());

    let completed = router
        .deliver("capshare://oauth/onedrive?code=abc&state=made-up")
        .await;

    assert_eq!(completed, None);
    let errors = sink.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Destination);
    assert!(h.store.get(&DestinationKind::OneDrive.id()).is_empty());
}

#[tokio::test]
async fn test_provider_denial_is_reported() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());
    let opener = RecordingOpener::default();

    h.registry
        .begin_login(DestinationKind::OneDrive, &opener)
        .await
        .unwrap();
    let state = opener.last_state();

    let completed = router
        .deliver(&format!(
            "capshare://oauth/onedrive?error=access_denied&error_description=User+declined&state={}",
            state
        ))
        .await;

    assert_eq!(completed, None);
    let errors = sink.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message().contains("User declined"));
    assert!(!h.registry.auth_pending(DestinationKind::OneDrive).await);
}

#[tokio::test]
async fn test_unknown_destination_redirect_is_host_error() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());

    assert_eq!(
        router.deliver("capshare://oauth/flickr?code=x&state=y").await,
        None
    );
    assert_eq!(sink.errors.lock().unwrap()[0].kind(), ErrorKind::Host);
}

#[tokio::test]
async fn test_imgur_implicit_login_from_fragment() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());
    let opener = RecordingOpener::default();

    h.registry
        .begin_login(DestinationKind::Imgur, &opener)
        .await
        .unwrap();
    let state = opener.last_state();

    let redirect = format!(
        "capshare://oauth/imgur#access_token=imgur-access&expires_in=315360000\
         &token_type=bearer&refresh_token=imgur-refresh&account_username=shooter\
         &account_id=777&state={}",
        state
    );
    assert_eq!(router.deliver(&redirect).await, Some(DestinationKind::Imgur));

    let settings = h.store.get(&DestinationKind::Imgur.id());
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("imgur-access"));
    assert_eq!(settings.get_str(REFRESH_TOKEN), Some("imgur-refresh"));
    assert_eq!(settings.get_str(USERNAME), Some("shooter"));
    assert_eq!(settings.get_str(ACCOUNT_ID), Some("777"));

    // The declared lifetime is ignored in favour of a fixed 30 days.
    let expiry = DateTime::parse_from_rfc3339(settings.get_str(EXPIRY).unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert!(expiry < Utc::now() + Duration::days(31));
    assert!(expiry > Utc::now() + Duration::days(29));
}

#[tokio::test]
async fn test_gyazo_login_sends_secret_and_replaces_tokens() {
    let h = common::setup().await;
    let sink = Arc::new(CollectingSink::default());
    let router = router(&h, sink.clone());
    let opener = RecordingOpener::default();

    // Left over from an earlier login.
    let gyazo = DestinationKind::Gyazo.id();
    h.store.set(&gyazo, REFRESH_TOKEN, Some("stale-refresh".into()));
    h.store.set(&gyazo, EXPIRY, Some("2030-01-01T00:00:00+00:00".into()));

    Mock::given(method("POST"))
        .and(path("/gyazo/oauth/token"))
        .and(body_string_contains("client_secret=gyazo-secret"))
        .and(body_string_contains("code=gy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gyazo-access",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gyazo/api/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": { "name": "gyazo-user", "uid": "u1", "email": "g@example.com" }
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.registry
        .begin_login(DestinationKind::Gyazo, &opener)
        .await
        .unwrap();
    let state = opener.last_state();
    let completed = router
        .deliver(&format!("capshare://oauth/gyazo?code=gy&state={}", state))
        .await;

    assert_eq!(completed, Some(DestinationKind::Gyazo));
    let settings = h.store.get(&DestinationKind::Gyazo.id());
    assert_eq!(settings.get_str(ACCESS_TOKEN), Some("gyazo-access"));
    assert_eq!(settings.get_str(USERNAME), Some("gyazo-user"));
    assert_eq!(settings.get_str(REFRESH_TOKEN), None);
    assert_eq!(settings.get_str(EXPIRY), None);
}

#[tokio::test]
async fn test_logout_clears_tokens() {
    let h = common::setup().await;
    let dropbox = DestinationKind::Dropbox.id();
    for (key, value) in common::token_settings("a", "r", Duration::hours(1)).iter() {
        h.store.set(&dropbox, key, Some(value.clone()));
    }
    h.store.set(&dropbox, USERNAME, Some("Shooter".into()));

    h.registry
        .logout(DestinationKind::Dropbox, h.store.as_ref())
        .await;

    assert!(h.store.get(&dropbox).is_empty());
    let available = h.registry.list_available(false, h.store.as_ref());
    assert!(!available.contains(&DestinationKind::Dropbox));
}
