use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bd_client::{
    ApiClient, ClientConfig, ClientError, Credential, CredentialPair, CredentialSlot,
    CredentialStore, FileCredentialStore, LoginOutcome, MemoryCredentialStore, RefreshError,
};
use serde_json::{Value, json};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token(subject: &str, expires_in_secs: i64) -> Credential {
    let exp = chrono::Utc::now().timestamp() + expires_in_secs;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({ "id": subject, "email": format!("{subject}@example.com"), "role": "admin", "exp": exp })
            .to_string(),
    );
    Credential::new(format!("{header}.{payload}.sig"))
}

fn bearer(credential: &Credential) -> String {
    format!("Bearer {}", credential.as_str())
}

fn client_for(server: &MockServer, store: Arc<dyn CredentialStore>) -> ApiClient {
    let config = ClientConfig::new(server.uri().parse().unwrap());
    ApiClient::new(config, store).unwrap()
}

async fn mount_refresh(server: &MockServer, refresh: &Credential, issued: &Credential, times: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": refresh.as_str() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": issued.as_str() })))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_calls_with_expired_credential_refresh_once() {
    let server = MockServer::start().await;
    let refresh = token("u1", 86_400);
    let fresh = token("u1", 3600);
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        token("u1", -30),
        Some(refresh.clone()),
    )));

    mount_refresh(&server, &refresh, &fresh, 1).await;
    for (route, body) in [("/invoices", "A"), ("/quotations", "B"), ("/purchase-orders", "C")] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("Authorization", bearer(&fresh).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": body })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let client = client_for(&server, store.clone());
    let (a, b, c) = tokio::join!(
        client.get::<Value>("/invoices", &[]),
        client.get::<Value>("/quotations", &[]),
        client.get::<Value>("/purchase-orders", &[("status", "open")]),
    );

    assert_eq!(a.unwrap()["name"], "A");
    assert_eq!(b.unwrap()["name"], "B");
    assert_eq!(c.unwrap()["name"], "C");
    assert_eq!(client.coordinator().exchanges_started(), 1);

    let stored = store.load().await.unwrap();
    assert_eq!(stored.access, fresh);
    assert_eq!(stored.refresh, Some(refresh));
}

#[tokio::test]
async fn failed_refresh_fails_every_caller_and_keeps_credentials() {
    let server = MockServer::start().await;
    let before = CredentialPair::new(token("u1", -30), Some(token("u1", 86_400)));
    let store = Arc::new(MemoryCredentialStore::with_pair(before.clone()));

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "revoked" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    let results = tokio::join!(
        client.get::<Value>("/invoices", &[]),
        client.get::<Value>("/customers", &[]),
        client.get::<Value>("/products", &[]),
    );

    for result in [results.0, results.1, results.2] {
        assert!(matches!(
            result,
            Err(ClientError::RefreshExchangeFailed(RefreshError::Rejected { .. }))
        ));
    }
    assert_eq!(store.load().await, Some(before));
}

#[tokio::test]
async fn expired_refresh_credential_fails_without_network() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        token("u1", -30),
        Some(token("u1", -1)),
    )));

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, store);
    let results = tokio::join!(
        client.get::<Value>("/invoices", &[]),
        client.delete::<Value>("/invoices/4"),
    );

    assert!(matches!(results.0, Err(ClientError::NoValidCredentials)));
    assert!(matches!(results.1, Err(ClientError::NoValidCredentials)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn login_rejection_is_passed_straight_through() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        token("u1", 3600),
        Some(token("u1", 86_400)),
    )));

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "bad password" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, store);
    let result = client.login("ana@example.com", "wrong").await;

    assert!(matches!(
        result,
        Err(ClientError::AuthenticationRejected { .. })
    ));
}

#[tokio::test]
async fn rejected_call_is_retried_once_with_new_credential() {
    let server = MockServer::start().await;
    let revoked = token("u1", 3600);
    let refresh = token("u1", 86_400);
    let fresh = token("u1", 7200);
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        revoked.clone(),
        Some(refresh.clone()),
    )));

    mount_refresh(&server, &refresh, &fresh, 1).await;
    Mock::given(method("PUT"))
        .and(path("/company/settings"))
        .and(header("Authorization", bearer(&revoked).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/company/settings"))
        .and(header("Authorization", bearer(&fresh).as_str()))
        .and(body_json(json!({ "currency": "AED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "currency": "AED" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    let saved: Value = client
        .put("/company/settings", &json!({ "currency": "AED" }))
        .await
        .unwrap();

    assert_eq!(saved["currency"], "AED");
    assert_eq!(store.get(CredentialSlot::Access).await, Some(fresh));
}

#[tokio::test]
async fn second_rejection_is_not_retried() {
    let server = MockServer::start().await;
    let refresh = token("u1", 86_400);
    let fresh = token("u1", 7200);
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        token("u1", 3600),
        Some(refresh.clone()),
    )));

    mount_refresh(&server, &refresh, &fresh, 1).await;
    Mock::given(method("PATCH"))
        .and(path("/users/7/role"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, store);
    let result = client
        .patch::<_, Value>("/users/7/role", &json!({ "role": "viewer" }))
        .await;

    assert!(matches!(
        result,
        Err(ClientError::AuthenticationRejected { .. })
    ));
}

#[tokio::test]
async fn non_auth_errors_pass_through() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
        token("u1", 3600),
        None,
    )));

    Mock::given(method("POST"))
        .and(path("/invoices"))
        .respond_with(ResponseTemplate::new(422).set_body_string("customerId is required"))
        .mount(&server)
        .await;

    let client = client_for(&server, store);
    let result = client.post::<_, Value>("/invoices", &json!({})).await;

    match result {
        Err(ClientError::Http {
            status,
            message,
            body_snippet,
        }) => {
            assert_eq!(status.as_u16(), 422);
            assert_eq!(message, None);
            assert_eq!(body_snippet, "customerId is required");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn login_and_logout_manage_stored_credentials() {
    let server = MockServer::start().await;
    let access = token("u9", 3600);
    let refresh = token("u9", 86_400);
    let store = Arc::new(MemoryCredentialStore::new());

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "ana@example.com", "password": "s3cret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": access.as_str(),
            "refreshToken": refresh.as_str(),
            "user": { "id": "u9", "name": "Ana" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("Authorization", bearer(&access).as_str()))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    assert!(!client.is_authenticated().await);

    let outcome = client.login("ana@example.com", "s3cret").await.unwrap();
    assert_eq!(
        outcome,
        LoginOutcome::Authenticated {
            user: Some(json!({ "id": "u9", "name": "Ana" }))
        }
    );
    assert!(client.is_authenticated().await);
    let claims = client.current_claims().await.unwrap();
    assert_eq!(claims.subject_id.as_deref(), Some("u9"));
    assert!(claims.has_role(&["admin"]));

    // the server failing to close the session does not keep credentials around
    client.logout().await.unwrap();
    assert!(store.load().await.is_none());
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn two_factor_login_stores_after_verification() {
    let server = MockServer::start().await;
    let access = token("u2", 3600);
    let store = Arc::new(MemoryCredentialStore::new());

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "requires2FA": true,
            "twoFactorToken": "tf-1",
            "methods": ["totp"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/verify-2fa"))
        .and(body_json(json!({ "twoFactorToken": "tf-1", "code": "123456", "method": "totp" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": access.as_str(),
            "user": { "id": "u2" },
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, store.clone());
    let outcome = client.login("bo@example.com", "pw").await.unwrap();
    let LoginOutcome::TwoFactorRequired {
        two_factor_token,
        methods,
    } = outcome
    else {
        panic!("expected a two-factor challenge");
    };
    assert_eq!(methods, vec!["totp"]);
    assert!(store.load().await.is_none());

    let user = client
        .verify_two_factor(&two_factor_token, "123456", "totp")
        .await
        .unwrap();
    assert_eq!(user, Some(json!({ "id": "u2" })));
    assert_eq!(store.get(CredentialSlot::Access).await, Some(access));
    assert_eq!(store.get(CredentialSlot::Refresh).await, None);
}

#[tokio::test]
async fn refreshed_credentials_survive_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();
    let refresh = token("u1", 86_400);
    let fresh = token("u1", 3600);

    let store = FileCredentialStore::new(dir.path()).await.unwrap();
    store
        .replace(&CredentialPair::new(token("u1", -30), Some(refresh.clone())))
        .await
        .unwrap();

    mount_refresh(&server, &refresh, &fresh, 1).await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("Authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": { "id": "u1" } })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(store));
    let me: Value = client.get("/auth/me", &[]).await.unwrap();
    assert_eq!(me["user"]["id"], "u1");
    drop(client);

    // a new process reads the refreshed pair and needs no second exchange
    let reopened = FileCredentialStore::new(dir.path()).await.unwrap();
    let client = client_for(&server, Arc::new(reopened));
    let me: Value = client.get("/auth/me", &[]).await.unwrap();
    assert_eq!(me["user"]["id"], "u1");
    assert_eq!(client.coordinator().exchanges_started(), 0);
}
