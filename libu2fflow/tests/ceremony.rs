use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use libu2fflow::device::{DeviceBackend, SoftToken, UserPresence};
use libu2fflow::flow::{ALREADY_REGISTERED, NOT_REGISTERED};
use libu2fflow::{ClientConfig, ErrorKind, ServiceState, U2fClient};

fn config(server: &ServerGuard, username: &str) -> ClientConfig {
    ClientConfig {
        server_url: server.url(),
        username: username.to_owned(),
        allow_insecure: true,
        ..ClientConfig::default()
    }
}

fn user(username: &str) -> Matcher {
    Matcher::UrlEncoded("username".into(), username.into())
}

fn connect(server: &ServerGuard, username: &str, token: &SoftToken) -> U2fClient {
    let device: Arc<dyn DeviceBackend> = Arc::new(token.clone());
    U2fClient::new(&config(server, username), device).unwrap()
}

async fn mock_enroll(
    server: &mut ServerGuard,
    username: &str,
    registered: Vec<String>,
) -> mockito::Mock {
    let registered_keys: Vec<_> = registered
        .into_iter()
        .map(|kh| json!({"version": "U2F_V2", "keyHandle": kh}))
        .collect();
    let body = json!({
        "appId": server.url(),
        "registerRequests": [{"version": "U2F_V2", "challenge": "Y2hhbGxlbmdl"}],
        "registeredKeys": registered_keys,
    });
    server
        .mock("GET", "/enroll")
        .match_query(user(username))
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn register_then_sign_with_soft_token() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new().unwrap();
    let client = connect(&server, "testuser", &token);

    let enroll = mock_enroll(&mut server, "testuser", vec![]).await;
    let bind = server
        .mock("POST", "/bind")
        .match_query(user("testuser"))
        .match_body(Matcher::PartialJson(json!({"version": "U2F_V2"})))
        .with_status(200)
        .with_body("true")
        .create_async()
        .await;

    let confirmation = client.register_device().await.unwrap();
    assert_eq!(confirmation, json!(true));
    enroll.assert_async().await;
    bind.assert_async().await;

    let key_handles = token.key_handles();
    assert_eq!(key_handles.len(), 1);
    let key_handle = key_handles[0].clone();

    let sign = server
        .mock("POST", "/sign")
        .match_query(user("testuser"))
        .match_body("transfer 10 EUR")
        .with_status(200)
        .with_body(
            json!({
                "appId": server.url(),
                "challenge": "c2lnbg",
                "registeredKeys": [{"version": "U2F_V2", "keyHandle": key_handle}],
            })
            .to_string(),
        )
        .create_async()
        .await;
    let verify = server
        .mock("POST", "/verify")
        .match_query(user("testuser"))
        .match_body(Matcher::PartialJson(json!({"keyHandle": key_handle})))
        .with_status(200)
        .with_body(json!({"keyHandle": key_handle, "touch": 1, "counter": 1}).to_string())
        .create_async()
        .await;

    let verified = client
        .sign_data(Some("transfer 10 EUR".to_owned()))
        .await
        .unwrap();
    assert_eq!(verified.key_handle, key_handle);
    assert_eq!(verified.counter, 1);
    sign.assert_async().await;
    verify.assert_async().await;
    assert_eq!(client.unlock().state(), ServiceState::Idle);
}

#[tokio::test]
async fn registering_a_known_token_is_refused() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new().unwrap();

    let _alice_enroll = mock_enroll(&mut server, "alice", vec![]).await;
    let _alice_bind = server
        .mock("POST", "/bind")
        .match_query(user("alice"))
        .with_status(200)
        .with_body("true")
        .create_async()
        .await;
    connect(&server, "alice", &token).register_device().await.unwrap();

    let _bob_enroll = mock_enroll(&mut server, "bob", token.key_handles()).await;
    let bob_bind = server
        .mock("POST", "/bind")
        .match_query(user("bob"))
        .expect(0)
        .create_async()
        .await;
    let error = connect(&server, "bob", &token)
        .register_device()
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeviceIneligible);
    assert_eq!(error.to_string(), ALREADY_REGISTERED);
    bob_bind.assert_async().await;
}

#[tokio::test]
async fn signing_with_unregistered_token_never_verifies() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new().unwrap();
    let client = connect(&server, "testuser", &token);

    let _sign = server
        .mock("POST", "/sign")
        .match_query(user("testuser"))
        .with_status(200)
        .with_body(
            json!({
                "appId": server.url(),
                "challenge": "c2lnbg",
                "registeredKeys": [{"version": "U2F_V2", "keyHandle": "c29tZW9uZS1lbHNl"}],
            })
            .to_string(),
        )
        .create_async()
        .await;
    let verify = server
        .mock("POST", "/verify")
        .expect(0)
        .create_async()
        .await;

    let error = client.sign_data(None).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeviceIneligible);
    assert_eq!(error.to_string(), NOT_REGISTERED);
    verify.assert_async().await;
}

#[tokio::test]
async fn relying_party_errors_surface_as_transport_errors() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new().unwrap();
    let client = connect(&server, "testuser", &token);

    let _enroll = server
        .mock("GET", "/enroll")
        .match_query(user("testuser"))
        .with_status(500)
        .with_body("database unavailable")
        .create_async()
        .await;

    let error = client.register_device().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(token.credential_count(), 0);
}

#[tokio::test]
async fn restarting_registration_cancels_the_first_attempt() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new()
        .unwrap()
        .with_presence(UserPresence::After(Duration::from_millis(200)));
    let client = connect(&server, "testuser", &token);

    let enroll = server
        .mock("GET", "/enroll")
        .match_query(user("testuser"))
        .with_status(200)
        .with_body(
            json!({
                "appId": server.url(),
                "registerRequests": [{"version": "U2F_V2", "challenge": "Y2hhbGxlbmdl"}],
                "registeredKeys": [],
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let first = client.registration().start(());
    let second = client.registration().start(());
    assert_eq!(client.registration().state(), ServiceState::Running);

    let (first, second) = tokio::join!(first, second);
    assert!(first.unwrap_err().is_cancelled());
    let response: serde_json::Value = serde_json::from_str(&second.unwrap()).unwrap();
    assert_eq!(response["version"], "U2F_V2");
    assert_eq!(client.registration().state(), ServiceState::Idle);
    enroll.assert_async().await;
}

#[tokio::test]
async fn cancel_stops_a_pending_unlock() {
    let mut server = Server::new_async().await;
    let token = SoftToken::new()
        .unwrap()
        .with_presence(UserPresence::After(Duration::from_millis(200)));
    let client = connect(&server, "testuser", &token);

    let _sign = server
        .mock("POST", "/sign")
        .match_query(user("testuser"))
        .with_status(200)
        .with_body(
            json!({
                "appId": server.url(),
                "challenge": "c2lnbg",
                "registeredKeys": [],
            })
            .to_string(),
        )
        .create_async()
        .await;

    let pending = client.unlock().start();
    client.cancel();
    assert_eq!(client.unlock().state(), ServiceState::Idle);
    let error = pending.await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
}
