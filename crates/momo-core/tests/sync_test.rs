#![allow(clippy::unwrap_used)]

// Controller-level flows: push events reconciled into the store, fenced
// REST loads against wiremock, and the offline cache across restarts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use momo_api::{Command, Frame};
use momo_core::model::{ASSIGNMENTS_DESTINATION, MESSAGES_DESTINATION, REQUESTS_DESTINATION};
use momo_core::{
    Connector, Controller, CoreError, Link, LinkEvent, LinkPeer, RecordId, RequestStatus,
    SessionState, SyncConfig, UserContext, UserRole,
};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

struct AcceptAll {
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl Connector for AcceptAll {
    fn open(&self, _credential: SecretString) -> BoxFuture<'static, Result<Link, momo_api::Error>> {
        let (link, peer) = Link::pair();
        let _ = self.peers.send(peer);
        Box::pin(async move { Ok(link) })
    }
}

fn build(
    server_url: &str,
    cache_dir: Option<&std::path::Path>,
) -> (Controller, mpsc::UnboundedReceiver<LinkPeer>) {
    build_as(server_url, cache_dir, "u1")
}

fn build_as(
    server_url: &str,
    cache_dir: Option<&std::path::Path>,
    user_id: &str,
) -> (Controller, mpsc::UnboundedReceiver<LinkPeer>) {
    build_with_role(server_url, cache_dir, user_id, UserRole::Employee)
}

fn build_with_role(
    server_url: &str,
    cache_dir: Option<&std::path::Path>,
    user_id: &str,
    role: UserRole,
) -> (Controller, mpsc::UnboundedReceiver<LinkPeer>) {
    let mut config = SyncConfig::new(server_url.parse().unwrap());
    config.user = Some(UserContext {
        user_id: RecordId::from(user_id),
        role,
    });
    config.cache_dir = cache_dir.map(std::path::Path::to_path_buf);
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Controller::with_connector(config, Arc::new(AcceptAll { peers: tx })),
        rx,
    )
}

fn token() -> SecretString {
    SecretString::from("test-jwt")
}

/// Connect and return the peer plus the subscription id per destination.
async fn connect(
    controller: &Controller,
    peers: &mut mpsc::UnboundedReceiver<LinkPeer>,
) -> (LinkPeer, Vec<(String, String)>) {
    controller.start(token()).await.unwrap();
    let mut peer = peers.recv().await.unwrap();
    let mut subs = Vec::new();
    for _ in 0..3 {
        let frame = peer.outbound.recv().await.unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        subs.push((
            frame.header("destination").unwrap().to_owned(),
            frame.header("id").unwrap().to_owned(),
        ));
    }
    let mut state = controller.watch_state();
    state
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();
    (peer, subs)
}

fn sub_id<'a>(subs: &'a [(String, String)], destination: &str) -> &'a str {
    &subs.iter().find(|(d, _)| d == destination).unwrap().1
}

fn push(peer: &LinkPeer, sub_id: &str, destination: &str, body: serde_json::Value) {
    let frame = Frame::new(Command::Message)
        .with_header("subscription", sub_id)
        .with_header("destination", destination)
        .with_body(body.to_string());
    peer.inbound.send(LinkEvent::Frame(frame)).unwrap();
}

// ── Push reconciliation ─────────────────────────────────────────────

#[tokio::test]
async fn request_status_update_replaces_in_place() {
    let (controller, mut peers) = build("http://127.0.0.1:9", None);
    let mut requests = controller.store().subscribe_requests();
    let (peer, subs) = connect(&controller, &mut peers).await;
    let requests_sub = sub_id(&subs, REQUESTS_DESTINATION);

    push(
        &peer,
        requests_sub,
        REQUESTS_DESTINATION,
        json!({ "id": "r1", "status": "PENDING" }),
    );
    let snap = requests.changed().await.unwrap();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].status, RequestStatus::Pending);

    push(
        &peer,
        requests_sub,
        REQUESTS_DESTINATION,
        json!({ "type": "request_updated", "payload": { "id": "r1", "status": "APPROVED" } }),
    );
    let snap = requests.changed().await.unwrap();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].id, RecordId::from("r1"));
    assert_eq!(snap[0].status, RequestStatus::Approved);
}

#[tokio::test]
async fn pushed_messages_and_assignments_reach_their_collections() {
    let (controller, mut peers) = build("http://127.0.0.1:9", None);
    let mut messages = controller
        .store()
        .subscribe_messages(&RecordId::from("c1"));
    let mut assignments = controller.store().subscribe_assignments();
    let (peer, subs) = connect(&controller, &mut peers).await;

    push(
        &peer,
        sub_id(&subs, MESSAGES_DESTINATION),
        MESSAGES_DESTINATION,
        json!({ "id": "m1", "chatId": "c1", "text": "Hallo" }),
    );
    assert_eq!(messages.changed().await.unwrap().len(), 1);

    push(
        &peer,
        sub_id(&subs, ASSIGNMENTS_DESTINATION),
        ASSIGNMENTS_DESTINATION,
        json!({ "type": "assignment_created", "payload": { "id": "a1", "status": "PENDING" } }),
    );
    assert_eq!(assignments.changed().await.unwrap().len(), 1);

    // Cache follows the store.
    controller.reconciler().cache().flush().await;
    let cached: Vec<serde_json::Value> = controller
        .reconciler()
        .cache()
        .load("chat_cache_messages_c1");
    assert_eq!(cached.len(), 1);
    assert!(controller.store().last_push_event().is_some());
}

// ── REST loads ──────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_all_loads_user_collections() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c1", "name": "Team", "type": "GROUP" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/requests/employee/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "r1", "status": "PENDING" },
            { "id": "r2", "status": "REJECTED" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/task-assignments/employee/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (controller, mut peers) = build(&server.uri(), None);
    let _session = connect(&controller, &mut peers).await;
    controller.refresh_all().await.unwrap();

    let store = controller.store();
    assert_eq!(store.rooms_snapshot().len(), 1);
    assert_eq!(store.requests_snapshot().len(), 2);
    assert!(store.assignments().is_populated());
    assert!(store.last_full_load().is_some());
}

#[tokio::test]
async fn push_during_full_load_is_not_lost() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/requests/employee/u1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([
                    { "id": "r1", "status": "PENDING" },
                    { "id": "r2", "status": "PENDING" }
                ]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    for endpoint in ["/api/chats", "/api/task-assignments/employee/u1"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
    }

    let (controller, mut peers) = build(&server.uri(), None);
    let (peer, subs) = connect(&controller, &mut peers).await;

    let loader = controller.clone();
    let load = tokio::spawn(async move { loader.refresh_all().await });

    // Wait until the request fetch is in flight, then push the approval.
    loop {
        let seen = server.received_requests().await.unwrap_or_default();
        if seen.iter().any(|r| r.url.path() == "/api/requests/employee/u1") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut requests = controller.store().subscribe_requests();
    push(
        &peer,
        sub_id(&subs, REQUESTS_DESTINATION),
        REQUESTS_DESTINATION,
        json!({ "id": "r1", "status": "APPROVED" }),
    );
    requests.changed().await.unwrap();

    load.await.unwrap().unwrap();
    let store = controller.store();
    assert_eq!(store.requests_snapshot().len(), 2);
    assert_eq!(
        store.requests().get(&RecordId::from("r1")).unwrap().status,
        RequestStatus::Approved
    );
}

#[tokio::test]
async fn sent_message_and_its_echo_merge_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chats/c1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "m9", "chatId": "c1", "text": "Servus" })),
        )
        .mount(&server)
        .await;

    let (controller, mut peers) = build(&server.uri(), None);
    let (peer, subs) = connect(&controller, &mut peers).await;
    let chat = RecordId::from("c1");

    let sent = controller.send_message(&chat, "Servus").await.unwrap();
    assert_eq!(sent.id, RecordId::from("m9"));

    let mut messages = controller.store().subscribe_messages(&chat);
    push(
        &peer,
        sub_id(&subs, MESSAGES_DESTINATION),
        MESSAGES_DESTINATION,
        json!({ "id": "m9", "chatId": "c1", "text": "Servus" }),
    );
    messages.changed().await.unwrap();
    assert_eq!(controller.store().messages_snapshot(&chat).len(), 1);
}

fn request_ids(controller: &Controller) -> Vec<String> {
    controller
        .store()
        .requests_snapshot()
        .iter()
        .map(|r| r.id.to_string())
        .collect()
}

#[tokio::test]
async fn manager_request_writes_reconcile_into_feed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/requests"))
        .and(body_json(json!({ "managerId": "m1", "employeeId": "e7" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "r3", "status": "PENDING" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/requests/r1"))
        .and(query_param("status", "REJECTED"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "r1", "status": "REJECTED" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (controller, mut peers) = build_with_role(&server.uri(), None, "m1", UserRole::Manager);
    let mut requests = controller.store().subscribe_requests();
    let (peer, subs) = connect(&controller, &mut peers).await;
    push(
        &peer,
        sub_id(&subs, REQUESTS_DESTINATION),
        REQUESTS_DESTINATION,
        json!({ "id": "r1", "status": "PENDING" }),
    );
    requests.changed().await.unwrap();

    let created = controller
        .create_request(&RecordId::from("e7"), None)
        .await
        .unwrap();
    assert_eq!(created.id, RecordId::from("r3"));
    assert_eq!(request_ids(&controller), vec!["r3", "r1"]);

    let updated = controller
        .update_request_status(&RecordId::from("r1"), RequestStatus::Rejected)
        .await
        .unwrap();
    assert_eq!(updated.status, RequestStatus::Rejected);
    assert_eq!(request_ids(&controller), vec!["r3", "r1"]);
    assert_eq!(
        controller
            .store()
            .requests()
            .get(&RecordId::from("r1"))
            .unwrap()
            .status,
        RequestStatus::Rejected
    );
}

#[tokio::test]
async fn employees_cannot_send_requests() {
    let server = MockServer::start().await;
    let (controller, mut peers) = build(&server.uri(), None);
    let _session = connect(&controller, &mut peers).await;

    let err = controller
        .create_request(&RecordId::from("e7"), Some("join us"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }), "got {err:?}");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    assert!(controller.store().requests_snapshot().is_empty());
}

#[tokio::test]
async fn direct_chat_is_upserted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chats/direct"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c5", "name": "Anna", "type": "DIRECT"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let (controller, mut peers) = build_with_role(&server.uri(), None, "m1", UserRole::Manager);
    let _session = connect(&controller, &mut peers).await;
    let (manager, employee) = (RecordId::from("m1"), RecordId::from("e7"));

    controller
        .create_direct_chat(&manager, &employee)
        .await
        .unwrap();
    let room = controller
        .create_direct_chat(&manager, &employee)
        .await
        .unwrap();
    assert_eq!(room.id, RecordId::from("c5"));

    let rooms = controller.store().rooms_snapshot();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, RecordId::from("c5"));
}

#[tokio::test]
async fn rejected_token_surfaces_from_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "expired" })))
        .mount(&server)
        .await;

    let (controller, mut peers) = build(&server.uri(), None);
    let _session = connect(&controller, &mut peers).await;
    let err = controller.refresh_all().await.unwrap_err();
    assert!(err.is_auth_failure(), "got {err:?}");
    assert!(controller.store().rooms_snapshot().is_empty());
}

#[tokio::test]
async fn loads_before_start_are_refused() {
    let (controller, _peers) = build("http://127.0.0.1:9", None);
    let err = controller.refresh_all().await.unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));
}

// ── Offline cache ───────────────────────────────────────────────────

#[tokio::test]
async fn cached_rooms_survive_restart_when_server_is_down() {
    let dir = tempfile::tempdir().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c1", "name": "Team" },
            { "id": "c2", "name": "Baustelle" }
        ])))
        .mount(&server)
        .await;

    {
        let (controller, mut peers) = build(&server.uri(), Some(dir.path()));
        let _session = connect(&controller, &mut peers).await;
        controller.refresh_all().await.ok();
        assert_eq!(controller.store().rooms_snapshot().len(), 2);
        controller.shutdown().await;
        assert_eq!(controller.state(), SessionState::Idle);
    }

    // Second run: the backend answers 503 for everything.
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (controller, mut peers) = build(&server.uri(), Some(dir.path()));
    let _session = connect(&controller, &mut peers).await;
    assert!(controller.refresh_all().await.is_err());

    let rooms = controller.store().rooms_snapshot();
    let ids: Vec<String> = rooms.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn logout_clears_store_and_cache_is_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    {
        let (controller, mut peers) = build_as(&server.uri(), Some(dir.path()), "u1");
        let mut requests = controller.store().subscribe_requests();
        let (peer, subs) = connect(&controller, &mut peers).await;
        push(
            &peer,
            sub_id(&subs, REQUESTS_DESTINATION),
            REQUESTS_DESTINATION,
            json!({ "id": "r1", "status": "PENDING" }),
        );
        requests.changed().await.unwrap();

        controller.shutdown().await;
        assert!(controller.store().requests_snapshot().is_empty());
        assert!(requests.latest().is_empty());
    }

    // Another account on the same device starts cold.
    let (other, mut peers) = build_as(&server.uri(), Some(dir.path()), "u2");
    let _session = connect(&other, &mut peers).await;
    assert!(other.refresh_all().await.is_err());
    assert!(other.store().requests_snapshot().is_empty());
    other.shutdown().await;

    // The first account still gets its own cache back.
    let (again, mut peers) = build_as(&server.uri(), Some(dir.path()), "u1");
    let _session = connect(&again, &mut peers).await;
    assert!(again.refresh_all().await.is_err());
    let ids: Vec<String> = again
        .store()
        .requests_snapshot()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(ids, vec!["r1"]);
}
