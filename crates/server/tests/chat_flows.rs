use async_trait::async_trait;
use commonio_server::config::{AppState, ServerConfig};
use commonio_server::gateway::ClientLink;
use commonio_server::protocol::Envelope;
use commonio_server::store::{
    Entity, Group, JsonStore, NewGroup, NewUser, Store, StoreResult, User,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

struct Client {
    link: ClientLink,
    rx: mpsc::UnboundedReceiver<Envelope>,
    session_id: String,
}

impl Client {
    fn connect(state: &AppState) -> Self {
        let (link, mut rx) = ClientLink::open(state.clone());
        let hello = rx.try_recv().expect("session event on connect");
        assert_eq!(hello.event, "session");
        assert_eq!(hello.data["err"], Value::Null);
        let session_id = hello.data["sessionId"].as_str().unwrap().to_string();
        Self {
            link,
            rx,
            session_id,
        }
    }

    /// Send `event` with this client's session id merged into `data` and
    /// return the reply.
    async fn request(&mut self, event: &str, mut data: Value) -> Value {
        data["sessionId"] = json!(self.session_id);
        self.request_raw(event, data).await
    }

    async fn request_raw(&mut self, event: &str, data: Value) -> Value {
        self.link.handle(Envelope::new(event, data)).await;
        let reply = self.rx.try_recv().expect("reply");
        assert_eq!(reply.event, event);
        reply.data
    }

    fn next_event(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    async fn register(&mut self, username: &str) {
        let reply = self
            .request(
                "register",
                json!({ "username": username, "password": "pw", "nickname": username }),
            )
            .await;
        assert_eq!(reply["err"], Value::Null, "register {username}: {reply}");
    }

    async fn login(&mut self, username: &str) {
        let reply = self
            .request("login", json!({ "username": username, "password": "pw" }))
            .await;
        assert_eq!(reply["err"], Value::Null, "login {username}: {reply}");
        assert_eq!(reply["username"], username);
    }
}

async fn setup() -> (TempDir, AppState) {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;
    let state = AppState::new(config).await.unwrap();
    (dir, state)
}

#[tokio::test]
async fn test_register_twice_is_rejected() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    client.register("alice").await;
    let reply = client
        .request(
            "register",
            json!({ "username": "alice", "password": "other", "nickname": "A" }),
        )
        .await;
    assert_eq!(reply, json!({ "err": "ERROR_USERNAME_EXISTS" }));
}

#[tokio::test]
async fn test_login_with_wrong_password_fails() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);
    client.register("alice").await;

    let reply = client
        .request("login", json!({ "username": "alice", "password": "nope" }))
        .await;
    assert_eq!(reply["err"], "ERROR_LOGIN_FAILED");
    assert!(!state.presence.is_online("alice"));
}

#[tokio::test]
async fn test_missing_field_reports_its_name() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    let reply = client.request("login", json!({ "username": "alice" })).await;
    assert_eq!(reply["err"], "ERROR_TYPE_NOT_MATCH: password");

    let reply = client
        .request("login", json!({ "username": 7, "password": "pw" }))
        .await;
    assert_eq!(reply["err"], "ERROR_TYPE_NOT_MATCH: username");
}

#[tokio::test]
async fn test_guarded_event_requires_login() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    let reply = client.request("contact.add", json!({ "username": "bob" })).await;
    assert_eq!(reply["err"], "ERROR_SESSION_NOT_LOGIN");

    let reply = client.request("chat", json!({ "to": "bob", "message": "hi" })).await;
    assert_eq!(reply["err"], "ERROR_SESSION_NOT_LOGIN");
}

#[tokio::test]
async fn test_chat_reaches_latest_login_only() {
    let (_dir, state) = setup().await;
    let mut first = Client::connect(&state);
    let mut second = Client::connect(&state);
    let mut bob = Client::connect(&state);

    first.register("alice").await;
    bob.register("bob").await;
    first.login("alice").await;
    second.login("alice").await;
    bob.login("bob").await;

    let reply = bob
        .request("chat", json!({ "to": "alice", "message": "hello" }))
        .await;
    assert_eq!(reply, json!({ "err": null }));

    let delivered = second.next_event().expect("message for latest login");
    assert_eq!(delivered.event, "message");
    assert_eq!(delivered.data, json!({ "from": "bob", "message": "hello" }));
    assert!(first.next_event().is_none());
}

#[tokio::test]
async fn test_chat_to_unknown_user_is_offline() {
    let (_dir, state) = setup().await;
    let mut bob = Client::connect(&state);
    bob.register("bob").await;
    bob.login("bob").await;

    let reply = bob
        .request("chat", json!({ "to": "ghost", "message": "anyone?" }))
        .await;
    assert_eq!(reply["err"], "ERROR_USER_OFFLINE");
}

#[tokio::test]
async fn test_disconnect_clears_presence() {
    let (_dir, state) = setup().await;
    let mut alice = Client::connect(&state);
    let mut bob = Client::connect(&state);
    alice.register("alice").await;
    bob.register("bob").await;
    alice.login("alice").await;
    bob.login("bob").await;
    assert!(state.presence.is_online("alice"));

    alice.link.close();
    assert!(!state.presence.is_online("alice"));

    let reply = bob
        .request("chat", json!({ "to": "alice", "message": "still there?" }))
        .await;
    assert_eq!(reply["err"], "ERROR_USER_OFFLINE");
}

#[tokio::test]
async fn test_stale_disconnect_keeps_reattached_session() {
    let (_dir, state) = setup().await;
    let mut old = Client::connect(&state);
    old.register("alice").await;
    old.login("alice").await;
    let session_id = old.session_id.clone();

    // Same session resumed from a new connection.
    let mut resumed = Client::connect(&state);
    resumed.session_id = session_id.clone();
    let reply = resumed.request("contacts", json!({})).await;
    assert_eq!(reply["err"], Value::Null);

    old.link.close();
    assert!(state.presence.is_online("alice"));

    let session = state.sessions.get(&session_id).unwrap();
    assert_eq!(session.identity().as_deref(), Some("alice"));
    assert_eq!(
        session.connection_id(),
        Some(resumed.link.connection().id())
    );

    let mut bob = Client::connect(&state);
    bob.register("bob").await;
    bob.login("bob").await;
    bob.request("chat", json!({ "to": "alice", "message": "hi" }))
        .await;
    let delivered = resumed.next_event().expect("message on resumed connection");
    assert_eq!(delivered.data["message"], "hi");
}

#[tokio::test]
async fn test_unknown_session_id_gets_a_fresh_session() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    client
        .link
        .handle(Envelope::new(
            "user.search",
            json!({ "sessionId": "not-a-session", "pattern": "x" }),
        ))
        .await;

    let announced = client.next_event().expect("session event");
    assert_eq!(announced.event, "session");
    let fresh = announced.data["sessionId"].as_str().unwrap();
    assert_ne!(fresh, "not-a-session");
    assert_ne!(fresh, client.session_id);

    let reply = client.next_event().expect("reply");
    assert_eq!(reply.event, "user.search");
    assert_eq!(reply.data["err"], Value::Null);
}

#[tokio::test]
async fn test_unknown_event_gets_no_reply() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    client
        .link
        .handle(Envelope::new("group.delete", json!({ "sessionId": client.session_id })))
        .await;
    assert!(client.next_event().is_none());

    client.link.handle_text("this is not json").await;
    assert!(client.next_event().is_none());
}

#[tokio::test]
async fn test_logout_unpublishes() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);
    client.register("alice").await;
    client.login("alice").await;

    let reply = client.request("logout", json!({})).await;
    assert_eq!(reply, json!({ "err": null }));
    assert!(!state.presence.is_online("alice"));

    let reply = client.request("logout", json!({})).await;
    assert_eq!(reply["err"], "ERROR_SESSION_NOT_LOGIN");
}

#[tokio::test]
async fn test_contacts_show_presence() {
    let (_dir, state) = setup().await;
    let mut alice = Client::connect(&state);
    let mut bob = Client::connect(&state);
    alice.register("alice").await;
    bob.register("bob").await;
    alice.register("carol").await;
    alice.login("alice").await;
    bob.login("bob").await;

    let reply = alice.request("contact.add", json!({ "username": "bob" })).await;
    assert_eq!(reply["err"], Value::Null);
    let reply = alice.request("contact.add", json!({ "username": "carol" })).await;
    assert_eq!(reply["err"], Value::Null);

    let reply = alice.request("contact.add", json!({ "username": "bob" })).await;
    assert_eq!(reply["err"], "ERROR_CONTACT_EXISTS");
    let reply = alice.request("contact.add", json!({ "username": "dave" })).await;
    assert_eq!(reply["err"], "ERROR_USER_NOT_FOUND");

    let reply = alice.request("contacts", json!({})).await;
    let contacts = reply["contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0]["username"], "bob");
    assert_eq!(contacts[0]["online"], true);
    assert_eq!(contacts[1]["username"], "carol");
    assert_eq!(contacts[1]["online"], false);

    // One-directional.
    let reply = bob.request("contacts", json!({})).await;
    assert_eq!(reply["contacts"], json!([]));
}

#[tokio::test]
async fn test_user_search_passes_store_error_through() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);
    client.register("alice").await;

    let reply = client.request("user.search", json!({ "pattern": "^al" })).await;
    assert_eq!(reply["users"][0]["username"], "alice");
    assert!(reply["users"][0].get("passwordHash").is_none());

    let reply = client.request("user.search", json!({ "pattern": "(" })).await;
    let err = reply["err"].as_str().unwrap();
    assert!(err.starts_with("ERROR_INVALID_PATTERN"), "{err}");
}

#[tokio::test]
async fn test_group_lifecycle() {
    let (_dir, state) = setup().await;
    let mut alice = Client::connect(&state);
    let mut bob = Client::connect(&state);
    alice.register("alice").await;
    bob.register("bob").await;
    alice.login("alice").await;
    bob.login("bob").await;

    let reply = alice
        .request("group.add", json!({ "name": "Rustaceans", "groupId": "rust" }))
        .await;
    assert_eq!(reply, json!({ "err": null, "groupId": "rust" }));

    let reply = bob
        .request("group.add", json!({ "name": "Again", "groupId": "rust" }))
        .await;
    assert_eq!(reply["err"], "ERROR_GROUPID_EXISTS");

    let reply = bob.request("group.join", json!({ "groupId": "rust" })).await;
    assert_eq!(reply, json!({ "err": null, "groupId": "rust" }));
    let reply = bob.request("group.join", json!({ "groupId": "rust" })).await;
    assert_eq!(reply["err"], "ERROR_MEMBER_EXISTS");
    let reply = bob.request("group.join", json!({ "groupId": "go" })).await;
    assert_eq!(reply["err"], "ERROR_GROUP_NOT_FOUND");

    let reply = bob.request("groups", json!({})).await;
    assert_eq!(reply["groups"][0]["groupId"], "rust");
    assert_eq!(reply["groups"][0]["members"], json!(["alice", "bob"]));

    let reply = bob.request("group.search", json!({ "pattern": "Rust" })).await;
    assert_eq!(reply["groups"].as_array().unwrap().len(), 1);

    let reply = bob
        .request("group.chat", json!({ "groupId": "rust", "message": "hi all" }))
        .await;
    assert_eq!(reply, json!({ "err": null }));
    assert!(alice.next_event().is_none());

    let reply = bob
        .request("group.chat", json!({ "groupId": "go", "message": "hi" }))
        .await;
    assert_eq!(reply["err"], "ERROR_GROUP_NOT_FOUND");
}

#[tokio::test]
async fn test_profile_get_and_edit() {
    let (_dir, state) = setup().await;
    let mut alice = Client::connect(&state);
    alice.register("alice").await;

    let reply = alice.request("profile.get", json!({})).await;
    assert_eq!(reply["err"], "ERROR_USER_NOT_FOUND");

    alice.login("alice").await;
    let reply = alice
        .request(
            "profile.edit",
            json!({ "nickname": "Al", "description": "rustacean" }),
        )
        .await;
    assert_eq!(
        reply,
        json!({ "err": null, "nickname": "Al", "description": "rustacean" })
    );

    let mut other = Client::connect(&state);
    let reply = other.request("profile.get", json!({ "username": "alice" })).await;
    assert_eq!(reply["err"], Value::Null);
    assert_eq!(reply["nickname"], "Al");
    assert_eq!(reply["description"], "rustacean");
}

#[tokio::test]
async fn test_accounts_survive_restart() {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;

    {
        let state = AppState::new(config.clone()).await.unwrap();
        let mut client = Client::connect(&state);
        client.register("alice").await;
    }

    let state = AppState::new(config).await.unwrap();
    let mut client = Client::connect(&state);
    client.login("alice").await;
}

#[tokio::test]
async fn test_failed_store_write_replies_once_and_keeps_state() {
    let (dir, state) = setup().await;
    let mut client = Client::connect(&state);

    let blocker = dir.path().join("data").join("database.tmp");
    std::fs::create_dir(&blocker).unwrap();

    let reply = client
        .request(
            "register",
            json!({ "username": "alice", "password": "pw", "nickname": "alice" }),
        )
        .await;
    let err = reply["err"].as_str().unwrap();
    assert!(err.starts_with("ERROR_STORE_IO"), "{err}");
    assert!(client.next_event().is_none());

    let reply = client
        .request("login", json!({ "username": "alice", "password": "pw" }))
        .await;
    assert_eq!(reply["err"], "ERROR_LOGIN_FAILED");

    std::fs::remove_dir(&blocker).unwrap();
    client.register("alice").await;
    client.login("alice").await;
}

/// Delegates to a JSON store but panics when asked for the user `boom`.
struct PanickingStore {
    inner: JsonStore,
}

#[async_trait]
impl Store for PanickingStore {
    async fn find_user(&self, username: &str) -> StoreResult<Option<User>> {
        if username == "boom" {
            panic!("lookup exploded");
        }
        self.inner.find_user(username).await
    }

    async fn add_user(&self, new: NewUser) -> StoreResult<User> {
        self.inner.add_user(new).await
    }

    async fn authorize_user(&self, username: &str, password: &str) -> StoreResult<bool> {
        self.inner.authorize_user(username, password).await
    }

    async fn search_users(&self, pattern: &str) -> StoreResult<Vec<User>> {
        self.inner.search_users(pattern).await
    }

    async fn add_contact(&self, owner: &str, contact: &str) -> StoreResult<()> {
        self.inner.add_contact(owner, contact).await
    }

    async fn add_group(&self, new: NewGroup) -> StoreResult<Group> {
        self.inner.add_group(new).await
    }

    async fn find_group(&self, gid: &str) -> StoreResult<Option<Group>> {
        self.inner.find_group(gid).await
    }

    async fn search_groups(&self, pattern: &str) -> StoreResult<Vec<Group>> {
        self.inner.search_groups(pattern).await
    }

    async fn join_group(&self, username: &str, gid: &str) -> StoreResult<()> {
        self.inner.join_group(username, gid).await
    }

    async fn save(&self, entity: Entity) -> StoreResult<()> {
        self.inner.save(entity).await
    }
}

#[tokio::test]
async fn test_handler_panic_becomes_single_reply() {
    let dir = tempdir().unwrap();
    let mut config = ServerConfig::with_base_dir(dir.path());
    config.bcrypt_cost = 4;
    let inner = JsonStore::open(config.database_path(), config.bcrypt_cost)
        .await
        .unwrap();
    let state = AppState::with_store(config, Arc::new(PanickingStore { inner }));
    let mut client = Client::connect(&state);

    let reply = client.request("profile.get", json!({ "username": "boom" })).await;
    let err = reply["err"].as_str().unwrap();
    assert!(err.starts_with("ERROR_FLOW_PANICKED"), "{err}");
    assert!(err.contains("lookup exploded"), "{err}");
    assert!(client.next_event().is_none());

    // The connection keeps serving requests.
    client.register("alice").await;
    let reply = client.request("profile.get", json!({ "username": "alice" })).await;
    assert_eq!(reply["err"], Value::Null);
}

#[tokio::test]
async fn test_requests_without_session_do_not_pile_up() {
    let (_dir, state) = setup().await;
    let mut client = Client::connect(&state);

    for _ in 0..5 {
        client
            .link
            .handle(Envelope::new("user.search", json!({ "pattern": "x" })))
            .await;
        assert_eq!(client.next_event().unwrap().event, "session");
        assert_eq!(client.next_event().unwrap().event, "user.search");
    }

    assert_eq!(state.sessions.len(), 1);
}
