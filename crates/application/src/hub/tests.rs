use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use config::HubConfig;
use domain::{
    ChatMessage, Conversation, ConversationId, MessageId, NewMessage, PasswordHash,
    RepositoryError, Timestamp, User, UserEmail, UserId, Username,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::ServerFrame;
use super::*;
use crate::auth::{AccessTokenVerifier, TokenPurpose, VerifiedToken};
use crate::clock::SystemClock;
use crate::error::ApplicationError;
use crate::memory::MemoryStore;
use crate::repository::{
    MessageRepository, MockConversationRepository, MockMessageRepository, MockUserRepository,
};

/// 令牌格式 `<purpose>:<subject>`，`expired` 或其他任意串一律校验失败
struct PrefixVerifier;

impl AccessTokenVerifier for PrefixVerifier {
    fn verify_access_token(&self, raw: &str) -> Result<VerifiedToken, ApplicationError> {
        let (purpose, subject) = raw.split_once(':').ok_or(ApplicationError::Authentication)?;
        let purpose = match purpose {
            "access" => TokenPurpose::Access,
            "refresh" => TokenPurpose::Refresh,
            _ => return Err(ApplicationError::Authentication),
        };
        Ok(VerifiedToken {
            subject: subject.to_owned(),
            expires_at: 0,
            audience: "chatrix".into(),
            issuer: "chatrix".into(),
            purpose,
        })
    }
}

struct Fixture {
    hub: Arc<Hub>,
    store: MemoryStore,
}

async fn seed_user(store: &MemoryStore, name: &str) -> User {
    let user = User::register(
        UserId::generate(),
        Username::parse(name).unwrap(),
        UserEmail::parse(format!("{name}@example.com")).unwrap(),
        PasswordHash::new("$2b$04$hash").unwrap(),
        Utc::now(),
    );
    UserRepository::create(store, user).await.unwrap()
}

async fn start_conversation(store: &MemoryStore, a: &User, b: &User) -> Conversation {
    let convo = Conversation::start(ConversationId::generate(), a.id, b.id, Utc::now()).unwrap();
    ConversationRepository::create(store, convo).await.unwrap()
}

/// 按内存存储中已有的用户应答 `find_by_id`
fn users_known_to(users: &[&User]) -> MockUserRepository {
    let known: Vec<User> = users.iter().map(|user| (*user).clone()).collect();
    let mut repo = MockUserRepository::new();
    repo.expect_find_by_id()
        .returning(move |id| Ok(known.iter().find(|user| user.id == id).cloned()));
    repo
}

impl Fixture {
    fn new() -> Self {
        let store = MemoryStore::new();
        Self::wired(
            store.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store),
        )
    }

    fn with_messages(messages: Arc<dyn MessageRepository>) -> Self {
        let store = MemoryStore::new();
        Self::wired(
            store.clone(),
            Arc::new(store.clone()),
            Arc::new(store),
            messages,
        )
    }

    fn wired(
        store: MemoryStore,
        users: Arc<dyn UserRepository>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        let hub = Arc::new(Hub::new(HubDependencies {
            user_repository: users,
            conversation_repository: conversations,
            message_repository: messages,
            token_verifier: Arc::new(PrefixVerifier),
            clock: Arc::new(SystemClock),
            config: HubConfig::default(),
        }));
        Self { hub, store }
    }

    async fn user(&self, name: &str) -> User {
        seed_user(&self.store, name).await
    }

    async fn converse(&self, a: &User, b: &User) -> Conversation {
        start_conversation(&self.store, a, b).await
    }

    fn open(&self) -> Client {
        let (session, outbound) = self.hub.accept();
        let (inbound, source) = mpsc::unbounded_channel::<String>();
        let hub = self.hub.clone();
        let task = tokio::spawn(async move { hub.drive(session, source).await });
        Client {
            inbound: Some(inbound),
            outbound,
            task,
        }
    }

    /// 建立连接并完成认证，消费掉 WELCOME
    async fn login(&self, user: &User) -> Client {
        let mut client = self.open();
        client.send_json(json!({"message": {"token": format!("access:{}", user.id)}}));
        assert_eq!(client.next().await, Outbound::Frame(ServerFrame::welcome()));
        client
    }
}

struct Client {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    task: JoinHandle<()>,
}

impl Client {
    fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    fn send_text(&self, text: String) {
        self.inbound
            .as_ref()
            .expect("client already hung up")
            .send(text)
            .expect("hub dropped the frame source");
    }

    async fn next(&mut self) -> Outbound {
        tokio::time::timeout(Duration::from_secs(1), self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("outbound channel closed")
    }

    async fn next_frame(&mut self) -> ServerFrame {
        match self.next().await {
            Outbound::Frame(frame) => frame,
            Outbound::Close => panic!("expected a frame, got close"),
        }
    }

    fn assert_idle(&mut self) {
        assert!(
            matches!(
                self.outbound.try_recv(),
                Err(mpsc::error::TryRecvError::Empty)
            ),
            "unexpected outbound traffic"
        );
    }

    /// 模拟客户端断开并等待服务端清理完成
    async fn hang_up(mut self) {
        self.inbound.take();
        self.task.await.expect("drive task panicked");
    }
}

fn chat(from: &User, to: &User, content: &str, temp_id: &str) -> serde_json::Value {
    json!({
        "type": "CHAT",
        "message": {"to": to.id.to_string(), "from": from.id.to_string(), "content": content, "tempID": temp_id}
    })
}

#[tokio::test(start_paused = true)]
async fn silent_connection_is_closed_at_deadline() {
    let fx = Fixture::new();
    let mut client = fx.open();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    client.assert_idle();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.next().await, Outbound::Close);
    client.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn authentication_just_before_deadline_is_accepted() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let mut client = fx.open();

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    client.send_json(json!({"message": {"token": format!("access:{}", alice.id)}}));
    assert_eq!(client.next_frame().await, ServerFrame::welcome());

    tokio::time::sleep(Duration::from_secs(2)).await;
    client.assert_idle();
    assert!(fx.hub.is_online(alice.id));
}

#[tokio::test]
async fn rejected_credentials_get_one_error_then_close() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;

    let attempts = vec![
        json!({"message": {"token": format!("refresh:{}", alice.id)}}).to_string(),
        json!({"message": {"token": "expired"}}).to_string(),
        json!({"message": {"token": format!("access:{}", UserId::generate())}}).to_string(),
        json!({"message": {"token": "access:not-a-uuid"}}).to_string(),
        json!({"type": "CHAT", "message": {"to": "x"}}).to_string(),
        "garbage".to_string(),
    ];

    for attempt in attempts {
        let mut client = fx.open();
        client.send_text(attempt.clone());
        assert_eq!(
            client.next_frame().await,
            ServerFrame::error(401, "we couldn't authenticate you", None),
            "attempt: {attempt}"
        );
        assert_eq!(client.next().await, Outbound::Close);
        client.task.await.unwrap();
        assert!(client.outbound.recv().await.is_none(), "attempt: {attempt}");
    }
    assert!(fx.hub.registry().is_empty());
}

#[tokio::test]
async fn login_announces_presence_to_online_partners() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let carol = fx.user("carol").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let mut carol_client = fx.login(&carol).await;
    let _alice_client = fx.login(&alice).await;

    assert_eq!(
        bob_client.next_frame().await,
        ServerFrame::Online(protocol::OnlinePresence { user_id: alice.id })
    );
    carol_client.assert_idle();
}

#[tokio::test]
async fn chat_is_acknowledged_and_forwarded() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let mut alice_client = fx.login(&alice).await;
    bob_client.next_frame().await; // alice 上线通知

    alice_client.send_json(chat(&alice, &bob, "hello bob", "abc123"));

    let ServerFrame::Ack(ack) = alice_client.next_frame().await else {
        panic!("expected ACK_MSG_DELIVERED");
    };
    assert_eq!(ack.temp_id, "abc123");
    assert_eq!(ack.recipient_id, bob.id);

    let ServerFrame::Chat(delivered) = bob_client.next_frame().await else {
        panic!("expected CHAT");
    };
    assert_eq!(delivered.id, ack.id);
    assert_eq!(delivered.content, "hello bob");
    assert_eq!(delivered.from, alice.id);
    assert_eq!(delivered.created_at, ack.created_at);

    alice_client.assert_idle();
    bob_client.assert_idle();
}

#[tokio::test]
async fn offline_recipient_gets_nothing_but_message_is_stored() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let convo = fx.converse(&alice, &bob).await;

    let mut alice_client = fx.login(&alice).await;
    alice_client.send_json(chat(&alice, &bob, "are you there?", "t-1"));

    let ServerFrame::Ack(ack) = alice_client.next_frame().await else {
        panic!("expected ACK_MSG_DELIVERED");
    };
    let history = fx.store.list_by_conversation(convo.id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, ack.id);

    // 之后上线也不会补发
    let mut bob_client = fx.login(&bob).await;
    alice_client.next_frame().await; // bob 上线通知
    bob_client.assert_idle();
}

#[tokio::test]
async fn invalid_chat_fields_are_rejected_with_temp_id() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;
    let mut alice_client = fx.login(&alice).await;

    alice_client.send_json(json!({
        "type": "CHAT",
        "message": {"to": "nope", "from": alice.id.to_string(), "content": "x", "tempID": "t-bad-to"}
    }));
    let ServerFrame::Error(err) = alice_client.next_frame().await else {
        panic!("expected ERR");
    };
    assert_eq!(err.code, 400);
    assert_eq!(err.temp_id.as_deref(), Some("t-bad-to"));

    // 冒充他人发送
    alice_client.send_json(chat(&bob, &alice, "spoofed", "t-spoof"));
    let ServerFrame::Error(err) = alice_client.next_frame().await else {
        panic!("expected ERR");
    };
    assert_eq!(err.code, 400);
    assert_eq!(err.temp_id.as_deref(), Some("t-spoof"));

    // 没有会话的两人之间发送
    let carol = fx.user("carol").await;
    alice_client.send_json(chat(&alice, &carol, "hi", "t-no-convo"));
    let ServerFrame::Error(err) = alice_client.next_frame().await else {
        panic!("expected ERR");
    };
    assert_eq!(err.code, 404);
    assert_eq!(err.temp_id.as_deref(), Some("t-no-convo"));

    alice_client.assert_idle();
}

#[tokio::test]
async fn storage_failure_reports_error_and_skips_forward() {
    let mut messages = MockMessageRepository::new();
    messages
        .expect_create()
        .times(1)
        .returning(|_| Err(RepositoryError::storage("connection reset")));
    let fx = Fixture::with_messages(Arc::new(messages));
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let mut alice_client = fx.login(&alice).await;
    bob_client.next_frame().await;

    alice_client.send_json(chat(&alice, &bob, "lost", "t-500"));
    assert_eq!(
        alice_client.next_frame().await,
        ServerFrame::error(500, "failed to send message", Some("t-500".into()))
    );
    alice_client.assert_idle();
    bob_client.assert_idle();
}

struct StalledMessages;

#[async_trait]
impl MessageRepository for StalledMessages {
    async fn create(&self, _message: NewMessage) -> Result<ChatMessage, RepositoryError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(RepositoryError::storage("unreachable"))
    }

    async fn mark_read(
        &self,
        _conversation: ConversationId,
        _owner: UserId,
        _at: Timestamp,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn list_by_conversation(
        &self,
        _conversation: ConversationId,
        _limit: i64,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn storage_timeout_is_reported_as_internal_failure() {
    let fx = Fixture::with_messages(Arc::new(StalledMessages));
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;
    let mut alice_client = fx.login(&alice).await;

    let started = tokio::time::Instant::now();
    alice_client.send_json(chat(&alice, &bob, "slow", "t-slow"));
    let frame = tokio::time::timeout(Duration::from_secs(10), alice_client.outbound.recv())
        .await
        .expect("error frame within budget")
        .expect("channel open");
    assert_eq!(
        frame,
        Outbound::Frame(ServerFrame::error(
            500,
            "failed to send message",
            Some("t-slow".into())
        ))
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn read_receipt_goes_to_message_owner() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let convo = fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let mut alice_client = fx.login(&alice).await;
    bob_client.next_frame().await;

    alice_client.send_json(chat(&alice, &bob, "one", "t-1"));
    alice_client.send_json(chat(&alice, &bob, "two", "t-2"));
    let mut sent = Vec::new();
    for _ in 0..2 {
        let ServerFrame::Ack(ack) = alice_client.next_frame().await else {
            panic!("expected ACK_MSG_DELIVERED");
        };
        sent.push(ack.id);
        bob_client.next_frame().await;
    }

    // 会话外的用户和发送者本人都不能标记已读
    let carol = fx.user("carol").await;
    let carol_client = fx.login(&carol).await;
    let mark_alice_read = json!({
        "type": "MARK_AS_READ",
        "message": {"conversationID": convo.id.to_string(), "messageOwnerID": alice.id.to_string()}
    });
    carol_client.send_json(mark_alice_read.clone());
    alice_client.send_json(mark_alice_read.clone());
    carol_client.send_json(json!({"type": "TYPING", "message": {"to": alice.id.to_string()}}));
    assert_eq!(
        alice_client.next_frame().await,
        ServerFrame::Typing(protocol::TypingNotice {
            to: alice.id,
            from: carol.id
        })
    );

    bob_client.send_json(mark_alice_read);
    assert_eq!(
        alice_client.next_frame().await,
        ServerFrame::Read(protocol::ReadReceipt {
            conversation_id: convo.id,
            message_ids: sent,
        })
    );

    // 再次标记没有新的已读消息，不推送；非法标识静默忽略
    bob_client.send_json(json!({
        "type": "MARK_AS_READ",
        "message": {"conversationID": convo.id.to_string(), "messageOwnerID": alice.id.to_string()}
    }));
    bob_client.send_json(json!({
        "type": "MARK_AS_READ",
        "message": {"conversationID": "bad", "messageOwnerID": alice.id.to_string()}
    }));
    bob_client.send_json(json!({"type": "TYPING", "message": {"to": alice.id.to_string()}}));
    assert_eq!(
        alice_client.next_frame().await,
        ServerFrame::Typing(protocol::TypingNotice {
            to: alice.id,
            from: bob.id
        })
    );
    bob_client.assert_idle();
}

#[tokio::test]
async fn unknown_frames_are_ignored_and_connection_stays_usable() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let mut alice_client = fx.login(&alice).await;
    bob_client.next_frame().await;

    alice_client.send_json(json!({"type": "REACTION", "message": {"emoji": ":)"}}));
    alice_client.send_json(json!({"type": "STOPPED_TYPING", "message": {"to": bob.id.to_string()}}));

    assert_eq!(
        bob_client.next_frame().await,
        ServerFrame::StoppedTyping(protocol::TypingNotice {
            to: bob.id,
            from: alice.id
        })
    );
    alice_client.assert_idle();
    assert!(fx.hub.is_online(alice.id));
}

#[tokio::test]
async fn malformed_frames_produce_validation_errors() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let mut alice_client = fx.login(&alice).await;

    alice_client.send_text("{not json".into());
    let ServerFrame::Error(err) = alice_client.next_frame().await else {
        panic!("expected ERR");
    };
    assert_eq!(err.code, 400);
    assert!(err.temp_id.is_none());

    alice_client.send_json(json!({"type": "TYPING", "message": {"to": "not-a-user"}}));
    let ServerFrame::Error(err) = alice_client.next_frame().await else {
        panic!("expected ERR");
    };
    assert_eq!(err.code, 400);
    assert!(fx.hub.is_online(alice.id));
}

#[tokio::test]
async fn disconnect_persists_last_seen_and_notifies_partners() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let alice_client = fx.login(&alice).await;
    bob_client.next_frame().await;

    alice_client.hang_up().await;

    let ServerFrame::Offline(status) = bob_client.next_frame().await else {
        panic!("expected OFFLINE_STATUS");
    };
    assert_eq!(status.user_id, alice.id);
    assert!(!fx.hub.is_online(alice.id));

    let stored = fx.store.find_by_id(alice.id).await.unwrap().unwrap();
    assert_eq!(stored.last_seen, Some(status.last_seen));
}

#[tokio::test]
async fn displaced_connection_does_not_evict_newer_one() {
    let fx = Fixture::new();
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    fx.converse(&alice, &bob).await;

    let mut bob_client = fx.login(&bob).await;
    let first_tab = fx.login(&alice).await;
    bob_client.next_frame().await;
    let mut second_tab = fx.login(&alice).await;
    bob_client.next_frame().await;

    first_tab.hang_up().await;
    assert!(fx.hub.is_online(alice.id));
    bob_client.assert_idle();

    // 新连接依旧能收到消息
    bob_client.send_json(chat(&bob, &alice, "still here?", "t-tab"));
    let ServerFrame::Chat(delivered) = second_tab.next_frame().await else {
        panic!("expected CHAT on the newer connection");
    };
    assert_eq!(delivered.content, "still here?");

    let stored = fx.store.find_by_id(alice.id).await.unwrap().unwrap();
    assert!(stored.last_seen.is_none());
}

#[tokio::test]
async fn presence_lookup_failure_does_not_block_login_or_cleanup() {
    let store = MemoryStore::new();
    let alice = seed_user(&store, "alice").await;
    let bob = seed_user(&store, "bob").await;
    start_conversation(&store, &alice, &bob).await;

    let mut conversations = MockConversationRepository::new();
    conversations
        .expect_list_partners()
        .times(3)
        .returning(|_| Err(RepositoryError::storage("connection reset")));
    let fx = Fixture::wired(
        store.clone(),
        Arc::new(store.clone()),
        Arc::new(conversations),
        Arc::new(store.clone()),
    );

    let mut bob_client = fx.login(&bob).await;
    let alice_client = fx.login(&alice).await;
    assert!(fx.hub.is_online(alice.id));
    bob_client.assert_idle();

    alice_client.hang_up().await;
    assert!(!fx.hub.is_online(alice.id));
    bob_client.assert_idle();

    let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
    assert!(stored.last_seen.is_some());
}

#[tokio::test]
async fn best_effort_write_failures_are_swallowed() {
    let store = MemoryStore::new();
    let alice = seed_user(&store, "alice").await;
    let bob = seed_user(&store, "bob").await;
    let convo = start_conversation(&store, &alice, &bob).await;

    let mut users = users_known_to(&[&alice, &bob]);
    users
        .expect_update_last_seen()
        .times(1)
        .returning(|_, _| Err(RepositoryError::storage("read-only replica")));
    let mut messages = MockMessageRepository::new();
    messages
        .expect_mark_read()
        .times(1)
        .returning(|_, _, _| Err(RepositoryError::storage("connection reset")));
    let fx = Fixture::wired(
        store.clone(),
        Arc::new(users),
        Arc::new(store.clone()),
        Arc::new(messages),
    );

    let mut alice_client = fx.login(&alice).await;
    let bob_client = fx.login(&bob).await;
    alice_client.next_frame().await; // bob 上线通知

    bob_client.send_json(json!({
        "type": "MARK_AS_READ",
        "message": {"conversationID": convo.id.to_string(), "messageOwnerID": alice.id.to_string()}
    }));
    bob_client.send_json(json!({"type": "TYPING", "message": {"to": alice.id.to_string()}}));
    assert_eq!(
        alice_client.next_frame().await,
        ServerFrame::Typing(protocol::TypingNotice {
            to: alice.id,
            from: bob.id
        })
    );

    bob_client.hang_up().await;
    assert!(!fx.hub.is_online(bob.id));
    let ServerFrame::Offline(status) = alice_client.next_frame().await else {
        panic!("expected OFFLINE_STATUS");
    };
    assert_eq!(status.user_id, bob.id);
    alice_client.assert_idle();
}

#[tokio::test(start_paused = true)]
async fn stalled_mark_read_is_abandoned_silently() {
    let fx = Fixture::with_messages(Arc::new(StalledMessages));
    let alice = fx.user("alice").await;
    let bob = fx.user("bob").await;
    let convo = fx.converse(&alice, &bob).await;

    let mut alice_client = fx.login(&alice).await;
    let bob_client = fx.login(&bob).await;
    alice_client.next_frame().await;

    let started = tokio::time::Instant::now();
    bob_client.send_json(json!({
        "type": "MARK_AS_READ",
        "message": {"conversationID": convo.id.to_string(), "messageOwnerID": alice.id.to_string()}
    }));
    bob_client.send_json(json!({"type": "STOPPED_TYPING", "message": {"to": alice.id.to_string()}}));

    let frame = tokio::time::timeout(Duration::from_secs(10), alice_client.outbound.recv())
        .await
        .expect("typing notice after the storage budget")
        .expect("channel open");
    assert_eq!(
        frame,
        Outbound::Frame(ServerFrame::StoppedTyping(protocol::TypingNotice {
            to: alice.id,
            from: bob.id
        }))
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(fx.hub.is_online(bob.id));
}
