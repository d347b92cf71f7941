#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::MemoryStore;
use config::{AppConfig, StorageBackend};
use futures_util::{SinkExt, StreamExt};
use infrastructure::BcryptPasswordHasher;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, Repositories};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_WAIT: Duration = Duration::from_secs(3);

/// 在随机端口上运行的完整服务，使用内存存储
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

pub struct Registered {
    pub id: String,
    pub access_token: String,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env_with_defaults();
    config.storage = StorageBackend::Memory;
    config.server.allowed_origins = vec!["http://localhost:5173".to_owned()];
    config.hub.handshake_timeout_secs = 5;
    config.hub.storage_timeout_secs = 5;
    config
}

pub async fn spawn_server() -> TestServer {
    let config = test_config();
    let store = MemoryStore::new();
    let repositories = Repositories {
        users: Arc::new(store.clone()),
        conversations: Arc::new(store.clone()),
        messages: Arc::new(store),
    };
    let state = AppState::assemble(
        &config,
        repositories,
        Arc::new(BcryptPasswordHasher::new(Some(4))),
    );
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        client: Client::builder()
            .cookie_store(true)
            .build()
            .expect("client"),
        shutdown: Some(shutdown_tx),
    }
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn register(&self, username: &str) -> Registered {
        let response = self
            .client
            .post(self.http("/auth/users"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "secret-password",
            }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201, "register {username}");

        let body: Value = response.json().await.expect("register json");
        Registered {
            id: body["user"]["id"].as_str().expect("user id").to_owned(),
            access_token: body["access_token"].as_str().expect("token").to_owned(),
        }
    }

    pub async fn create_conversation(&self, owner: &Registered, other: &Registered) -> Value {
        let response = self
            .client
            .post(self.http("/authenticated/conversations"))
            .bearer_auth(&owner.access_token)
            .json(&json!({ "user1": owner.id, "user2": other.id }))
            .send()
            .await
            .expect("create conversation");
        assert_eq!(response.status(), 201);
        response.json().await.expect("conversation json")
    }

    /// 建立连接并完成握手，返回前已消费 `WELCOME`
    pub async fn connect(&self, token: &str) -> WsStream {
        let mut ws = self.connect_raw().await;
        send_json(&mut ws, json!({ "message": { "token": token } })).await;
        let welcome = next_frame(&mut ws).await;
        assert_eq!(welcome["type"], "WELCOME", "unexpected frame: {welcome}");
        ws
    }

    pub async fn connect_raw(&self) -> WsStream {
        let (ws, _) = connect_async(self.ws_url()).await.expect("ws connect");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(TungsteniteMessage::text(value.to_string()))
        .await
        .expect("ws send");
}

/// 下一条文本帧，解析为 JSON
pub async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let message = tokio::time::timeout(FRAME_WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        match message {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame json")
            }
            TungsteniteMessage::Close(_) => panic!("connection closed while waiting for frame"),
            _ => continue,
        }
    }
}

/// 等待服务端关闭连接；期间收到的文本帧按顺序返回
pub async fn drain_until_closed(ws: &mut WsStream) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        match tokio::time::timeout(FRAME_WAIT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(TungsteniteMessage::Text(text))) => {
                frames.push(serde_json::from_str(text.as_str()).expect("frame json"))
            }
            Some(Ok(TungsteniteMessage::Close(_))) | None | Some(Err(_)) => return frames,
            Some(Ok(_)) => {}
        }
    }
}

/// 断言短时间内没有新的文本帧
pub async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) =
        tokio::time::timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("unexpected frame: {}", text.as_str());
    }
}
