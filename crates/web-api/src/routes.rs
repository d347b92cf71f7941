use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, FromRequestParts, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use validator::Validate;

use application::{
    hub::protocol::ConversationView, AuthenticateUserRequest, CreateConversationRequest,
    RegisterUserRequest, UserSummary,
};
use domain::{ChatMessage, Conversation, UserId};

use crate::{auth::LoginResponse, error::ApiError, state::AppState, ws_connection};

const REFRESH_COOKIE: &str = "refresh_token";
const CLEARED_COOKIE: &str = "refresh_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0";

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 50))]
    username: String,
    #[validate(length(min = 1))]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(length(min = 1))]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateConversationPayload {
    #[validate(length(min = 1))]
    user1: String,
    #[validate(length(min = 1))]
    user2: String,
}

#[derive(Debug, Deserialize, Validate)]
struct SearchPayload {
    #[validate(length(min = 1, max = 50))]
    query: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    with_id: String,
}

/// 通过 `Authorization: Bearer` 访问令牌认证的当前用户
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .jwt_service
            .extract_user_from_headers(&parts.headers)
            .map(AuthUser)
    }
}

fn validated<T: Validate>(payload: T) -> Result<T, ApiError> {
    payload
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    Ok(payload)
}

pub fn router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/auth", auth_routes())
        .nest("/authenticated", authenticated_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/token", post(create_token))
        .route("/refresh", post(refresh_token))
}

fn authenticated_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/mine", get(my_conversations))
        .route("/messages", get(message_history))
        .route("/users/search", post(search_users))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| ws_connection::serve_socket(socket, hub))
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let payload = validated(payload)?;
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let access_token = state.jwt_service.issue_access(user.id)?;
    Ok((StatusCode::CREATED, Json(LoginResponse { user, access_token })))
}

async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, ApiError> {
    let payload = validated(payload)?;
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let access_token = state.jwt_service.issue_access(user.id)?;
    let refresh_token = state.jwt_service.issue_refresh(user.id)?;
    let cookie = refresh_cookie(&refresh_token, state.jwt_service.refresh_ttl().num_seconds())?;

    tracing::info!(user_id = %user.id, "issued token pair");
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse { user, access_token }),
    )
        .into_response())
}

async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match renew_access(&state, &headers).await {
        Ok(body) => Json(body).into_response(),
        Err(err) if err.status() == StatusCode::UNAUTHORIZED => {
            let mut response = err.into_response();
            response
                .headers_mut()
                .insert(header::SET_COOKIE, HeaderValue::from_static(CLEARED_COOKIE));
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn renew_access(state: &AppState, headers: &HeaderMap) -> Result<LoginResponse, ApiError> {
    let raw = read_cookie(headers, REFRESH_COOKIE)
        .ok_or_else(|| ApiError::unauthorized("no refresh token"))?;
    let claims = state
        .jwt_service
        .verify_refresh(&raw)
        .map_err(|_| ApiError::unauthorized("invalid refresh token"))?;
    let user_id =
        UserId::parse(&claims.sub, "sub").map_err(|_| ApiError::unauthorized("invalid token claims"))?;
    let user = state
        .user_service
        .get(user_id)
        .await
        .map_err(|err| match err.status_code() {
            404 => ApiError::unauthorized("user not found"),
            _ => err.into(),
        })?;

    let access_token = state.jwt_service.issue_access(user.id)?;
    Ok(LoginResponse { user, access_token })
}

fn refresh_cookie(token: &str, max_age: i64) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!(
        "{REFRESH_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    ))
    .map_err(|_| ApiError::internal_server_error("failed to build refresh cookie"))
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
        .filter(|value| !value.is_empty())
}

async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let payload = validated(payload)?;
    let request = CreateConversationRequest {
        user1: UserId::parse(&payload.user1, "user1")?,
        user2: UserId::parse(&payload.user2, "user2")?,
    };

    let conversation = state
        .conversation_service
        .create(requester, request)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn my_conversations(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let items = state.conversation_service.list(requester).await?;
    Ok(Json(items))
}

async fn message_history(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let with = UserId::parse(&query.with_id, "with_id")?;
    let items = state.conversation_service.history(requester, with).await?;
    Ok(Json(items))
}

async fn search_users(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let payload = validated(payload)?;
    let items = state
        .user_service
        .search(requester, &payload.query)
        .await?;
    Ok(Json(items))
}
