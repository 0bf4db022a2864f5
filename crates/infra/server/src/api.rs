//! HTTP API over the webhook system.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use league_events::{Event, EventEmitter, EventKind, SharedEventEmitter};
use league_webhooks::{
    Alert, AnalyticsRecord, HealthRecord, ListQuery, NewSubscription, RetryRecord, SortOrder,
    Subscription, SubscriptionFilter, SubscriptionPatch, SubscriptionSort, WebhookError, WebhookResult,
    WebhookSystem,
};

/// Shared state of the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<WebhookSystem>,
    pub events: SharedEventEmitter,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks", post(create_subscription).get(list_subscriptions))
        .route(
            "/webhooks/{id}",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .route("/webhooks/{id}/disable", post(disable_subscription))
        .route("/webhooks/{id}/verify", post(verify_subscription))
        .route("/webhooks/{id}/health", get(subscription_health))
        .route("/webhooks/{id}/analytics", get(subscription_analytics))
        .route("/webhooks/{id}/retries", get(subscription_retries))
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}", delete(acknowledge_alert))
        .route("/event-kinds", get(event_kinds))
        .route("/events", post(emit_event))
        .with_state(state)
}

/// Wrapper for WebhookError that implements IntoResponse.
pub struct ApiError(pub WebhookError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "code": code
        });

        (status, Json(body)).into_response()
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError(err)
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Subscription as returned by the API; the secret is never echoed.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub id: String,
    pub url: String,
    pub events: BTreeSet<EventKind>,
    pub team_id: Option<i64>,
    pub player_id: Option<i64>,
    pub active: bool,
    pub retry_count: u32,
    pub retry_delay: u32,
    pub rate_limit: u32,
    pub last_retry: Option<String>,
    pub last_error: Option<String>,
    pub verified_at: Option<String>,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Subscription> for SubscriptionView {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            url: s.url,
            events: s.events,
            team_id: s.team_id,
            player_id: s.player_id,
            active: s.active,
            retry_count: s.retry_count,
            retry_delay: s.retry_delay,
            rate_limit: s.rate_limit,
            last_retry: s.last_retry.map(|t| t.to_rfc3339()),
            last_error: s.last_error,
            verified_at: s.verified_at.map(|t| t.to_rfc3339()),
            version: s.version,
            created_at: s.created_at.to_rfc3339(),
            updated_at: s.updated_at.to_rfc3339(),
        }
    }
}

/// Subscription list response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<SubscriptionView>,
    pub count: usize,
}

/// Query string of `GET /webhooks`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub team_id: Option<i64>,
    pub player_id: Option<i64>,
    pub event: Option<String>,
    pub active: Option<bool>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn into_query(self) -> WebhookResult<ListQuery> {
        let event = self
            .event
            .map(|e| {
                e.parse::<EventKind>()
                    .map_err(|_| WebhookError::validation(format!("unknown event kind '{}'", e)))
            })
            .transpose()?;

        Ok(ListQuery {
            filter: SubscriptionFilter {
                team_id: self.team_id,
                player_id: self.player_id,
                event,
                active: self.active,
            },
            sort: self
                .sort
                .as_deref()
                .map(str::parse::<SubscriptionSort>)
                .transpose()?
                .unwrap_or_default(),
            order: self
                .order
                .as_deref()
                .map(str::parse::<SortOrder>)
                .transpose()?
                .unwrap_or_default(),
            offset: self.offset.unwrap_or(0),
            limit: self.limit,
        })
    }
}

/// Body of `POST /events`.
#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub team_id: Option<i64>,
    pub player_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EmitResponse {
    event_id: String,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<SubscriptionView>)> {
    let subscription = state.system.create(request).await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<SubscriptionListResponse>> {
    let query = params.into_query()?;
    let subscriptions: Vec<SubscriptionView> = state
        .system
        .list(&query)
        .await?
        .into_iter()
        .map(SubscriptionView::from)
        .collect();

    Ok(Json(SubscriptionListResponse {
        count: subscriptions.len(),
        subscriptions,
    }))
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.system.get(&id).await?.into()))
}

async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SubscriptionPatch>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.system.update(&id, patch).await?.into()))
}

async fn delete_subscription(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.system.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disable_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.system.disable(&id).await?.into()))
}

async fn verify_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.system.verify(&id).await?.into()))
}

async fn subscription_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HealthRecord>> {
    Ok(Json(state.system.health(&id).await?))
}

async fn subscription_analytics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalyticsRecord>> {
    Ok(Json(state.system.analytics(&id).await?))
}

async fn subscription_retries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RetryRecord>>> {
    Ok(Json(state.system.pending_retries(&id).await?))
}

async fn list_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.system.alerts().await)
}

async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.system.acknowledge_alert(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WebhookError::NotFound(format!("alert {}", id)).into())
    }
}

async fn event_kinds() -> Json<Vec<&'static str>> {
    Json(EventKind::ALL.iter().map(|kind| kind.as_str()).collect())
}

async fn emit_event(
    State(state): State<AppState>,
    Json(request): Json<EmitRequest>,
) -> (StatusCode, Json<EmitResponse>) {
    let mut event = Event::new(request.kind, request.payload);
    if let Some(team_id) = request.team_id {
        event = event.with_team(team_id);
    }
    if let Some(player_id) = request.player_id {
        event = event.with_player(player_id);
    }

    let event_id = event.id.clone();
    state.events.emit(event).await;
    (StatusCode::ACCEPTED, Json(EmitResponse { event_id }))
}
