use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, Request, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::ReviewError;
use crate::metrics::track_metrics;

use super::lifecycle::PullRequestLifecycle;
use super::models::{NewTeam, PullRequest, PullRequestShort, Team, User};
use super::roster::Roster;

pub const TOKEN_HEADER: &str = "token";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub lifecycle: PullRequestLifecycle,
    pub roster: Roster,
    pub auth: AuthTokens,
    pub metrics: PrometheusHandle,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Static bearer tokens for the two caller roles.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    admin: String,
    user: String,
}

impl AuthTokens {
    pub fn new(admin: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            admin: admin.into().trim().to_string(),
            user: user.into().trim().to_string(),
        }
    }

    /// Resolve a presented token. Surrounding whitespace and ASCII case are
    /// ignored; the admin token wins if both roles share a value.
    pub fn role_for(&self, token: &str) -> Option<Role> {
        let token = token.trim();
        if token.is_empty() {
            None
        } else if token.eq_ignore_ascii_case(&self.admin) {
            Some(Role::Admin)
        } else if token.eq_ignore_ascii_case(&self.user) {
            Some(Role::User)
        } else {
            None
        }
    }

    fn role_from_headers(&self, headers: &HeaderMap) -> Option<Role> {
        headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|t| self.role_for(t))
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TeamQuery {
    pub team_name: String,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct SetIsActiveRequest {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct CreatePrRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

#[derive(Deserialize)]
pub struct MergePrRequest {
    pub pull_request_id: String,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub pull_request_id: String,
    #[serde(alias = "old_reviewer_id")]
    pub old_user_id: String,
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct TeamResponse {
    pub team: Team,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Serialize)]
pub struct UserReviewsResponse {
    pub user_id: String,
    pub pull_requests: Vec<PullRequestShort>,
}

#[derive(Serialize)]
pub struct PrResponse {
    pub pr: PullRequest,
}

#[derive(Serialize)]
pub struct ReassignResponse {
    pub pr: PullRequest,
    pub replaced_by: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Review(ReviewError),
    BadRequest(String),
    Unauthorized,
    Forbidden,
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        ApiError::Review(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn review_status(err: &ReviewError) -> StatusCode {
    match err {
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ReviewError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        e if e.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Review(ReviewError::Internal(source)) => {
                error!(error = %format!("{:#}", source), "Request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "internal server error".to_string(),
                )
            }
            ApiError::Review(err) => (review_status(&err), err.code(), err.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or invalid token".to_string(),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "admin token required".to_string(),
            ),
        };
        (
            status,
            Json(serde_json::json!({"error": {"code": code, "message": message}})),
        )
            .into_response()
    }
}

fn require_field(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ── Auth middleware ───────────────────────────────────────────────────

async fn require_admin(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.auth.role_from_headers(req.headers()) {
        Some(Role::Admin) => Ok(next.run(req).await),
        _ => Err(ApiError::Forbidden),
    }
}

async fn require_member(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.auth.role_from_headers(req.headers()) {
        Some(_) => Ok(next.run(req).await),
        None => Err(ApiError::Unauthorized),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router(state: &SharedState) -> Router<SharedState> {
    let admin = Router::new()
        .route("/team/add", post(add_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let member = Router::new()
        .route("/team/get", get(get_team))
        .route("/users/getReview", get(get_user_reviews))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_member));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .merge(admin)
        .merge(member)
        .route_layer(middleware::from_fn(track_metrics))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn add_team(
    State(state): State<SharedState>,
    payload: Result<Json<NewTeam>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(team) = payload?;
    let team = state.roster.create_team(team).await?;
    Ok((StatusCode::CREATED, Json(TeamResponse { team })))
}

async fn get_team(
    State(state): State<SharedState>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(q) = query?;
    require_field(&q.team_name, "team_name")?;
    let team = state.roster.get_team(&q.team_name).await?;
    Ok(Json(TeamResponse { team }))
}

async fn set_is_active(
    State(state): State<SharedState>,
    payload: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_field(&req.user_id, "user_id")?;
    let user = state.roster.set_user_active(&req.user_id, req.is_active).await?;
    Ok(Json(UserResponse { user }))
}

async fn get_user_reviews(
    State(state): State<SharedState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(q) = query?;
    require_field(&q.user_id, "user_id")?;
    let pull_requests = state.roster.user_reviews(&q.user_id).await?;
    Ok(Json(UserReviewsResponse {
        user_id: q.user_id,
        pull_requests,
    }))
}

async fn create_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<CreatePrRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_field(&req.pull_request_id, "pull_request_id")?;
    require_field(&req.pull_request_name, "pull_request_name")?;
    require_field(&req.author_id, "author_id")?;
    let pr = state
        .lifecycle
        .create_pull_request(&req.pull_request_id, &req.pull_request_name, &req.author_id)
        .await?;
    Ok((StatusCode::CREATED, Json(PrResponse { pr })))
}

async fn merge_pull_request(
    State(state): State<SharedState>,
    payload: Result<Json<MergePrRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_field(&req.pull_request_id, "pull_request_id")?;
    let pr = state.lifecycle.merge_pull_request(&req.pull_request_id).await?;
    Ok(Json(PrResponse { pr }))
}

async fn reassign_reviewer(
    State(state): State<SharedState>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    require_field(&req.pull_request_id, "pull_request_id")?;
    require_field(&req.old_user_id, "old_user_id")?;
    let (pr, replaced_by) = state
        .lifecycle
        .reassign_reviewer(&req.pull_request_id, &req.old_user_id)
        .await?;
    Ok(Json(ReassignResponse { pr, replaced_by }))
}
