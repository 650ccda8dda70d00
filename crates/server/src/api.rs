//! JSON API over [`CoachRuntime`].
//!
//! Endpoints:
//! - `POST   /v1/turns`                               one conversational turn
//! - `POST   /v1/jobs`                                submit a background job
//! - `GET    /v1/jobs/{task_id}`                      poll a job
//! - `POST   /v1/interviews`                          start an interview session
//! - `POST   /v1/interviews/{session_id}/answers`     answer the current question
//! - `GET    /v1/interviews/{session_id}`             read a session
//! - `POST   /v1/users/{user_id}/applications`        track an application
//! - `GET    /v1/users/{user_id}/applications`        list (optional `?status=`)
//! - `GET    /v1/applications/{application_id}`       read
//! - `PATCH  /v1/applications/{application_id}`       update status/notes/url
//! - `DELETE /v1/applications/{application_id}`       delete
//!
//! Every error body is `{error, message, correlation_id}`. The correlation id
//! is taken from `x-correlation-id` when the caller sends one.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use careercoach_agent::session::{StartRequest, DEFAULT_LEVEL, DEFAULT_ROLE};
use careercoach_agent::{CoachRuntime, NewApplication, TaskStatus, TurnReply, TurnRequest};
use careercoach_core::context::TurnAttachments;
use careercoach_core::domain::application::{
    ApplicationChanges, ApplicationId, ApplicationStatus, JobApplication,
};
use careercoach_core::domain::profile::UserId;
use careercoach_core::domain::session::{
    AnswerRecord, InterviewQuestion, InterviewSession, QuestionId, SessionId, SessionStatus,
    SessionSummary,
};
use careercoach_core::domain::task::{TaskId, TaskState};
use careercoach_core::errors::{ApplicationError, InterfaceError};

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<CoachRuntime>,
}

pub fn router(runtime: Arc<CoachRuntime>) -> Router {
    Router::new()
        .route("/v1/turns", post(post_turn))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/{task_id}", get(job_status))
        .route("/v1/interviews", post(start_interview))
        .route("/v1/interviews/{session_id}", get(get_interview))
        .route("/v1/interviews/{session_id}/answers", post(submit_answer))
        .route("/v1/users/{user_id}/applications", post(create_application).get(list_applications))
        .route(
            "/v1/applications/{application_id}",
            get(get_application).patch(update_application).delete(delete_application),
        )
        .with_state(ApiState { runtime })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_app(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest { message: message.into(), correlation_id: correlation_id.to_string() })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InterfaceError::ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        // Backend detail stays in the logs for 5xx responses.
        let message = if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = self.0.correlation_id(),
                error = %self.0,
                "request failed"
            );
            self.0.user_message().to_string()
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = self.0.correlation_id(),
                error = %self.0,
                "request rejected"
            );
            self.0.message().to_string()
        };

        let body = ErrorBody { error, message, correlation_id: self.0.correlation_id().to_string() };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| format!("req-{}", Uuid::new_v4()), str::to_string)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> ApiResult<T> {
    payload.map(|Json(body)| body).map_err(|rejection| ApiError::bad_request(rejection.body_text(), correlation_id))
}

fn parse_status(raw: Option<&str>, correlation_id: &str) -> ApiResult<Option<ApplicationStatus>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => ApplicationStatus::parse(value).map(Some).ok_or_else(|| {
            ApiError::bad_request(
                format!("unknown status `{value}`; expected applied, interviewing, offer, rejected or withdrawn"),
                correlation_id,
            )
        }),
    }
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    #[serde(alias = "request_text")]
    pub message: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub resume_text: Option<String>,
    pub job_description: Option<String>,
    pub location: Option<String>,
    pub role: Option<String>,
    pub level: Option<String>,
    pub question_count: Option<usize>,
    pub remote_ok: Option<bool>,
}

async fn post_turn(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<TurnBody>, JsonRejection>,
) -> ApiResult<Json<TurnReply>> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;

    let reply = state
        .runtime
        .handle_turn(TurnRequest {
            request_text: body.message,
            user_id: body.user_id,
            session_id: body.session_id,
            attachments: TurnAttachments {
                resume_text: body.resume_text,
                job_description: body.job_description,
                location: body.location,
                role: body.role,
                level: body.level,
                question_count: body.question_count,
                remote_ok: body.remote_ok,
            },
            correlation_id: Some(correlation_id.clone()),
        })
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(reply))
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JobBody {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub task_id: TaskId,
    pub state: TaskState,
    pub correlation_id: String,
}

async fn submit_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<JobBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;

    let task_id = state
        .runtime
        .submit_job(body.kind.trim(), body.payload, &correlation_id)
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { task_id, state: TaskState::Queued, correlation_id })))
}

async fn job_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskStatus>> {
    let correlation_id = correlation_id(&headers);
    let status = state
        .runtime
        .job_status(&TaskId(task_id))
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(status))
}

// ---------------------------------------------------------------------------
// Interviews
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartInterviewBody {
    pub user_id: String,
    pub session_id: Option<String>,
    pub role: Option<String>,
    pub level: Option<String>,
    pub question_count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InterviewStarted {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub role: String,
    pub level: String,
    pub question_count: usize,
    pub first_question: InterviewQuestion,
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct AnswerAccepted {
    pub session_id: SessionId,
    pub answered: AnswerRecord,
    pub next_question: Option<InterviewQuestion>,
    pub session_complete: bool,
    pub summary: Option<SessionSummary>,
}

async fn start_interview(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<StartInterviewBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InterviewStarted>)> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;
    if body.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id must not be empty", &correlation_id));
    }

    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let started = state
        .runtime
        .start_interview(StartRequest {
            session_id: SessionId(session_id),
            user_id: UserId(body.user_id.trim().to_string()),
            role: body.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            level: body.level.unwrap_or_else(|| DEFAULT_LEVEL.to_string()),
            question_count: body.question_count,
        })
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;

    let session = started.session;
    Ok((
        StatusCode::CREATED,
        Json(InterviewStarted {
            session_id: session.id,
            status: session.status,
            role: session.role,
            level: session.level,
            question_count: session.questions.len(),
            first_question: started.first_question,
        }),
    ))
}

async fn submit_answer(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    payload: Result<Json<AnswerBody>, JsonRejection>,
) -> ApiResult<Json<AnswerAccepted>> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;

    let outcome = state
        .runtime
        .submit_interview_answer(&SessionId(session_id), &QuestionId(body.question_id), &body.answer)
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;

    Ok(Json(AnswerAccepted {
        summary: outcome.summary().cloned(),
        session_id: outcome.session.id,
        answered: outcome.answered,
        next_question: outcome.next_question,
        session_complete: outcome.session_complete,
    }))
}

async fn get_interview(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<Json<InterviewSession>> {
    let correlation_id = correlation_id(&headers);
    let session = state
        .runtime
        .interview(&SessionId(session_id))
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(session))
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApplicationBody {
    pub company_name: String,
    pub position_title: String,
    pub job_url: Option<String>,
    pub status: Option<String>,
    pub application_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationPatch {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub job_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<String>,
}

async fn create_application(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    payload: Result<Json<ApplicationBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobApplication>)> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;
    let status = parse_status(body.status.as_deref(), &correlation_id)?;

    let application = state
        .runtime
        .create_application(NewApplication {
            user_id: UserId(user_id),
            company_name: body.company_name,
            position_title: body.position_title,
            job_url: body.job_url,
            status,
            application_date: body.application_date,
            notes: body.notes,
        })
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_applications(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<ApplicationQuery>,
) -> ApiResult<Json<Vec<JobApplication>>> {
    let correlation_id = correlation_id(&headers);
    let status = parse_status(query.status.as_deref(), &correlation_id)?;
    let applications = state
        .runtime
        .applications(&UserId(user_id), status)
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(applications))
}

async fn get_application(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> ApiResult<Json<JobApplication>> {
    let correlation_id = correlation_id(&headers);
    let application = state
        .runtime
        .application(&ApplicationId(application_id))
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(application))
}

async fn update_application(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    payload: Result<Json<ApplicationPatch>, JsonRejection>,
) -> ApiResult<Json<JobApplication>> {
    let correlation_id = correlation_id(&headers);
    let body = json_body(payload, &correlation_id)?;
    let changes = ApplicationChanges {
        status: parse_status(body.status.as_deref(), &correlation_id)?,
        notes: body.notes,
        job_url: body.job_url,
    };

    let application = state
        .runtime
        .update_application(&ApplicationId(application_id), changes)
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(Json(application))
}

async fn delete_application(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id(&headers);
    state
        .runtime
        .delete_application(&ApplicationId(application_id))
        .await
        .map_err(|error| ApiError::from_app(error, &correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use careercoach_agent::geo::StaticGeoLocator;
    use careercoach_agent::llm::LlmClient;
    use careercoach_agent::{CoachRuntime, CoachStores};
    use careercoach_core::config::AppConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    struct OfflineLlm;

    #[async_trait]
    impl LlmClient for OfflineLlm {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Err(anyhow!("generation backend offline"))
        }
    }

    fn app() -> Router {
        let runtime = CoachRuntime::builder(AppConfig::default(), CoachStores::in_memory())
            .llm(Arc::new(OfflineLlm))
            .geo(Arc::new(StaticGeoLocator::disabled()))
            .build()
            .expect("runtime");
        router(Arc::new(runtime))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-correlation-id", "corr-test")
            .body(body.map_or_else(Body::empty, |body| Body::from(body.to_string())))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, value)
    }

    #[tokio::test]
    async fn turn_endpoint_always_answers() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/v1/turns",
            Some(json!({ "message": "Any tips for salary negotiation?", "user_id": "user-1" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "knowledge");
        assert_eq!(body["correlation_id"], "corr-test");
        assert!(!body["response"].as_str().unwrap_or_default().is_empty());
        assert_eq!(body["path"], json!(["router", "knowledge", "memory", "respond"]));
    }

    #[tokio::test]
    async fn malformed_and_empty_turns_are_bad_requests() {
        let app = app();

        let (status, body) = call(&app, "POST", "/v1/turns", Some(json!({ "user_id": "user-1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
        assert_eq!(body["correlation_id"], "corr-test");

        let (status, _) =
            call(&app, "POST", "/v1/turns", Some(json!({ "message": "  ", "user_id": "user-1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn out_of_order_answers_are_conflicts_naming_the_expected_question() {
        let app = app();

        let (status, started) = call(
            &app,
            "POST",
            "/v1/interviews",
            Some(json!({ "user_id": "user-2", "session_id": "s-1", "question_count": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(started["first_question"]["id"], "q1");

        let (status, body) = call(
            &app,
            "POST",
            "/v1/interviews/s-1/answers",
            Some(json!({ "question_id": "q2", "answer": "Skipping ahead" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["message"].as_str().unwrap_or_default().contains("expected question `q1`"));

        let (status, body) = call(
            &app,
            "POST",
            "/v1/interviews/s-1/answers",
            Some(json!({ "question_id": "q1", "answer": "I measured before optimising." })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_complete"], false);
        assert_eq!(body["next_question"]["id"], "q2");

        let (status, _) = call(&app, "GET", "/v1/interviews/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn jobs_are_accepted_and_unknown_ids_are_not_found() {
        let app = app();

        let (status, body) =
            call(&app, "POST", "/v1/jobs", Some(json!({ "kind": "resume_audit", "payload": {} }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["state"], "queued");
        let task_id = body["task_id"].as_str().expect("task id").to_string();

        let (status, body) = call(&app, "GET", &format!("/v1/jobs/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task_id"], task_id);

        let (status, _) = call(&app, "POST", "/v1/jobs", Some(json!({ "kind": "teleport" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "GET", "/v1/jobs/does-not-exist", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn application_crud_round_trip() {
        let app = app();

        let (status, created) = call(
            &app,
            "POST",
            "/v1/users/user-3/applications",
            Some(json!({ "company_name": "Acme", "position_title": "Backend Engineer" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "applied");
        let id = created["id"].as_str().expect("id").to_string();

        let (status, updated) = call(
            &app,
            "PATCH",
            &format!("/v1/applications/{id}"),
            Some(json!({ "status": "offer", "notes": "Verbal offer" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "offer");

        let (status, listed) = call(&app, "GET", "/v1/users/user-3/applications?status=offer", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().map(Vec::len), Some(1));

        let (status, _) = call(&app, "GET", "/v1/users/user-3/applications?status=ghosted", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "DELETE", &format!("/v1/applications/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/v1/applications/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
