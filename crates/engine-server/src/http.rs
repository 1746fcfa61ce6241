//! The HTTP and WebSocket surface (spec §6): fourteen REST routes plus one
//! `/ws` event stream, all state threaded through a single `AppState`.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use engine_core::EngineError;
use engine_orchestrator::{launch_scout, CreateTaskRequest, ScoutLaunchRequest as ScoutLaunch};
use engine_providers::{ChatMessage, CompletionRequest};
use engine_types::RequestContext;
use engine_wire::{
    AgentCreate, AgentResponse, AgentUpdate, HealthDetails, HealthResponse, HumanDecision,
    SandboxModeRequest, SandboxModeResponse, ScoutLaunchRequest, ScoutLaunchResponse, TaskCreate,
    TaskListResponse, TaskResponse, ValidateKeyRequest, ValidateKeyResponse,
};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
struct PageQuery {
    skip: Option<usize>,
    limit: Option<usize>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// BYOK headers (spec §6): a request-scoped credential override, never
/// stored on `AppState` itself.
fn request_context_from_headers(headers: &HeaderMap) -> RequestContext {
    RequestContext::from_headers(
        header_value(headers, "x-openai-key"),
        header_value(headers, "x-anthropic-key"),
        header_value(headers, "x-google-key"),
    )
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn health_details(State(state): State<AppState>) -> Result<Json<HealthDetails>, ApiError> {
    let agent_count = state.agents.count().await? as u64;
    let task_count = state.tasks.count().await? as u64;
    Ok(Json(HealthDetails {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        agent_count,
        task_count,
        default_provider: state.config.llm_provider.clone(),
        default_model: state.config.llm_model.clone(),
    }))
}

async fn create_agent(
    State(state): State<AppState>,
    Json(input): Json<AgentCreate>,
) -> Result<(StatusCode, Json<AgentResponse>), ApiError> {
    let agent = state
        .agents
        .create(input.name, input.role, input.system_prompt, input.provider_id, input.model_id)
        .await?;
    Ok((StatusCode::CREATED, Json(agent.into())))
}

async fn list_agents(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<AgentResponse>>, ApiError> {
    let agents = state.agents.list(page.skip.unwrap_or(0), page.limit.unwrap_or(100)).await?;
    Ok(Json(agents.into_iter().map(Into::into).collect()))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentResponse>, ApiError> {
    let agent = state
        .agents
        .get(&id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("agent {id}")))?;
    Ok(Json(agent.into()))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<AgentUpdate>,
) -> Result<Json<AgentResponse>, ApiError> {
    let agent = state
        .agents
        .update(&id, input.name, input.system_prompt, input.provider_id, input.model_id, input.status)
        .await?;
    Ok(Json(agent.into()))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.agents.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(EngineError::not_found(format!("agent {id}")).into())
    }
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<TaskCreate>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let ctx = request_context_from_headers(&headers);
    let task = state
        .tasks
        .create_task(
            CreateTaskRequest {
                description: input.description,
                assigned_agents: input.assigned_agents,
                parent_task_id: input.parent_task_id,
                spawned_by_agent: input.spawned_by_agent,
                requires_human_approval: input.requires_human_approval,
                max_revisions: input.max_revisions,
            },
            ctx,
        )
        .await?;
    Ok((StatusCode::CREATED, Json((&task).into())))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<TaskListResponse>>, ApiError> {
    let tasks = state.tasks.list(page.skip.unwrap_or(0), page.limit.unwrap_or(100)).await?;
    Ok(Json(tasks.iter().map(Into::into).collect()))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state.tasks.get(&id).await?;
    Ok(Json((&task).into()))
}

async fn approve_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<HumanDecision>,
) -> Result<Json<TaskResponse>, ApiError> {
    let ctx = request_context_from_headers(&headers);
    let task = state.tasks.approve(&id, input.decision, input.feedback, ctx).await?;
    Ok(Json((&task).into()))
}

async fn scout_launch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ScoutLaunchRequest>,
) -> Result<Json<ScoutLaunchResponse>, ApiError> {
    let ctx = request_context_from_headers(&headers);
    let result = launch_scout(
        &state.tasks,
        ScoutLaunch { agent_id: input.agent_id, num_tasks: input.num_tasks, max_depth: input.max_depth },
        ctx,
    )
    .await?;
    Ok(Json(ScoutLaunchResponse {
        root_task_id: result.root_task_id,
        spawned_task_ids: result.spawned_task_ids,
    }))
}

/// A contract stub (spec §6): routes through the same `Provider` boundary
/// used everywhere else rather than a bespoke per-vendor HTTP client.
async fn validate_key(
    State(state): State<AppState>,
    Json(input): Json<ValidateKeyRequest>,
) -> Json<ValidateKeyResponse> {
    let provider = match state.providers.get(&input.provider) {
        Ok(provider) => provider,
        Err(err) => return Json(ValidateKeyResponse { valid: false, error: Some(err.to_string()) }),
    };

    let request = CompletionRequest {
        system_prompt: "validate credential".to_string(),
        messages: vec![ChatMessage::user("ping")],
        model: state.config.llm_model.clone(),
    };
    match provider.complete(request, Some(&input.key)).await {
        Ok(_) => Json(ValidateKeyResponse { valid: true, error: None }),
        Err(err) => Json(ValidateKeyResponse { valid: false, error: Some(err.to_string()) }),
    }
}

/// Another contract stub: the sandbox itself is an out-of-scope external
/// collaborator, so this just accepts/reflects an opaque mode.
async fn get_sandbox_mode(State(state): State<AppState>) -> Json<SandboxModeResponse> {
    Json(SandboxModeResponse { mode: state.sandbox_mode.read().await.clone() })
}

async fn put_sandbox_mode(
    State(state): State<AppState>,
    Json(input): Json<SandboxModeRequest>,
) -> Result<Json<SandboxModeResponse>, ApiError> {
    if input.mode != "local" && input.mode != "docker" {
        return Err(EngineError::validation(format!("unknown sandbox mode: {}", input.mode)).into());
    }
    *state.sandbox_mode.write().await = input.mode.clone();
    Ok(Json(SandboxModeResponse { mode: input.mode }))
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_stream(socket, state))
}

/// Forwards broadcast-fabric events as text frames, with a periodic
/// `{"type":"ping"}` heartbeat when the stream has been idle.
async fn ws_stream(mut socket: WebSocket, state: AppState) {
    let (subscriber_id, mut rx) = state.broadcast.subscribe(64).await;
    let heartbeat = state.config.ws_heartbeat_interval();

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(heartbeat) => {
                if socket.send(Message::Text(r#"{"type":"ping"}"#.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.broadcast.unsubscribe(subscriber_id).await;
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/details", get(health_details))
        .route("/api/agents", post(create_agent).get(list_agents))
        .route(
            "/api/agents/{id}",
            get(get_agent).patch(update_agent).delete(delete_agent),
        )
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/approve", post(approve_task))
        .route("/api/scout/launch", post(scout_launch))
        .route("/api/settings/validate-key", post(validate_key))
        .route(
            "/api/settings/sandbox-mode",
            get(get_sandbox_mode).put(put_sandbox_mode),
        )
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Spawns the broadcast fabric's single consumer loop, serves the router
/// until interrupted, then drains in-flight FSM runs before returning.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let consumer = state.broadcast.spawn_consumer(state.event_bus.clone());
    let app = app_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "engine server listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    consumer.abort();
    state.tasks.shutdown().await;
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use engine_core::EngineConfig;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        std::env::set_var("STORAGE_BACKEND", "memory");
        AppState::new(EngineConfig::from_env()).await.unwrap()
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let state = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_agent_returns_404() {
        let state = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_agent_then_list_round_trips() {
        let state = test_state().await;
        let app = app_router(state);
        let body = serde_json::json!({
            "name": "Worker1",
            "role": "worker",
            "provider_id": "stub",
            "model_id": "stub-model"
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(Request::builder().uri("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
