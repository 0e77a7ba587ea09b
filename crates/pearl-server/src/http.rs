//! The axum HTTP gateway: chat completions (streaming and aggregated), models,
//! memories CRUD, and health, plus the auth middleware that gates everything
//! but the health endpoints.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use futures_util::StreamExt;

use pearl_backends::chat::FinishReason;
use pearl_core::{Memory, Scope};
use pearl_store::{QueryFilter, Store};

use crate::error::ApiError;
use crate::orchestrator::{Orchestrator, parse_memory_type};
use crate::wire::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, CreateMemoryRequest, HealthResponse,
    ListMemoriesQuery, MemoriesResponse, ModelEntry, ModelsResponse, PearlInfo, PerformanceInfo, RoutingInfo, Usage,
    as_wire_message,
};

const REQUESTING_AGENT_HEADER: &str = "x-agent-id";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
    pub version: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    let cors_any = state.orchestrator.config().server.cors_allow_any;

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/v1/health", get(health));

    let mut api_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/v1/memories", get(list_memories).post(create_memory))
        .route("/v1/memories/{id}", delete(delete_memory));

    if state.orchestrator.config().server.auth_enabled {
        api_routes = api_routes.layer(middleware::from_fn_with_state(state.clone(), auth_gate));
    }

    let mut app = Router::new().merge(health_routes).merge(api_routes).with_state(state);

    if cors_any {
        app = app.layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }

    app.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Checks the configured header or a bearer token against the configured key
/// before any handler in `api_routes` runs. Fails closed (503) when auth is
/// enabled but no key is configured.
async fn auth_gate(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    let config = &state.orchestrator.config().server;
    let Some(expected) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return ApiError::AuthNotConfigured.into_response();
    };

    let presented = headers
        .get(config.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    match presented {
        Some(token) if token == expected => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        pearl_initialized: true,
    })
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let mut data = vec![
        ModelEntry { id: "auto".to_string(), object: "model", owned_by: "pearl" },
        ModelEntry { id: "pearl".to_string(), object: "model", owned_by: "pearl" },
    ];
    for prefix in state.orchestrator.registry().prefixes() {
        if let Ok(backend) = state.orchestrator.registry().resolve(&prefix) {
            if let Ok(models) = backend.models().await {
                for model in models {
                    data.push(ModelEntry {
                        id: format!("{prefix}/{model}"),
                        object: "model",
                        owned_by: "pearl",
                    });
                }
            }
        }
    }
    Json(ModelsResponse { object: "list", data })
}

/// Dispatches to the orchestrator, then either relays chunks as SSE (when
/// `stream: true`) or aggregates the full stream into one JSON body.
async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::Validation("messages must not be empty".to_string()));
    }

    let started = Instant::now();
    let handle = state.orchestrator.handle_chat(&request).await?;
    let routing = handle.routing;
    let memories_injected = handle.memories_injected;

    if request.stream {
        let stream = handle.stream.map(move |item| -> Result<Event, Infallible> {
            match item {
                Ok(chunk) => {
                    let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                    Ok(Event::default().data(data))
                }
                Err(e) => Ok(Event::default().data(format!("{{\"error\":{:?}}}", e.to_string()))),
            }
        });
        let done_marker = futures_util::stream::once(async { Ok(Event::default().data("[DONE]")) });
        let full = stream.chain(done_marker);
        return Ok(Sse::new(full)
            .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
            .into_response());
    }

    let mut inner = handle.stream;
    let mut content = String::new();
    let mut finish_reason = None;
    let mut usage = Usage::default();
    let model = routing.model.clone();
    let mut chunk_model = model.clone();
    while let Some(item) = inner.next().await {
        let chunk = item.map_err(ApiError::from)?;
        chunk_model = chunk.model.clone();
        for choice in &chunk.choices {
            if let Some(c) = &choice.delta.content {
                content.push_str(c);
            }
            if let Some(fr) = choice.finish_reason {
                finish_reason = Some(fr);
            }
        }
        if let Some(u) = &chunk.usage {
            usage = Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            };
        }
    }

    let response = ChatCompletionResponse {
        id: uuid::Uuid::now_v7().to_string(),
        object: "chat.completion",
        created: pearl_core::time::now_unix_secs(),
        model: chunk_model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: as_wire_message("assistant", &content),
            finish_reason: finish_reason_str(finish_reason),
        }],
        usage,
        pearl: PearlInfo {
            routing: RoutingInfo {
                model,
                rule: routing.route.rule_name,
                complexity: routing.route.classification.complexity,
                request_type: routing.route.classification.request_type,
            },
            performance: PerformanceInfo {
                duration_ms: started.elapsed().as_millis() as u64,
                memories_injected,
            },
        },
    };
    Ok(Json(response).into_response())
}

fn finish_reason_str(reason: Option<FinishReason>) -> Option<String> {
    reason.map(|r| match r {
        FinishReason::Stop => "stop".to_string(),
        FinishReason::Length => "length".to_string(),
        FinishReason::ContentFilter => "content_filter".to_string(),
    })
}

async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<ListMemoriesQuery>,
) -> Result<Json<MemoriesResponse>, ApiError> {
    let store: &Store = state.orchestrator.store();
    let filter = QueryFilter {
        agent_id: Some(query.agent.clone()),
        content_substring: query.search.clone(),
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    let memories = store.query(&filter)?;
    let total = memories.len();
    Ok(Json(MemoriesResponse { memories, total }))
}

async fn create_memory(
    State(state): State<AppState>,
    Json(request): Json<CreateMemoryRequest>,
) -> Result<Json<Memory>, ApiError> {
    let memory_type = parse_memory_type(&request.memory_type)
        .ok_or_else(|| ApiError::Validation(format!("unrecognized memory type '{}'", request.memory_type)))?;

    let embedding = state.orchestrator.embedder().embed(&request.content).await.ok();
    let now = pearl_core::time::now_unix_secs();
    let memory = Memory {
        id: uuid::Uuid::now_v7().to_string(),
        agent_id: request.agent.clone(),
        memory_type,
        content: request.content,
        tags: request.tags.into_iter().collect(),
        embedding,
        confidence: 1.0,
        created_at: now,
        updated_at: now,
        accessed_at: None,
        access_count: 0,
        expires_at: None,
        source_session_id: None,
        source_message_id: None,
        scope: Scope::Agent,
        scope_confidence: 1.0,
        target_agent_id: Some(request.agent),
        scope_reasoning: Some("created via management API".to_string()),
    };
    state.orchestrator.store().create(&memory)?;
    Ok(Json(memory))
}

async fn delete_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let store: &Store = state.orchestrator.store();
    if let Some(requesting_agent) = headers.get(REQUESTING_AGENT_HEADER).and_then(|v| v.to_str().ok()) {
        let existing = store.get(&id)?;
        match existing {
            Some(memory) if memory.agent_id != requesting_agent => {
                return Err(ApiError::Forbidden("agent does not own this memory".to_string()));
            }
            None => return Err(ApiError::NotFound(format!("no memory with id {id}"))),
            _ => {}
        }
    }
    let deleted = store.delete(&id)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("no memory with id {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
