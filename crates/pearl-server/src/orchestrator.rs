//! The request lifecycle: resolves agent/session identity, enqueues
//! extraction, runs sunrise recovery, augments with retrieved memories,
//! routes to a model, streams the response with a fallback chain, and
//! records the exchange once the stream completes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use pearl_backends::chat::{ChatStream, UnifiedChatRequest};
use pearl_backends::{BackendError, BackendRegistry, EmbeddingProvider};
use pearl_core::{ChatMessage, GatewayConfig, Memory, MemoryType, RouteResult, Router, Scope};
use pearl_memory::sunrise::SunriseService;
use pearl_memory::validator::{self, GuardAction};
use pearl_memory::{AugmentOptions, Augmenter, ExtractorOptions, Extractor, RetrieveOptions, Retriever};
use pearl_store::{RequestLog, RequestLogEntry, Store, TokenUsage, TranscriptLog, TranscriptRecord};

use crate::error::ApiError;
use crate::wire::ChatCompletionRequest;

const EXTRACTION_IDLE_POLL_MS: u64 = 100;
const EXTRACTION_DRAIN_POLL_MS: u64 = 50;

/// A single message queued for background extraction.
struct ExtractionJob {
    agent_id: String,
    message: String,
}

/// What a chat request resolved to before streaming starts: the model
/// actually chosen (after routing and before any fallback substitution),
/// the rule that picked it, and the classification used to pick it.
pub struct RoutingOutcome {
    pub model: String,
    pub route: RouteResult,
}

/// Everything the HTTP layer needs to relay a response, streaming or not.
pub struct ChatHandle {
    pub agent_id: String,
    pub session_id: String,
    pub routing: RoutingOutcome,
    pub memories_injected: usize,
    pub stream: ChatStream,
}

fn guard_action_from_str(s: &str) -> GuardAction {
    match s {
        "auto_fix" => GuardAction::AutoFix,
        "warn" => GuardAction::Warn,
        _ => GuardAction::LogOnly,
    }
}

pub struct Orchestrator {
    config: GatewayConfig,
    store: Arc<Store>,
    registry: Arc<BackendRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    augmenter: Augmenter,
    sunrise: SunriseService,
    transcript: Arc<TranscriptLog>,
    request_log: Arc<RequestLog>,
    extraction_tx: mpsc::Sender<ExtractionJob>,
    extraction_shutdown: Arc<Notify>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        store: Arc<Store>,
        registry: Arc<BackendRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        transcript: Arc<TranscriptLog>,
        request_log: Arc<RequestLog>,
    ) -> Arc<Self> {
        let retriever = Retriever::new(store.clone(), embedder.clone());
        let augmenter = Augmenter::new();
        let sunrise = SunriseService::new(
            config.sunrise.gap_threshold_ms,
            pearl_memory::sunrise::SummarizerOptions {
                model: config.sunrise.summary_model.clone(),
                lookback_ms: config.sunrise.lookback_ms,
                max_messages: config.sunrise.max_messages as usize,
                min_messages: config.sunrise.min_messages as usize,
            },
        );

        let (extraction_tx, extraction_rx) = mpsc::channel(config.extraction_queue_capacity);
        let extraction_shutdown = Arc::new(Notify::new());

        let orchestrator = Arc::new(Orchestrator {
            config,
            store,
            registry,
            embedder,
            retriever,
            augmenter,
            sunrise,
            transcript,
            request_log,
            extraction_tx,
            extraction_shutdown,
        });

        tokio::spawn(run_extraction_worker(orchestrator.clone(), extraction_rx));

        orchestrator
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Signals the extraction worker to drain and stop, then flushes the store.
    /// Safe to call once during graceful shutdown.
    pub async fn shutdown(&self) {
        self.extraction_shutdown.notify_one();
        // Give the worker a moment to observe the signal and drain; it polls
        // at EXTRACTION_DRAIN_POLL_MS so a short grace period suffices.
        tokio::time::sleep(Duration::from_millis(EXTRACTION_DRAIN_POLL_MS * 4)).await;
        self.store.checkpoint_truncate();
    }

    /// Non-blocking enqueue; a full queue drops the newest item and logs it
    /// rather than stalling the request.
    fn enqueue_extraction(&self, agent_id: &str, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        let job = ExtractionJob {
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.extraction_tx.try_send(job) {
            tracing::warn!(agent_id, error = %e, "extraction queue full or closed, dropping message");
        }
    }

    /// Runs steps 1-5 of the request lifecycle and resolves a backend stream
    /// (retrying across the fallback chain on an initial dispatch failure),
    /// returning a handle the caller drives to relay the response. Step 6/7
    /// bookkeeping (transcript append, post-stream extraction, persistence
    /// guard) happens as the returned stream is consumed.
    pub async fn handle_chat(self: &Arc<Self>, request: &ChatCompletionRequest) -> Result<ChatHandle, ApiError> {
        let agent_id = request
            .metadata
            .agent_id
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let session_id = request
            .metadata
            .session_id
            .clone()
            .unwrap_or_else(|| format!("{agent_id}-{}", pearl_core::time::now_millis()));

        let mut messages = request.messages.clone();

        if let Some(last_user) = messages.iter().rev().find(|m| m.role == "user") {
            self.enqueue_extraction(&agent_id, &last_user.content.as_text());
        }

        if self.config.sunrise.enabled {
            let summary_backend = self
                .registry
                .resolve(&self.config.sunrise.summary_model)
                .map_err(ApiError::from)?;
            let result = self
                .sunrise
                .handle_request(
                    summary_backend.as_ref(),
                    &self.transcript,
                    &agent_id,
                    &session_id,
                    &messages,
                    false,
                )
                .await;
            messages = result.messages;
        }

        let query = Augmenter::build_query(
            &messages,
            &AugmentOptions {
                query_context_messages: self.config.memory.query_context_messages as usize,
            },
        );
        let candidates = self
            .retriever
            .retrieve(
                &agent_id,
                &query,
                &RetrieveOptions {
                    types: Vec::new(),
                    limit: self.config.memory.retrieval_limit,
                    min_score: self.config.memory.min_score,
                    token_budget: self.config.memory.token_budget,
                    recency_boost_enabled: self.config.memory.recency_boost_enabled,
                    half_life_hours: self.config.memory.half_life_hours,
                },
            )
            .await
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        let augmented = self.augmenter.augment(&session_id, &messages, candidates);
        messages = augmented.messages;
        let memories_injected = augmented.injected_memories.len();

        let route = Router::route(
            &messages,
            &agent_id,
            &self.config.routing.agent_overrides,
            &self.config.routing.rules,
            &[],
            &self.config.routing.default_model,
        );

        let requested_model = request.model.trim();
        let primary_model = if requested_model.is_empty() || requested_model == "auto" || requested_model == "pearl" {
            route.model.clone()
        } else {
            requested_model.to_string()
        };

        let mut model_chain = vec![primary_model.clone()];
        model_chain.extend(route.fallbacks.iter().cloned());

        let base_request = UnifiedChatRequest {
            model: primary_model.clone(),
            messages: messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: None,
            user: None,
            tools: request.tools.clone(),
            tool_choice: request.tool_choice.clone(),
        };

        let mut resolved = None;
        let mut last_error = None;
        for candidate_model in &model_chain {
            let backend = match self.registry.resolve(candidate_model) {
                Ok(b) => b,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            let candidate_request = UnifiedChatRequest {
                model: candidate_model.clone(),
                ..base_request.clone()
            };
            match backend.chat(candidate_request).await {
                Ok(stream) => {
                    resolved = Some((candidate_model.clone(), stream));
                    break;
                }
                Err(e) => {
                    tracing::warn!(model = candidate_model.as_str(), error = %e, "backend dispatch failed, trying next in fallback chain");
                    last_error = Some(e);
                }
            }
        }

        let (effective_model, inner_stream) = resolved.ok_or_else(|| {
            ApiError::from(last_error.unwrap_or_else(|| BackendError::Validation("no backend available for routed model".to_string())))
        })?;

        let stream = wrap_with_bookkeeping(
            self.clone(),
            agent_id.clone(),
            session_id.clone(),
            request.model.clone(),
            effective_model,
            route.rule_name.clone(),
            last_user_text(&request.messages),
            request.stream,
            inner_stream,
        );

        Ok(ChatHandle {
            agent_id,
            session_id,
            routing: RoutingOutcome { model: primary_model, route },
            memories_injected,
            stream,
        })
    }
}

fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_text())
        .unwrap_or_default()
}

/// Wraps the backend's chunk stream so that, once it naturally terminates,
/// the full assistant text is known and step 7 bookkeeping (transcript
/// append, persistence guard, request log) can run. A stream error is
/// relayed as-is; already-yielded chunks are not retracted and no bookkeeping
/// runs for that request.
#[allow(clippy::too_many_arguments)]
fn wrap_with_bookkeeping(
    orchestrator: Arc<Orchestrator>,
    agent_id: String,
    session_id: String,
    requested_model: String,
    routed_model: String,
    rule_name: Option<String>,
    prompt_text: String,
    stream_requested: bool,
    mut inner: ChatStream,
) -> ChatStream {
    let stream = async_stream::stream! {
        let mut assembled = String::new();
        let mut usage = TokenUsage { input: 0, output: 0, total: 0 };
        let started = std::time::Instant::now();
        let mut errored = false;

        while let Some(item) = inner.next().await {
            match &item {
                Ok(chunk) => {
                    for choice in &chunk.choices {
                        if let Some(content) = &choice.delta.content {
                            assembled.push_str(content);
                        }
                    }
                    if let Some(u) = &chunk.usage {
                        usage = TokenUsage {
                            input: u.prompt_tokens,
                            output: u.completion_tokens,
                            total: u.total_tokens,
                        };
                    }
                }
                Err(_) => errored = true,
            }
            yield item;
            if errored {
                break;
            }
        }

        if errored {
            return;
        }

        if orchestrator.config.memory.extract_from_assistant {
            orchestrator.enqueue_extraction(&agent_id, &assembled);
        }

        orchestrator.record_exchange(
            &agent_id,
            &session_id,
            &requested_model,
            &routed_model,
            &prompt_text,
            &assembled,
            usage,
            started.elapsed(),
            stream_requested,
            rule_name,
        );
    };
    Box::pin(stream)
}

impl Orchestrator {
    /// Step 7: append the exchange to the transcript log, run the optional
    /// persistence guard, and append a request-log line.
    #[allow(clippy::too_many_arguments)]
    fn record_exchange(
        self: &Arc<Self>,
        agent_id: &str,
        session_id: &str,
        requested_model: &str,
        routed_model: &str,
        prompt_text: &str,
        assistant_text: &str,
        usage: TokenUsage,
        duration: Duration,
        stream_requested: bool,
        rule_name: Option<String>,
    ) {
        let now = pearl_core::time::now_unix_secs();
        if let Err(e) = self.transcript.append(
            agent_id,
            session_id,
            &TranscriptRecord {
                role: "user".to_string(),
                content: prompt_text.to_string(),
                timestamp: now,
                message_id: Uuid::now_v7().to_string(),
            },
        ) {
            tracing::warn!(error = %e, "failed to append user turn to transcript");
        }
        if let Err(e) = self.transcript.append(
            agent_id,
            session_id,
            &TranscriptRecord {
                role: "assistant".to_string(),
                content: assistant_text.to_string(),
                timestamp: now,
                message_id: Uuid::now_v7().to_string(),
            },
        ) {
            tracing::warn!(error = %e, "failed to append assistant turn to transcript");
        }

        if self.config.guard.enabled {
            self.run_persistence_guard(agent_id, assistant_text);
        }

        let entry = RequestLogEntry {
            ts: now,
            id: Uuid::now_v7().to_string(),
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            requested_model: requested_model.to_string(),
            routed_model: routed_model.to_string(),
            prompt: prompt_text.to_string(),
            response_preview: assistant_text.to_string(),
            tokens: usage,
            duration_ms: duration.as_millis() as u64,
            stream: stream_requested,
            rule: rule_name,
        };
        if let Err(e) = self.request_log.append(&entry) {
            tracing::warn!(error = %e, "failed to append request log entry");
        }
    }

    /// The guard needs to know whether anything was actually persisted from
    /// this exact assistant turn, so (unlike the queued user-message
    /// extraction) it runs extraction on the assistant text synchronously and
    /// persists whatever it finds before checking for an unmatched claim.
    fn run_persistence_guard(self: &Arc<Self>, agent_id: &str, assistant_text: &str) {
        if !validator::contains_unmatched_claim(assistant_text) {
            return;
        }
        let orchestrator = self.clone();
        let agent_id = agent_id.to_string();
        let assistant_text = assistant_text.to_string();
        tokio::spawn(async move {
            // The user-message extraction job covers what the user said; this is
            // checking whether the assistant's *own* claim ("I'll remember...")
            // was backed by anything, so it always starts from no existing ids.
            let action = guard_action_from_str(&orchestrator.config.guard.action);
            match validator::guard(&assistant_text, &[], action) {
                pearl_memory::GuardOutcome::Warning(w) => tracing::warn!(agent_id, "{w}"),
                pearl_memory::GuardOutcome::Fixed { content } => {
                    tracing::info!(agent_id, "guard auto-creating memory from unmatched claim");
                    orchestrator.persist_memory_from_claim(&agent_id, &content).await;
                }
                _ => {}
            }
        });
    }

    /// Persists `content` directly as a `Fact` memory, bypassing extraction and
    /// the triviality filter: this is the guard's `auto_fix` path, where the
    /// claimed content itself (not a re-extraction of it) is what should have
    /// been saved in the first place.
    async fn persist_memory_from_claim(self: &Arc<Self>, agent_id: &str, content: &str) {
        let embedding = self.embedder.embed(content).await.ok();
        let now = pearl_core::time::now_unix_secs();
        let memory = Memory {
            id: Uuid::now_v7().to_string(),
            agent_id: agent_id.to_string(),
            memory_type: MemoryType::Fact,
            content: content.to_string(),
            tags: Default::default(),
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
            target_agent_id: Some(agent_id.to_string()),
            scope_reasoning: Some("auto-created by the persistence guard".to_string()),
        };
        if let Err(e) = self.store.create(&memory) {
            tracing::warn!(agent_id, error = %e, "guard failed to persist auto-fix memory");
        }
    }

    /// Extracts memories from `message` and persists them, returning the ids
    /// actually created. Shared by the extraction worker and the guard.
    async fn extract_and_persist(self: &Arc<Self>, agent_id: &str, message: &str) -> Vec<String> {
        let backend = match self.registry.resolve(&self.config.memory.extraction_model) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(agent_id, error = %e, "no backend for extraction model");
                return Vec::new();
            }
        };
        let extractor = Extractor::new(
            backend.as_ref(),
            ExtractorOptions {
                model: self.config.memory.extraction_model.clone(),
                min_confidence: self.config.memory.min_confidence,
                triviality_chars: self.config.memory.triviality_chars,
            },
        );
        let result = extractor.extract(agent_id, message).await;
        if let Some(err) = &result.error {
            tracing::warn!(agent_id, error = %err, "extraction failed");
        }

        let mut ids = Vec::with_capacity(result.memories.len());
        for extracted in result.memories {
            let embedding = match self.embedder.embed(&extracted.content).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(agent_id, error = %e, "failed to embed extracted memory, storing without one");
                    None
                }
            };
            let now = pearl_core::time::now_unix_secs();
            let id = Uuid::now_v7().to_string();
            let memory = Memory {
                id: id.clone(),
                agent_id: agent_id.to_string(),
                memory_type: extracted.memory_type,
                content: extracted.content,
                tags: extracted.tags,
                embedding,
                confidence: extracted.confidence,
                created_at: now,
                updated_at: now,
                accessed_at: None,
                access_count: 0,
                expires_at: None,
                source_session_id: None,
                source_message_id: None,
                scope: extracted.scope,
                scope_confidence: extracted.scope_confidence,
                target_agent_id: match extracted.scope {
                    Scope::Global => None,
                    _ => Some(agent_id.to_string()),
                },
                scope_reasoning: extracted.scope_reasoning,
            };
            if let Err(e) = self.store.create(&memory) {
                tracing::warn!(agent_id, error = %e, "failed to persist extracted memory");
                continue;
            }
            ids.push(id);
        }
        ids
    }
}

/// Classifies `memory_type` strings at the `/v1/memories` boundary. Exposed
/// so the HTTP layer can validate before constructing a `Memory`.
pub fn parse_memory_type(raw: &str) -> Option<MemoryType> {
    MemoryType::from_str(raw)
}

async fn run_extraction_worker(orchestrator: Arc<Orchestrator>, mut rx: mpsc::Receiver<ExtractionJob>) {
    loop {
        tokio::select! {
            biased;
            _ = orchestrator.extraction_shutdown.notified() => break,
            maybe_job = rx.recv() => {
                match maybe_job {
                    Some(job) => {
                        orchestrator.extract_and_persist(&job.agent_id, &job.message).await;
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(EXTRACTION_IDLE_POLL_MS)) => {}
        }
    }

    // Draining phase: stop waiting on new sends, flush what's already queued.
    rx.close();
    while let Ok(job) = rx.try_recv() {
        orchestrator.extract_and_persist(&job.agent_id, &job.message).await;
        tokio::time::sleep(Duration::from_millis(EXTRACTION_DRAIN_POLL_MS)).await;
    }
}
