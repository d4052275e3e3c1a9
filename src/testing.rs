//! Fakes shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::artifacts::{
    ArtifactError, ArtifactId, ArtifactStore, DraftStatus, GeneratedArtifact, NewArtifact,
};
use crate::audit::{AttemptStatus, AuditLog};
use crate::config::RetryPolicy;
use crate::content::{ItemId, SourceItem};
use crate::llm::types::Choice;
use crate::llm::{ApiError, ChatBackend, ChatMessage, ChatRequest, ChatResponse, Endpoint, QaPair};
use crate::store::StoreError;

type ErrFactory = Arc<dyn Fn() -> ApiError + Send + Sync>;

enum Script {
    /// Replies in order; an exhausted script answers with an invalid response.
    Sequence(VecDeque<Result<String, ApiError>>),
    AlwaysOk(String),
    AlwaysErr(ErrFactory),
}

/// A chat backend that replays canned answers and counts calls.
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn with(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn new(replies: Vec<Result<String, ApiError>>) -> Self {
        Self::with(Script::Sequence(replies.into()))
    }

    pub fn always_ok(text: String) -> Self {
        Self::with(Script::AlwaysOk(text))
    }

    pub fn always_err(make: impl Fn() -> ApiError + Send + Sync + 'static) -> Self {
        Self::with(Script::AlwaysErr(Arc::new(make)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Result<String, ApiError> {
        match &mut *self.script.lock() {
            Script::Sequence(replies) => replies
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::InvalidResponse("script exhausted".into()))),
            Script::AlwaysOk(text) => Ok(text.clone()),
            Script::AlwaysErr(make) => Err(make()),
        }
    }
}

impl ChatBackend for ScriptedBackend {
    async fn send(&self, _endpoint: &Endpoint, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self.next_reply()?;
        Ok(ChatResponse {
            id: format!("scripted-{}", self.calls()),
            choices: vec![Choice {
                message: ChatMessage {
                    role: "assistant".into(),
                    content,
                },
                finish_reason: Some("stop".into()),
            }],
            model: req.model.clone(),
            usage: None,
        })
    }
}

/// The answer body of a successful generation with `n` pairs.
pub fn qa_json(n: usize) -> String {
    let pairs: Vec<serde_json::Value> = (1..=n)
        .map(|i| {
            serde_json::json!({
                "question": format!("Question {i}?"),
                "answer": format!("Answer {i}."),
            })
        })
        .collect();
    serde_json::json!({ "qa_pairs": pairs }).to_string()
}

pub fn pairs(n: usize) -> Vec<QaPair> {
    (1..=n)
        .map(|i| QaPair {
            question: format!("Question {i}?"),
            answer: format!("Answer {i}."),
        })
        .collect()
}

/// Three attempts, no waiting.
pub fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        rate_limit_wait_ms: 0,
        backoff_base_ms: 0,
        backoff_cap_ms: 0,
        request_timeout_secs: 5,
    }
}

pub fn source_item(id: ItemId) -> SourceItem {
    SourceItem {
        id,
        item_type: "post".into(),
        title: format!("Item {id}"),
        excerpt: String::new(),
        body: format!("<p>Item {id} explains how ownership moves values between bindings.</p>"),
        terms: vec!["rust".into()],
        permalink: None,
    }
}

/// In-memory artifact store with fault injection.
#[derive(Default)]
pub struct FlakyArtifacts {
    artifacts: Mutex<BTreeMap<ArtifactId, GeneratedArtifact>>,
    next_id: AtomicUsize,
    fail_creates: AtomicBool,
    publish_fail_every: AtomicUsize,
    publish_calls: AtomicUsize,
}

impl FlakyArtifacts {
    pub fn fail_all_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    /// Every `n`th publish call fails; `1` fails them all.
    pub fn fail_publish_every(&self, n: usize) {
        self.publish_fail_every.store(n, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn all(&self) -> Vec<GeneratedArtifact> {
        self.artifacts.lock().values().cloned().collect()
    }
}

impl ArtifactStore for FlakyArtifacts {
    fn create_draft(&self, draft: NewArtifact) -> Result<ArtifactId, ArtifactError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ArtifactError::Rejected("create disabled".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as ArtifactId + 1;
        self.artifacts.lock().insert(
            id,
            GeneratedArtifact {
                id,
                source_item_id: draft.source_item_id,
                target_type: draft.target_type,
                target_filter: draft.target_filter,
                title: draft.title,
                body: draft.body,
                excerpt: draft.excerpt,
                terms: draft.terms,
                draft_status: DraftStatus::PendingPublish,
                generated_at: draft.generated_at,
                published_at: None,
            },
        );
        Ok(id)
    }

    fn publish(&self, id: ArtifactId, now: DateTime<Utc>) -> Result<(), ArtifactError> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let every = self.publish_fail_every.load(Ordering::SeqCst);
        if every > 0 && call % every == 0 {
            return Err(ArtifactError::Rejected("publish disabled".into()));
        }
        let mut artifacts = self.artifacts.lock();
        let artifact = artifacts.get_mut(&id).ok_or(ArtifactError::NotFound(id))?;
        artifact.draft_status = DraftStatus::Published;
        artifact.published_at = Some(now);
        Ok(())
    }

    fn delete(&self, id: ArtifactId) -> Result<(), ArtifactError> {
        self.artifacts
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(ArtifactError::NotFound(id))
    }

    fn artifact(&self, id: ArtifactId) -> Option<GeneratedArtifact> {
        self.artifacts.lock().get(&id).cloned()
    }

    fn stale_drafts(&self, cutoff: DateTime<Utc>) -> Vec<GeneratedArtifact> {
        self.all()
            .into_iter()
            .filter(|a| a.draft_status == DraftStatus::PendingPublish && a.generated_at < cutoff)
            .collect()
    }

    fn drafts_for(&self, source: ItemId) -> Vec<GeneratedArtifact> {
        self.all()
            .into_iter()
            .filter(|a| a.draft_status == DraftStatus::PendingPublish && a.source_item_id == source)
            .collect()
    }
}

/// An audit log whose every write fails.
pub struct FailingAudit;

impl AuditLog for FailingAudit {
    fn log_attempt(&self, _: ItemId, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
        Err(unavailable())
    }

    fn update_result(
        &self,
        _: ItemId,
        _: &[ArtifactId],
        _: AttemptStatus,
        _: Option<&str>,
        _: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(unavailable())
    }
}

fn unavailable() -> StoreError {
    StoreError::Io {
        path: PathBuf::from("audit.json"),
        source: std::io::Error::other("audit store unavailable"),
    }
}
