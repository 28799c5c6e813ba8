//! Rolling-buffer conversation memory with a running summary
//!
//! Recent turns accumulate in an in-memory buffer. When the buffer reaches the
//! configured threshold a background pass folds it into the running summary,
//! which is also written to the store as a `[SUMMARY]`-marked system row so a
//! later process can rehydrate from it.
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context_engine::summarizer::{build_summary_prompts, Summarizer, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE};
use crate::memory::{mark_summary, strip_summary_marker, Message, Role};
use crate::memory_db::{ChatStore, NewMessage};
use crate::messages::{ErrorMessages, NO_HISTORY_SENTINEL};
use crate::metrics;
use crate::thread_pool::PersistencePool;

pub const DEFAULT_SUMMARY_THRESHOLD: usize = 6;
pub const DEFAULT_RELOAD_WINDOW: usize = 10;
pub const DEFAULT_SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(60);

const STRATEGY_NAME: &str = "summarization";

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Buffer length (messages, not turn pairs) that triggers a pass.
    pub summary_threshold: usize,
    /// Newest user/assistant rows reloaded into the buffer on rehydration.
    pub reload_window: usize,
    pub summarize_timeout: Duration,
    pub summary_temperature: f32,
    pub summary_max_tokens: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            summary_threshold: DEFAULT_SUMMARY_THRESHOLD,
            reload_window: DEFAULT_RELOAD_WINDOW,
            summarize_timeout: DEFAULT_SUMMARIZE_TIMEOUT,
            summary_temperature: SUMMARY_TEMPERATURE,
            summary_max_tokens: SUMMARY_MAX_TOKENS,
        }
    }
}

impl MemoryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            summary_threshold: config.summary_threshold.max(1),
            reload_window: config.memory_reload_window,
            summarize_timeout: Duration::from_secs(config.summarize_timeout_seconds),
            ..Self::default()
        }
    }
}

/// Where a memory reads its history from and sends its writes to.
#[derive(Clone)]
pub struct MemoryPersistence {
    pub store: Arc<dyn ChatStore>,
    pub pool: Arc<PersistencePool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub strategy: String,
    pub buffer_len: usize,
    pub summary_len: usize,
    pub summary_threshold: usize,
    pub summarizing: bool,
}

#[derive(Default)]
struct MemoryState {
    summary: String,
    buffer: Vec<Message>,
    /// Bumped by `clear()`; a pass started under an older generation is discarded.
    generation: u64,
}

struct PassInput {
    snapshot_len: usize,
    transcript: String,
    previous_summary: String,
    generation: u64,
}

struct Inner {
    session_id: String,
    config: MemoryConfig,
    summarizer: Summarizer,
    persistence: Option<MemoryPersistence>,
    state: Mutex<MemoryState>,
    summarizing: AtomicBool,
    last_pass: Mutex<Option<JoinHandle<bool>>>,
}

/// Releases the in-flight flag when the pass ends, however it ends.
struct SummarizingGuard {
    inner: Arc<Inner>,
}

impl Drop for SummarizingGuard {
    fn drop(&mut self) {
        self.inner.summarizing.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cheap to clone; clones share the same buffer and summary.
#[derive(Clone)]
pub struct SummarizationMemory {
    inner: Arc<Inner>,
}

impl SummarizationMemory {
    /// Builds the memory and, when a store is attached, rehydrates it once.
    pub async fn new(
        session_id: &str,
        config: MemoryConfig,
        summarizer: Summarizer,
        persistence: Option<MemoryPersistence>,
    ) -> Self {
        let summarizer = summarizer.with_sampling(config.summary_temperature, config.summary_max_tokens);
        let memory = Self {
            inner: Arc::new(Inner {
                session_id: session_id.to_string(),
                config,
                summarizer,
                persistence,
                state: Mutex::new(MemoryState::default()),
                summarizing: AtomicBool::new(false),
                last_pass: Mutex::new(None),
            }),
        };
        if memory.inner.persistence.is_some() {
            memory.load_memory().await;
        }
        memory
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Replaces the summary and buffer with what the store holds. Overlap
    /// between the reloaded window and the summary is not filtered out.
    pub async fn load_memory(&self) {
        let Some(persistence) = self.inner.persistence.as_ref() else {
            return;
        };
        let session_id = &self.inner.session_id;

        let summary = match persistence.store.latest_summary(session_id).await {
            Ok(row) => row.map(|r| strip_summary_marker(&r.content).to_string()).unwrap_or_default(),
            Err(e) => {
                error!("{} for session {}: {}", ErrorMessages::MEMORY_LOAD_FAILED, session_id, e);
                return;
            }
        };

        let recent = match persistence
            .store
            .recent_conversation_messages(session_id, self.inner.config.reload_window)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("{} for session {}: {}", ErrorMessages::MEMORY_LOAD_FAILED, session_id, e);
                return;
            }
        };

        let buffer: Vec<Message> = recent
            .into_iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .map(|m| Message::new(m.role, m.content))
            .collect();

        info!(
            "Loaded memory for session {}: summary {} chars, {} buffered messages",
            session_id,
            summary.len(),
            buffer.len()
        );

        let mut state = lock(&self.inner.state);
        state.summary = summary;
        state.buffer = buffer;
    }

    /// Records one completed turn. Persistence and summarization both happen
    /// in the background; this never waits on either.
    pub fn add_message(&self, user_input: &str, ai_response: &str) {
        let pass = {
            let mut state = lock(&self.inner.state);
            state.buffer.push(Message::user(user_input));
            state.buffer.push(Message::assistant(ai_response));

            if state.buffer.len() >= self.inner.config.summary_threshold {
                self.inner.try_begin_pass(&state)
            } else {
                None
            }
        };

        self.inner.persist(Role::User, user_input);
        self.inner.persist(Role::Assistant, ai_response);

        if let Some((guard, input)) = pass {
            debug!("Summarization triggered for session {}", self.inner.session_id);
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move { Inner::run_pass(inner, guard, input).await });
            *lock(&self.inner.last_pass) = Some(handle);
        }
    }

    pub fn get_context(&self) -> String {
        let state = lock(&self.inner.state);
        let mut parts = Vec::with_capacity(2);

        if !state.summary.is_empty() {
            parts.push(format!("## Previous Conversation Summary:\n{}", state.summary));
        }
        if !state.buffer.is_empty() {
            let lines: Vec<String> = state.buffer.iter().map(Message::render_line).collect();
            parts.push(format!("## Recent Messages:\n{}", lines.join("\n")));
        }

        if parts.is_empty() {
            NO_HISTORY_SENTINEL.to_string()
        } else {
            parts.join("\n\n")
        }
    }

    /// Forgets the in-memory summary and buffer. Durable history stays.
    pub fn clear(&self) {
        let mut state = lock(&self.inner.state);
        state.summary.clear();
        state.buffer.clear();
        state.generation += 1;
        debug!("Cleared memory for session {}", self.inner.session_id);
    }

    /// Runs a pass now, ignoring the threshold. Returns whether a new summary
    /// was applied; an empty buffer or a pass already in flight is a no-op.
    pub async fn force_summarize(&self) -> bool {
        let pass = {
            let state = lock(&self.inner.state);
            if state.buffer.is_empty() {
                return false;
            }
            self.inner.try_begin_pass(&state)
        };
        match pass {
            Some((guard, input)) => Inner::run_pass(Arc::clone(&self.inner), guard, input).await,
            None => false,
        }
    }

    /// Waits for the most recently spawned background pass, if any.
    pub async fn wait_for_summarization(&self) {
        let handle = lock(&self.inner.last_pass).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Summarization task for session {} failed: {}", self.inner.session_id, e);
            }
        }
    }

    pub fn stats(&self) -> MemoryStats {
        let state = lock(&self.inner.state);
        MemoryStats {
            strategy: STRATEGY_NAME.to_string(),
            buffer_len: state.buffer.len(),
            summary_len: state.summary.len(),
            summary_threshold: self.inner.config.summary_threshold,
            summarizing: self.inner.summarizing.load(Ordering::Acquire),
        }
    }
}

impl Inner {
    fn persist(&self, role: Role, content: &str) {
        if let Some(ref persistence) = self.persistence {
            persistence.pool.submit(NewMessage::now(&self.session_id, role, content));
        }
    }

    /// Claims the in-flight flag and snapshots the buffer in one step, under
    /// the state lock held by the caller.
    fn try_begin_pass(self: &Arc<Self>, state: &MemoryState) -> Option<(SummarizingGuard, PassInput)> {
        if self
            .summarizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Summarization already in flight for session {}", self.session_id);
            return None;
        }
        let guard = SummarizingGuard { inner: Arc::clone(self) };
        let lines: Vec<String> = state.buffer.iter().map(Message::render_line).collect();
        Some((
            guard,
            PassInput {
                snapshot_len: state.buffer.len(),
                transcript: lines.join("\n"),
                previous_summary: state.summary.clone(),
                generation: state.generation,
            },
        ))
    }

    async fn run_pass(inner: Arc<Inner>, _guard: SummarizingGuard, input: PassInput) -> bool {
        let previous = Some(input.previous_summary.as_str()).filter(|s| !s.is_empty());
        let (system_prompt, prompt) = build_summary_prompts(previous, &input.transcript);

        let outcome = tokio::time::timeout(
            inner.config.summarize_timeout,
            inner.summarizer.summarize(&prompt, Some(&system_prompt)),
        )
        .await;

        let summary = match outcome {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                metrics::inc_summarization("failure");
                warn!("{} for session {}: {}", ErrorMessages::MEMORY_SUMMARIZE_FAILED, inner.session_id, e);
                return false;
            }
            Err(_) => {
                metrics::inc_summarization("timeout");
                warn!(
                    "{} for session {}: timed out after {:?}",
                    ErrorMessages::MEMORY_SUMMARIZE_FAILED,
                    inner.session_id,
                    inner.config.summarize_timeout
                );
                return false;
            }
        };

        {
            let mut state = lock(&inner.state);
            if state.generation != input.generation {
                metrics::inc_summarization("discarded");
                debug!("Discarding summary for cleared session {}", inner.session_id);
                return false;
            }
            state.summary = summary.clone();
            let drained = input.snapshot_len.min(state.buffer.len());
            state.buffer.drain(..drained);
        }

        inner.persist(Role::System, &mark_summary(&summary));
        metrics::inc_summarization("success");
        info!(
            "Summarized {} messages for session {} ({} chars)",
            input.snapshot_len,
            inner.session_id,
            summary.len()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{is_summary, InMemoryChatStore};
    use crate::memory_db::MemoryDatabase;
    use crate::test_support::ScriptedModel;
    use crate::thread_pool::ThreadPoolConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use proptest::prelude::*;

    fn config(threshold: usize) -> MemoryConfig {
        MemoryConfig { summary_threshold: threshold, ..MemoryConfig::default() }
    }

    async fn detached(threshold: usize, model: Arc<ScriptedModel>) -> SummarizationMemory {
        SummarizationMemory::new("s1", config(threshold), Summarizer::new("m", model), None).await
    }

    fn persistence(store: Arc<dyn ChatStore>) -> MemoryPersistence {
        let pool = PersistencePool::start(ThreadPoolConfig::default(), Arc::clone(&store)).unwrap();
        MemoryPersistence { store, pool: Arc::new(pool) }
    }

    #[tokio::test]
    async fn test_fresh_memory_returns_sentinel() {
        let store: Arc<dyn ChatStore> = Arc::new(InMemoryChatStore::new());
        let memory = SummarizationMemory::new(
            "s1",
            MemoryConfig::default(),
            Summarizer::new("m", Arc::new(ScriptedModel::new())),
            Some(persistence(store)),
        )
        .await;
        assert_eq!(memory.get_context(), NO_HISTORY_SENTINEL);
    }

    #[tokio::test]
    async fn test_below_threshold_keeps_every_turn() {
        let memory = detached(6, Arc::new(ScriptedModel::new())).await;
        memory.add_message("q1", "a1");
        memory.add_message("q2", "a2");

        assert_eq!(
            memory.get_context(),
            "## Recent Messages:\nUser: q1\nAssistant: a1\nUser: q2\nAssistant: a2"
        );
        assert!(!memory.stats().summarizing);
    }

    #[tokio::test]
    async fn test_threshold_triggers_one_pass_and_persists_summary() {
        let model = Arc::new(ScriptedModel::new());
        model.reply("S1");
        let store: Arc<dyn ChatStore> = Arc::new(InMemoryChatStore::new());
        let persistence = persistence(Arc::clone(&store));
        let memory = SummarizationMemory::new(
            "s1",
            config(6),
            Summarizer::new("m", model.clone()),
            Some(persistence.clone()),
        )
        .await;

        for i in 1..=3 {
            memory.add_message(&format!("q{}", i), &format!("a{}", i));
        }
        memory.wait_for_summarization().await;

        let stats = memory.stats();
        assert_eq!(stats.buffer_len, 0);
        assert_eq!(stats.summary_len, 2);
        assert_eq!(model.requests().len(), 1);
        assert!(model.requests()[0].messages[1].content.starts_with("Conversation:\nUser: q1"));

        memory.add_message("q4", "a4");
        assert_eq!(
            memory.get_context(),
            "## Previous Conversation Summary:\nS1\n\n## Recent Messages:\nUser: q4\nAssistant: a4"
        );

        persistence.pool.flush().await;
        let summary = store.latest_summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.content, "[SUMMARY] S1");
        let history = store.session_messages("s1").await.unwrap();
        assert_eq!(history.len(), 9);
        assert_eq!(history.iter().filter(|m| is_summary(&m.content)).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_buffer_and_retries() {
        let model = Arc::new(ScriptedModel::new());
        model.fail("upstream down");
        model.reply("");
        model.reply("S2");
        let memory = detached(6, model.clone()).await;

        for i in 1..=3 {
            memory.add_message(&format!("q{}", i), &format!("a{}", i));
        }
        memory.wait_for_summarization().await;
        assert_eq!(memory.stats().buffer_len, 6);
        assert_eq!(memory.stats().summary_len, 0);
        assert!(!memory.stats().summarizing);

        memory.add_message("q4", "a4");
        memory.wait_for_summarization().await;
        assert_eq!(memory.stats().buffer_len, 8);

        memory.add_message("q5", "a5");
        memory.wait_for_summarization().await;
        assert_eq!(memory.stats().buffer_len, 0);
        assert_eq!(memory.get_context(), "## Previous Conversation Summary:\nS2");
        assert!(model.requests()[2].messages[1].content.contains("User: q5"));
    }

    #[tokio::test]
    async fn test_turns_added_during_pass_survive() {
        let model = Arc::new(ScriptedModel::new());
        model.reply("S1");
        let memory = detached(6, model.clone()).await;

        for i in 1..=3 {
            memory.add_message(&format!("q{}", i), &format!("a{}", i));
        }
        memory.add_message("late-q", "late-a");
        memory.wait_for_summarization().await;

        assert_eq!(model.requests().len(), 1);
        assert_eq!(
            memory.get_context(),
            "## Previous Conversation Summary:\nS1\n\n## Recent Messages:\nUser: late-q\nAssistant: late-a"
        );
    }

    #[tokio::test]
    async fn test_second_pass_merges_previous_summary() {
        let model = Arc::new(ScriptedModel::new());
        model.reply("S1");
        model.reply("S1+S2");
        let memory = detached(2, model.clone()).await;

        memory.add_message("q1", "a1");
        memory.wait_for_summarization().await;
        memory.add_message("q2", "a2");
        memory.wait_for_summarization().await;

        let prompt = &model.requests()[1].messages[1].content;
        assert!(prompt.starts_with("Previous Summary:\nS1\n\nNew Messages:\nUser: q2\nAssistant: a2"));
        assert_eq!(memory.get_context(), "## Previous Conversation Summary:\nS1+S2");
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_pass() {
        let model = Arc::new(ScriptedModel::new());
        model.reply("stale");
        let memory = detached(2, model).await;

        memory.add_message("q1", "a1");
        memory.clear();
        memory.wait_for_summarization().await;

        assert_eq!(memory.get_context(), NO_HISTORY_SENTINEL);
        assert!(!memory.stats().summarizing);
    }

    #[tokio::test]
    async fn test_hung_summarizer_times_out_and_releases_flag() {
        let model = Arc::new(ScriptedModel::always("late").with_delay(Duration::from_millis(500)));
        let cfg = MemoryConfig {
            summary_threshold: 2,
            summarize_timeout: Duration::from_millis(20),
            ..MemoryConfig::default()
        };
        let memory = SummarizationMemory::new("s1", cfg, Summarizer::new("m", model), None).await;

        memory.add_message("q1", "a1");
        memory.wait_for_summarization().await;

        let stats = memory.stats();
        assert_eq!(stats.buffer_len, 2);
        assert_eq!(stats.summary_len, 0);
        assert!(!stats.summarizing);
    }

    #[tokio::test]
    async fn test_force_summarize_ignores_threshold() {
        let model = Arc::new(ScriptedModel::new());
        model.reply("forced");
        let memory = detached(100, model).await;

        assert!(!memory.force_summarize().await);
        memory.add_message("q1", "a1");
        assert!(memory.force_summarize().await);
        assert_eq!(memory.get_context(), "## Previous Conversation Summary:\nforced");
    }

    #[tokio::test]
    async fn test_load_memory_restores_summary_and_window() {
        let store = Arc::new(InMemoryChatStore::new());
        let base = Utc::now() - ChronoDuration::minutes(10);
        let at = |offset: i64, role: Role, content: String| NewMessage {
            session_id: "s1".to_string(),
            role,
            content,
            timestamp: base + ChronoDuration::seconds(offset),
        };
        store.insert_message(&at(0, Role::System, mark_summary("old summary"))).await.unwrap();
        for i in 0..12 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.insert_message(&at(1 + i, role, format!("m{}", i))).await.unwrap();
        }
        store.insert_message(&at(50, Role::System, mark_summary("new summary"))).await.unwrap();

        let memory = SummarizationMemory::new(
            "s1",
            MemoryConfig::default(),
            Summarizer::new("m", Arc::new(ScriptedModel::new())),
            Some(persistence(store)),
        )
        .await;

        let context = memory.get_context();
        assert!(context.starts_with("## Previous Conversation Summary:\nnew summary\n\n## Recent Messages:\nUser: m2\n"));
        assert!(context.ends_with("Assistant: m11"));
        assert_eq!(memory.stats().buffer_len, DEFAULT_RELOAD_WINDOW);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_memory_empty() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        {
            let conn = db.pool().get().unwrap();
            conn.execute_batch("DROP TABLE messages;").unwrap();
        }
        let memory = SummarizationMemory::new(
            "s1",
            MemoryConfig::default(),
            Summarizer::new("m", Arc::new(ScriptedModel::new())),
            Some(persistence(Arc::new(db))),
        )
        .await;
        assert_eq!(memory.get_context(), NO_HISTORY_SENTINEL);
    }

    proptest! {
        #[test]
        fn prop_context_lists_every_turn_below_threshold(
            turns in proptest::collection::vec(("[a-z ]{1,20}", "[a-z ]{1,20}"), 1..8)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let context = rt.block_on(async {
                let memory = detached(100, Arc::new(ScriptedModel::new())).await;
                for (q, a) in &turns {
                    memory.add_message(q, a);
                }
                memory.get_context()
            });

            prop_assert!(context.starts_with("## Recent Messages:\n"));
            prop_assert!(!context.contains("## Previous Conversation Summary:"));
            let lines: Vec<&str> = context.lines().skip(1).collect();
            prop_assert_eq!(lines.len(), turns.len() * 2);
            for (i, (q, a)) in turns.iter().enumerate() {
                prop_assert_eq!(lines[2 * i], format!("User: {}", q));
                prop_assert_eq!(lines[2 * i + 1], format!("Assistant: {}", a));
            }
        }
    }
}
