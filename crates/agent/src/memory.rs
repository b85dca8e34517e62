//! Conversation memory
//!
//! A bounded, ordered log of turns with a fixed system directive pinned at
//! the head. The turn log is only touched under a short lock, never across
//! provider I/O; generation itself is serialised per memory so concurrent
//! turns cannot interleave assistant writes.

use std::sync::Arc;

use parking_lot::Mutex;

use voice_gateway_core::Turn;
use voice_gateway_llm::{ChatCompleter, LlmError};

/// Instruction appended to the log at generation time, keeping spoken
/// replies short.
const BRIEF_REPLY_HINT: &str = "Keep the reply to at most two short sentences.";

/// Memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum non-system turns retained. When exceeded, the oldest
    /// non-system pair is dropped.
    pub max_turns: usize,
    /// System directive, never evicted and never mutated by clients.
    pub system_prompt: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            system_prompt: "You are a helpful AI assistant having a voice conversation \
                            with a human. Keep your responses concise and natural for speech."
                .to_string(),
        }
    }
}

/// Shared multi-turn conversation state.
pub struct ConversationMemory {
    config: MemoryConfig,
    /// Index 0 is always the system turn.
    turns: Mutex<Vec<Turn>>,
    llm: Arc<dyn ChatCompleter>,
    /// Serialises `next_response` per memory.
    generation: tokio::sync::Mutex<()>,
}

impl ConversationMemory {
    pub fn new(llm: Arc<dyn ChatCompleter>, config: MemoryConfig) -> Self {
        let system = Turn::system(config.system_prompt.clone());
        Self {
            config,
            turns: Mutex::new(vec![system]),
            llm,
            generation: tokio::sync::Mutex::new(()),
        }
    }

    /// Append a user turn, evicting the oldest pair if over the limit.
    pub fn append_user(&self, text: impl Into<String>) {
        self.append(Turn::user(text));
    }

    /// Append an assistant turn, evicting the oldest pair if over the limit.
    pub fn append_assistant(&self, text: impl Into<String>) {
        self.append(Turn::assistant(text));
    }

    fn append(&self, turn: Turn) {
        let mut turns = self.turns.lock();
        turns.push(turn);
        while turns.len() - 1 > self.config.max_turns {
            // drop the oldest non-system pair
            turns.remove(1);
            if turns.len() > 1 {
                turns.remove(1);
            }
        }
    }

    /// Clear all turns except the system directive.
    pub fn reset(&self) {
        let mut turns = self.turns.lock();
        turns.truncate(1);
        tracing::info!("conversation memory cleared");
    }

    /// Number of turns excluding the system directive.
    pub fn non_system_len(&self) -> usize {
        self.turns.lock().len() - 1
    }

    /// Copy of the full turn log, system turn included.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().clone()
    }

    /// Generate the next assistant utterance from the current log. The reply
    /// is appended on success; memory is untouched on failure.
    pub async fn next_response(&self) -> Result<String, LlmError> {
        let _serialised = self.generation.lock().await;

        // snapshot under the short lock, then release before provider I/O
        let mut log = self.snapshot();
        log.push(Turn::system(BRIEF_REPLY_HINT));

        let reply = self.llm.complete(&log).await?;
        self.append_assistant(reply.clone());
        Ok(reply)
    }

    pub fn max_turns(&self) -> usize {
        self.config.max_turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voice_gateway_core::TurnRole;
    use voice_gateway_llm::CannedChat;

    fn memory_with(llm: CannedChat, max_turns: usize) -> ConversationMemory {
        ConversationMemory::new(
            Arc::new(llm),
            MemoryConfig {
                max_turns,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_system_turn_is_pinned_at_head() {
        let memory = memory_with(CannedChat::new("ok"), 10);
        memory.append_user("one");
        memory.append_assistant("two");

        let turns = memory.snapshot();
        assert_eq!(turns[0].role, TurnRole::System);
        assert_eq!(memory.non_system_len(), 2);
    }

    #[test]
    fn test_eviction_drops_oldest_pair() {
        let memory = memory_with(CannedChat::new("ok"), 4);
        for i in 0..3 {
            memory.append_user(format!("question {i}"));
            memory.append_assistant(format!("answer {i}"));
        }

        // capped at 4 non-system turns, oldest pair gone
        assert_eq!(memory.non_system_len(), 4);
        let turns = memory.snapshot();
        assert_eq!(turns[0].role, TurnRole::System);
        assert_eq!(turns[1].content, "question 1");
        assert_eq!(turns.last().unwrap().content, "answer 2");
    }

    #[test]
    fn test_never_exceeds_limit() {
        let memory = memory_with(CannedChat::new("ok"), 6);
        for i in 0..50 {
            memory.append_user(format!("u{i}"));
        }
        assert!(memory.non_system_len() <= 6);
        assert_eq!(memory.snapshot()[0].role, TurnRole::System);
    }

    #[test]
    fn test_reset_preserves_system_turn() {
        let memory = memory_with(CannedChat::new("ok"), 10);
        memory.append_user("hello");
        memory.reset();

        let turns = memory.snapshot();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, TurnRole::System);
    }

    #[tokio::test]
    async fn test_next_response_appends_assistant_turn() {
        let memory = memory_with(CannedChat::new("Hi."), 10);
        memory.append_user("hello");

        let reply = memory.next_response().await.unwrap();
        assert_eq!(reply, "Hi.");
        assert_eq!(memory.non_system_len(), 2);
        assert_eq!(memory.snapshot().last().unwrap().role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_memory_untouched() {
        let memory = memory_with(
            CannedChat::failing(voice_gateway_llm::LlmError::Timeout),
            10,
        );
        memory.append_user("hello");

        assert!(memory.next_response().await.is_err());
        assert_eq!(memory.non_system_len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_generation_is_serialised() {
        let memory = Arc::new(memory_with(
            CannedChat::new("reply").with_delay(Duration::from_millis(20)),
            10,
        ));
        memory.append_user("hello");

        let a = {
            let memory = memory.clone();
            tokio::spawn(async move { memory.next_response().await })
        };
        let b = {
            let memory = memory.clone();
            tokio::spawn(async move { memory.next_response().await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // both turns landed, one after the other
        assert_eq!(memory.non_system_len(), 3);
    }

    #[tokio::test]
    async fn test_turn_growth_law() {
        // append_user + next_response adds two non-system turns when no
        // eviction occurs, and stays at the cap when it does
        let memory = memory_with(CannedChat::new("ok"), 4);

        memory.append_user("one");
        memory.next_response().await.unwrap();
        assert_eq!(memory.non_system_len(), 2);

        memory.append_user("two");
        memory.next_response().await.unwrap();
        assert_eq!(memory.non_system_len(), 4);

        memory.append_user("three");
        memory.next_response().await.unwrap();
        assert_eq!(memory.non_system_len(), memory.max_turns());
    }
}
