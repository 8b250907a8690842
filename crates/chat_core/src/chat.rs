//! crates/chat_core/src/chat.rs
//!
//! The chat orchestrator. Builds the model context from a user's active
//! session, drives the chat model in blocking or streaming mode, and commits
//! the outcome to history.

use crate::directory::UserDirectory;
use crate::domain::{Sender, SessionId, Turn, UserRecord};
use crate::error::{CoreError, CoreResult};
use crate::persona;
use crate::ports::{ChatMessage, ChatModelService, Role};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

/// A user message with this exact value clears the active session instead
/// of being sent to the model.
pub const CLEAR_SENTINEL: &str = "__CLEAR__";
pub const CLEARED_REPLY: &str = "Chat history cleared.";
/// Committed as the bot turn when the model cannot be reached.
pub const FALLBACK_REPLY: &str = "AI service unavailable, please try again later.";

const STREAM_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// Builds the outbound message list: system prompt, the active session's
/// history, then the new user message.
pub fn build_messages(
    record: &UserRecord,
    user_message: &str,
    now: DateTime<Utc>,
    app_context: &str,
) -> CoreResult<Vec<ChatMessage>> {
    let (_, session) = record
        .active()
        .ok_or_else(|| CoreError::NotFound("active session".to_string()))?;

    let mut messages = Vec::with_capacity(session.history.len() + 2);
    messages.push(ChatMessage::new(
        Role::System,
        persona::system_prompt(&record.personality, now, app_context),
    ));
    messages.extend(session.history.iter().map(|turn| {
        let role = match turn.sender {
            Sender::User => Role::User,
            Sender::Bot => Role::Assistant,
        };
        ChatMessage::new(role, turn.content.clone())
    }));
    messages.push(ChatMessage::new(Role::User, user_message));
    Ok(messages)
}

//=========================================================================================
// Streaming Events
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A partial fragment of the reply.
    Chunk(String),
    /// The reply is complete and committed.
    Done { full_response: String },
    /// The model failed; the fallback text was committed instead.
    Failed { message: String },
}

/// The caller's end of a streaming reply. Dropping it (for example when the
/// client disconnects) stops the producer, which then commits whatever text
/// it had received.
pub struct ReplyStream {
    events: mpsc::Receiver<ChatEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ReplyStream {
    type Item = ChatEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

//=========================================================================================
// The Orchestrator
//=========================================================================================

pub struct ChatOrchestrator {
    directory: Arc<UserDirectory>,
    model: Arc<dyn ChatModelService>,
    retry: RetryPolicy,
    app_context: String,
}

impl ChatOrchestrator {
    pub fn new(
        directory: Arc<UserDirectory>,
        model: Arc<dyn ChatModelService>,
        app_context: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            model,
            retry: RetryPolicy::default(),
            app_context: app_context.into(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Blocking mode: one request, one reply. The user turn and the reply
    /// (or the fallback text) are committed together.
    pub async fn reply(&self, account: &str, message: &str) -> CoreResult<String> {
        validate(message)?;
        if message == CLEAR_SENTINEL {
            return self.clear(account).await;
        }

        let record = self.directory.view(account).await?;
        let received = Utc::now();
        let messages = build_messages(&record, message, received, &self.app_context)?;
        let session_id = record
            .active_session
            .clone()
            .ok_or_else(|| CoreError::NotFound("active session".to_string()))?;

        let reply = self.complete_with_retry(&messages).await;
        let turns = vec![Turn::user(message, received), Turn::bot(reply.clone(), Utc::now())];
        commit_turns(&self.directory, account, &session_id, turns).await?;
        Ok(reply)
    }

    /// Streaming mode. The user turn is committed up front; a producer task
    /// forwards fragments and commits exactly one bot turn when it finishes.
    pub async fn reply_streaming(&self, account: &str, message: &str) -> CoreResult<ReplyStream> {
        validate(message)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();
        let stream = ReplyStream {
            events: rx,
            _cancel_on_drop: cancel.clone().drop_guard(),
        };

        if message == CLEAR_SENTINEL {
            let full_response = self.clear(account).await?;
            // The receiver is alive and the buffer is empty, so this cannot fail.
            let _ = tx.send(ChatEvent::Done { full_response }).await;
            return Ok(stream);
        }

        let now = Utc::now();
        let app_context = self.app_context.as_str();
        let (session_id, messages) = self
            .directory
            .transact(account, |record| {
                let messages = build_messages(record, message, now, app_context)?;
                let session_id = record
                    .active_session
                    .clone()
                    .ok_or_else(|| CoreError::NotFound("active session".to_string()))?;
                if let Some(session) = record.active_session_mut() {
                    session.append(Turn::user(message, now));
                }
                Ok((session_id, messages))
            })
            .await?;

        let producer = StreamProducer {
            directory: self.directory.clone(),
            model: self.model.clone(),
            account: account.to_string(),
            session_id,
            messages,
        };
        tokio::spawn(producer.run(tx, cancel));
        Ok(stream)
    }

    async fn clear(&self, account: &str) -> CoreResult<String> {
        self.directory
            .transact(account, |record| {
                if let Some(session) = record.active_session_mut() {
                    session.clear();
                }
                Ok(())
            })
            .await?;
        info!(account = %account, "Cleared active chat session.");
        Ok(CLEARED_REPLY.to_string())
    }

    async fn complete_with_retry(&self, messages: &[ChatMessage]) -> String {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.model.complete(messages).await {
                Ok(reply) => return reply,
                Err(e) => {
                    warn!(attempt, error = %e, "Chat completion attempt failed.");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
            }
        }
        error!(attempts, "Chat completion failed after all attempts; replying with fallback.");
        FALLBACK_REPLY.to_string()
    }
}

fn validate(message: &str) -> CoreResult<()> {
    if message.trim().is_empty() {
        return Err(CoreError::InvalidArgument("No message provided".to_string()));
    }
    Ok(())
}

/// Appends turns to the session the request started on. If that session
/// was deleted in the meantime the turns are dropped.
async fn commit_turns(
    directory: &UserDirectory,
    account: &str,
    session_id: &SessionId,
    turns: Vec<Turn>,
) -> CoreResult<()> {
    directory
        .transact(account, |record| {
            match record.sessions.get_mut(session_id) {
                Some(session) => turns.into_iter().for_each(|turn| session.append(turn)),
                None => warn!(session_id = %session_id, "Session was deleted before the reply arrived; dropping reply."),
            }
            Ok(())
        })
        .await
}

//=========================================================================================
// Streaming Producer
//=========================================================================================

enum StreamEnd {
    Completed,
    Failed(String),
    Interrupted,
}

struct StreamProducer {
    directory: Arc<UserDirectory>,
    model: Arc<dyn ChatModelService>,
    account: String,
    session_id: SessionId,
    messages: Vec<ChatMessage>,
}

impl StreamProducer {
    async fn run(self, tx: mpsc::Sender<ChatEvent>, cancel: CancellationToken) {
        let mut full = String::new();
        let end = match self.model.complete_streaming(&self.messages).await {
            Err(e) => StreamEnd::Failed(e.to_string()),
            Ok(mut fragments) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => break StreamEnd::Interrupted,
                    next = fragments.next() => match next {
                        Some(Ok(fragment)) => {
                            if fragment.is_empty() {
                                continue;
                            }
                            full.push_str(&fragment);
                            if tx.send(ChatEvent::Chunk(fragment)).await.is_err() {
                                break StreamEnd::Interrupted;
                            }
                        }
                        Some(Err(e)) => break StreamEnd::Failed(e.to_string()),
                        None => break StreamEnd::Completed,
                    },
                }
            },
        };

        let (committed, event) = match end {
            StreamEnd::Completed => (
                Some(full.clone()),
                Some(ChatEvent::Done {
                    full_response: full,
                }),
            ),
            StreamEnd::Failed(reason) => {
                warn!(error = %reason, "Streaming completion failed.");
                (
                    Some(FALLBACK_REPLY.to_string()),
                    Some(ChatEvent::Failed {
                        message: FALLBACK_REPLY.to_string(),
                    }),
                )
            }
            StreamEnd::Interrupted => {
                info!(
                    received = full.len(),
                    "Client went away mid-stream; keeping partial reply."
                );
                ((!full.is_empty()).then_some(full), None)
            }
        };

        if let Some(text) = committed {
            let turn = Turn::bot(text, Utc::now());
            if let Err(e) = commit_turns(&self.directory, &self.account, &self.session_id, vec![turn]).await {
                error!(error = %e, "Failed to commit streamed reply.");
            }
        }
        if let Some(event) = event {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::MemoryStore;
    use crate::ports::{PortError, PortResult, TextStream};
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ACCOUNT: &str = "chat@example.com";

    #[derive(Default)]
    struct FakeModel {
        calls: AtomicUsize,
        fail_first: usize,
        reply: String,
        fragments: Vec<String>,
        stream_error: bool,
        hang: bool,
    }

    #[async_trait]
    impl ChatModelService for FakeModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> PortResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(PortError::Unexpected("upstream timeout".to_string()))
            } else {
                Ok(self.reply.clone())
            }
        }

        async fn complete_streaming(&self, _messages: &[ChatMessage]) -> PortResult<TextStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut fragments: TextStream =
                stream::iter(self.fragments.clone().into_iter().map(Ok)).boxed();
            if self.stream_error {
                fragments = fragments
                    .chain(stream::once(async {
                        Err(PortError::Unexpected("connection reset".to_string()))
                    }))
                    .boxed();
            }
            if self.hang {
                fragments = fragments.chain(stream::pending()).boxed();
            }
            Ok(fragments)
        }
    }

    fn orchestrator(model: FakeModel) -> (ChatOrchestrator, Arc<UserDirectory>, Arc<FakeModel>) {
        let directory = Arc::new(UserDirectory::new(Arc::new(MemoryStore::default())));
        let model = Arc::new(model);
        let chat = ChatOrchestrator::new(directory.clone(), model.clone(), "A chat web app.")
            .with_retry_policy(RetryPolicy {
                attempts: 2,
                delay: Duration::ZERO,
            });
        (chat, directory, model)
    }

    async fn active_history(directory: &UserDirectory) -> Vec<Turn> {
        let record = directory.view(ACCOUNT).await.unwrap();
        record.active().unwrap().1.history.clone()
    }

    async fn wait_for_turns(directory: &UserDirectory, count: usize) -> Vec<Turn> {
        for _ in 0..200 {
            let history = active_history(directory).await;
            if history.len() >= count {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("history never reached {} turns", count);
    }

    #[test]
    fn test_build_messages_maps_history_roles() {
        let now = Utc::now();
        let mut record = UserRecord::new(now);
        record.personality = "coder".to_string();
        let session = record.active_session_mut().unwrap();
        session.append(Turn::user("hi", now));
        session.append(Turn::bot("hello", now));

        let messages = build_messages(&record, "next", now, "").unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with(persona::preset("coder")));
        assert_eq!(messages[1], ChatMessage::new(Role::User, "hi"));
        assert_eq!(messages[2], ChatMessage::new(Role::Assistant, "hello"));
        assert_eq!(messages[3], ChatMessage::new(Role::User, "next"));
    }

    #[tokio::test]
    async fn test_reply_commits_user_and_bot_turns() {
        let (chat, directory, _) = orchestrator(FakeModel {
            reply: "Hi! How can I help?".to_string(),
            ..Default::default()
        });
        let reply = chat.reply(ACCOUNT, "hello").await.unwrap();
        assert_eq!(reply, "Hi! How can I help?");

        let history = active_history(&directory).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].sender, Sender::Bot);
        assert_eq!(history[1].content, reply);
    }

    #[tokio::test]
    async fn test_reply_retries_once_before_succeeding() {
        let (chat, _, model) = orchestrator(FakeModel {
            fail_first: 1,
            reply: "second time lucky".to_string(),
            ..Default::default()
        });
        assert_eq!(chat.reply(ACCOUNT, "hi").await.unwrap(), "second time lucky");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_commit_fallback_reply() {
        let (chat, directory, model) = orchestrator(FakeModel {
            fail_first: usize::MAX,
            ..Default::default()
        });
        assert_eq!(chat.reply(ACCOUNT, "hi").await.unwrap(), FALLBACK_REPLY);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        let history = active_history(&directory).await;
        assert_eq!(history.last().unwrap().content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_clear_sentinel_empties_history_without_calling_model() {
        let (chat, directory, model) = orchestrator(FakeModel {
            reply: "ok".to_string(),
            ..Default::default()
        });
        chat.reply(ACCOUNT, "remember this").await.unwrap();
        assert_eq!(chat.reply(ACCOUNT, CLEAR_SENTINEL).await.unwrap(), CLEARED_REPLY);
        assert!(active_history(&directory).await.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let (chat, _, _) = orchestrator(FakeModel::default());
        assert!(matches!(
            chat.reply(ACCOUNT, "   ").await,
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_lands_in_the_session_it_started_on() {
        let (chat, directory, _) = orchestrator(FakeModel {
            reply: "pong".to_string(),
            ..Default::default()
        });
        let original = directory.view(ACCOUNT).await.unwrap().active_session.unwrap();
        chat.reply(ACCOUNT, "ping").await.unwrap();
        directory
            .transact(ACCOUNT, |record| Ok(record.create_session(Some("Other"), Utc::now())))
            .await
            .unwrap();
        let record = directory.view(ACCOUNT).await.unwrap();
        assert_eq!(record.sessions[&original].history.len(), 2);
        assert!(record.active().unwrap().1.history.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_reply_emits_chunks_then_done() {
        let (chat, directory, _) = orchestrator(FakeModel {
            fragments: vec!["Hel".to_string(), "lo".to_string(), "!".to_string()],
            ..Default::default()
        });
        let events: Vec<ChatEvent> = chat
            .reply_streaming(ACCOUNT, "greet me")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Chunk("Hel".to_string()),
                ChatEvent::Chunk("lo".to_string()),
                ChatEvent::Chunk("!".to_string()),
                ChatEvent::Done {
                    full_response: "Hello!".to_string()
                },
            ]
        );
        let history = active_history(&directory).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "greet me");
        assert_eq!(history[1].content, "Hello!");
    }

    #[tokio::test]
    async fn test_streaming_failure_commits_fallback_once() {
        let (chat, directory, _) = orchestrator(FakeModel {
            fragments: vec!["partial".to_string()],
            stream_error: true,
            ..Default::default()
        });
        let events: Vec<ChatEvent> = chat
            .reply_streaming(ACCOUNT, "hi")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Failed {
                message: FALLBACK_REPLY.to_string()
            })
        );
        let history = active_history(&directory).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_disconnect_mid_stream_keeps_partial_reply() {
        let (chat, directory, _) = orchestrator(FakeModel {
            fragments: vec!["Hel".to_string(), "lo".to_string()],
            hang: true,
            ..Default::default()
        });
        let mut stream = chat.reply_streaming(ACCOUNT, "hi").await.unwrap();
        assert_eq!(stream.next().await, Some(ChatEvent::Chunk("Hel".to_string())));
        assert_eq!(stream.next().await, Some(ChatEvent::Chunk("lo".to_string())));
        drop(stream);

        let history = wait_for_turns(&directory, 2).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].sender, Sender::Bot);
        assert_eq!(history[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_streaming_clear_sentinel_reports_done() {
        let (chat, _, model) = orchestrator(FakeModel::default());
        let events: Vec<ChatEvent> = chat
            .reply_streaming(ACCOUNT, CLEAR_SENTINEL)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![ChatEvent::Done {
                full_response: CLEARED_REPLY.to_string()
            }]
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
