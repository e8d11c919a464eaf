//! Request orchestration: one call to [`BingChatClient::send_message`] is one
//! exchange on its own hub connection.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{sleep_until, Instant as Deadline};
use tokio_util::sync::CancellationToken;

use crate::config::validation::validate_config;
use crate::config::ClientConfig;
use crate::conversation::{
    render_previous_context, Conversation, ConversationCache, ConversationStore, JsonFileCache,
    MemoryCache, Message, Role,
};
use crate::error::ClientError;
use crate::observability::log_exchange_complete;
use crate::protocol::event::{BotMessage, Throttling};
use crate::protocol::request::{build_invocation, ExchangeMode, InvocationInput, InvocationRequest};
use crate::protocol::session::Session;
use crate::stream::{AssembledReply, ResponseAssembler, Step};
use crate::transport::{HubConnection, HubOptions, SessionFactory};
use crate::util::{new_id, preview_for_log};

/// Whether the client keeps its own history for this exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Tracking {
    /// The hub's server-side session is the only history.
    #[default]
    Untracked,
    /// Start a locally tracked conversation under a fresh handle.
    New,
    /// Continue the locally tracked conversation with this handle.
    Continue(String),
}

impl Tracking {
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        !matches!(self, Tracking::Untracked)
    }
}

pub type ProgressCallback = Box<dyn FnMut(&str) + Send>;

/// Per-call options of [`BingChatClient::send_message`].
#[derive(Default)]
pub struct SendOptions {
    pub mode: ExchangeMode,
    pub tracking: Tracking,
    pub conversation_id: Option<String>,
    pub conversation_signature: Option<String>,
    pub client_id: Option<String>,
    pub invocation_id: u32,
    pub parent_message_id: Option<String>,
    /// Aborts the exchange with [`ClientError::Aborted`] when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Receives each newly appended chunk of reply text.
    pub on_progress: Option<ProgressCallback>,
}

impl SendOptions {
    /// Options that continue the hub session of an earlier response.
    #[must_use]
    pub fn continuing(previous: &SendResponse) -> Self {
        Self {
            conversation_id: Some(previous.conversation_id.clone()),
            conversation_signature: Some(previous.conversation_signature.clone()),
            client_id: Some(previous.client_id.clone()),
            invocation_id: previous.invocation_id,
            ..Self::default()
        }
    }

    fn session(&self) -> Option<Session> {
        Session::from_parts(
            self.conversation_id.as_deref(),
            self.conversation_signature.as_deref(),
            self.client_id.as_deref(),
        )
    }
}

/// Identifiers of a tracked exchange, for continuing the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedInfo {
    pub conversation_handle: String,
    /// Id of the stored bot reply; pass it as the next `parent_message_id`.
    pub message_id: String,
    /// Id of the stored user message.
    pub parent_message_id: String,
}

#[derive(Debug, Clone)]
pub struct SendResponse {
    pub response: String,
    pub details: BotMessage,
    pub conversation_id: String,
    pub conversation_signature: String,
    pub client_id: String,
    /// Invocation id to use for the next turn on this session.
    pub invocation_id: u32,
    pub conversation_expiry_time: Option<String>,
    pub throttling: Option<Throttling>,
    pub tracked: Option<TrackedInfo>,
}

struct TrackedTurn {
    conversation: Conversation,
    user_message_id: String,
}

/// Client for the streaming chat service.
pub struct BingChatClient {
    config: ClientConfig,
    sessions: SessionFactory,
    hub: HubOptions,
    store: ConversationStore,
}

impl BingChatClient {
    /// Build a client whose conversation cache follows `cache.path`: a JSON
    /// file when set, process memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let cache: Arc<dyn ConversationCache> = match &config.cache.path {
            Some(path) => Arc::new(JsonFileCache::new(path)),
            None => Arc::new(MemoryCache::new()),
        };
        Self::with_cache(config, cache)
    }

    /// Build a client on top of a caller-provided cache backend.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the configuration is invalid and
    /// [`ClientError::Transport`] when the HTTP client cannot be built.
    pub fn with_cache(
        config: ClientConfig,
        cache: Arc<dyn ConversationCache>,
    ) -> Result<Self, ClientError> {
        validate_config(&config)?;
        let sessions = SessionFactory::new(&config)?;
        let hub = HubOptions::from_config(&config)?;
        let store = ConversationStore::new(cache, config.cache.namespace.clone());
        Ok(Self {
            config,
            sessions,
            hub,
            store,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Request a fresh session from the service.
    ///
    /// # Errors
    ///
    /// See [`SessionFactory::create`].
    pub async fn create_session(&self) -> Result<Session, ClientError> {
        self.sessions.create().await
    }

    /// Run one exchange and return the assembled reply.
    ///
    /// A new session is created when any part of the caller's triple is
    /// missing or the exchange is tracked. In tracked mode the user message
    /// and the reply are appended to the stored conversation once the reply
    /// resolves; failed exchanges leave the store untouched.
    ///
    /// # Errors
    ///
    /// Returns the first failure among session creation, connection,
    /// timeout, cancellation and reply resolution.
    pub async fn send_message(
        &self,
        text: &str,
        mut options: SendOptions,
    ) -> Result<SendResponse, ClientError> {
        let start_time = Instant::now();
        let cancel = options.cancel.take().unwrap_or_default();
        let mut on_progress = options.on_progress.take();
        let tracked = options.tracking.is_tracked();

        let session = match options.session() {
            Some(session) if !tracked => session,
            _ => {
                tracing::debug!("creating session");
                self.sessions.create().await?
            }
        };

        let mut turn = None;
        let mut previous_context = None;
        let conversation_handle = match &options.tracking {
            Tracking::Untracked => None,
            Tracking::New => {
                options.parent_message_id.get_or_insert_with(new_id);
                Some(new_id())
            }
            Tracking::Continue(handle) => Some(handle.clone()),
        };
        if let Some(handle) = conversation_handle {
            let mut conversation = self.store.get_or_create(&handle).await?;
            let parent = options.parent_message_id.clone();
            if options.invocation_id == 0 {
                previous_context = Some(render_previous_context(
                    &conversation.messages,
                    parent.as_deref(),
                    &self.config.conversation,
                ));
            }
            let user_message = Message::new(Role::User, text, parent);
            let user_message_id = user_message.id.clone();
            conversation.push(user_message);
            turn = Some(TrackedTurn {
                conversation,
                user_message_id,
            });
        }

        let request = build_invocation(
            InvocationInput {
                mode: options.mode,
                session: &session,
                invocation_id: options.invocation_id,
                text,
                previous_context,
            },
            &self.config.service,
        );

        let mut emit = |delta: &str| {
            if let Some(callback) = on_progress.as_mut() {
                callback(delta);
            }
        };
        let reply = self.run_exchange(&request, tracked, &cancel, &mut emit).await?;

        let tracked_info = match turn {
            Some(turn) => Some(self.persist_reply(turn, &reply).await?),
            None => None,
        };

        log_exchange_complete(options.mode.name(), reply.throttling.as_ref(), start_time);

        Ok(SendResponse {
            response: reply.text,
            details: reply.message,
            conversation_id: session.conversation_id,
            conversation_signature: session.conversation_signature,
            client_id: session.client_id,
            invocation_id: options.invocation_id.saturating_add(1),
            conversation_expiry_time: reply.conversation_expiry_time,
            throttling: reply.throttling,
            tracked: tracked_info,
        })
    }

    async fn run_exchange(
        &self,
        request: &InvocationRequest,
        tracked: bool,
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(&str) + Send),
    ) -> Result<AssembledReply, ClientError> {
        let timeout = self.config.exchange.response_timeout();
        let mut connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Aborted),
            () = sleep_until(Deadline::now() + timeout) => return Err(ClientError::Timeout(timeout)),
            opened = HubConnection::open(&self.hub) => opened?,
        };

        let outcome = self
            .drive(&mut connection, request, tracked, cancel, &mut *on_progress)
            .await;
        connection.close().await;
        if let Err(err) = &outcome {
            tracing::debug!(category = ?err.category(), "exchange failed: {err}");
        }
        outcome
    }

    async fn drive(
        &self,
        connection: &mut HubConnection,
        request: &InvocationRequest,
        tracked: bool,
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(&str) + Send),
    ) -> Result<AssembledReply, ClientError> {
        if self.config.features.debug {
            if let Ok(dump) = serde_json::to_string(request) {
                tracing::debug!(request = preview_for_log(&dump), "sending invocation");
            }
        }
        connection.send(request)?;

        let timeout = self.config.exchange.response_timeout();
        let deadline = sleep_until(Deadline::now() + timeout);
        tokio::pin!(deadline);
        let mut assembler = ResponseAssembler::new(tracked);

        loop {
            let record = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ClientError::Aborted),
                () = &mut deadline => return Err(ClientError::Timeout(timeout)),
                record = connection.next_record() => record,
            };
            let Some(record) = record else {
                return Err(ClientError::StreamClosed);
            };
            if let Step::Done(result) = assembler.feed(record.into_event(), &mut *on_progress) {
                return result;
            }
        }
    }

    async fn persist_reply(
        &self,
        turn: TrackedTurn,
        reply: &AssembledReply,
    ) -> Result<TrackedInfo, ClientError> {
        let TrackedTurn {
            mut conversation,
            user_message_id,
        } = turn;
        let details = serde_json::to_value(&reply.message)
            .map_err(|err| ClientError::Internal(format!("Failed to encode reply: {err}")))?;
        let bot_message = Message::new(Role::Bot, reply.text.as_str(), Some(user_message_id))
            .with_details(details);
        let message_id = bot_message.id.clone();
        let parent_message_id = bot_message.parent_message_id.clone().unwrap_or_default();
        conversation.push(bot_message);
        self.store.set(&conversation.handle, &conversation).await?;

        Ok(TrackedInfo {
            conversation_handle: conversation.handle,
            message_id,
            parent_message_id,
        })
    }
}
