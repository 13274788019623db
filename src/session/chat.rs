//! Session handle and request preparation

use super::reply::{ReplyStream, Turn};
use super::{PartialReplyPolicy, SessionState};
use crate::api::{ChatCompletionRequest, CompletionClient, WireMessage};
use crate::config::{default_system_prompt, Config, GenerationConfig};
use crate::context::{truncate, ModelProfile, TokenAccountant};
use crate::conversation::{
    Conversation, ConversationSet, ConversationStore, Message, Role, DEFAULT_CONVERSATION,
};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Model, prompt and sampling defaults of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub profile: ModelProfile,
    pub system_prompt: String,
    pub generation: GenerationConfig,
    pub partial_reply: PartialReplyPolicy,
}

impl SessionSettings {
    pub fn new(model: &str, system_prompt: impl Into<String>) -> Self {
        Self {
            profile: ModelProfile::for_model(model),
            system_prompt: system_prompt.into(),
            generation: GenerationConfig::default(),
            partial_reply: PartialReplyPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            profile: config.model_profile(&config.api.model)?,
            system_prompt: config.session.system_prompt.clone(),
            generation: config.generation.clone(),
            partial_reply: config.session.partial_reply,
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::new("gpt-3.5-turbo", default_system_prompt())
    }
}

/// Per-call options of `ask`
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub conversation_id: String,
    /// Send the stored history; when false only the prompt is sent and nothing is stored
    pub pass_history: bool,
    pub model: Option<String>,
    /// Value of the request's `user` field
    pub user: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub reply_count: Option<u32>,
    pub max_tokens: Option<usize>,
    /// Bound on the wait for response headers
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            conversation_id: DEFAULT_CONVERSATION.to_string(),
            pass_history: true,
            model: None,
            user: "user".to_string(),
            temperature: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            reply_count: None,
            max_tokens: None,
            timeout: None,
            cancel: None,
        }
    }
}

impl AskOptions {
    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = id.into();
        self
    }

    pub fn stateless(mut self) -> Self {
        self.pass_history = false;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Mutable part of a session, guarded by one lock
pub(super) struct SessionCore {
    pub(super) state: SessionState,
    pub(super) store: ConversationStore,
    pub(super) settings: SessionSettings,
    pub(super) last_prompt: Option<String>,
}

impl SessionCore {
    fn ensure_idle(&self) -> Result<()> {
        if self.state.is_busy() {
            return Err(ChatError::SessionBusy);
        }
        Ok(())
    }
}

pub(super) struct SessionInner {
    client: CompletionClient,
    accountant: Arc<TokenAccountant>,
    core: Mutex<SessionCore>,
}

impl SessionInner {
    /// Never held across an await point
    pub(super) fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request ready to be sent
struct Prepared {
    request: ChatCompletionRequest,
    conversation_id: Option<String>,
    policy: PartialReplyPolicy,
}

/// Handle to one chat session. Clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Create a session seeded with the `default` conversation.
    ///
    /// Fails with `SystemPromptTooLong` before any network call when the
    /// system prompt alone does not fit the model.
    pub fn new(client: CompletionClient, settings: SessionSettings) -> Result<Self> {
        Self::with_accountant(client, settings, Arc::new(TokenAccountant::new()))
    }

    /// Create a session sharing an existing accountant and its encoding cache
    pub fn with_accountant(
        client: CompletionClient,
        settings: SessionSettings,
        accountant: Arc<TokenAccountant>,
    ) -> Result<Self> {
        settings.profile.validate()?;
        check_seed(&accountant, &settings.profile, &settings.system_prompt)?;

        let store = ConversationStore::from_set(ConversationSet::with_default(
            settings.system_prompt.clone(),
        ));

        info!(
            "Session ready: model={}, max_tokens={}, truncate_limit={}",
            settings.profile.id, settings.profile.max_tokens, settings.profile.truncate_limit
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                accountant,
                core: Mutex::new(SessionCore {
                    state: SessionState::Idle,
                    store,
                    settings,
                    last_prompt: None,
                }),
            }),
        })
    }

    pub fn client(&self) -> &CompletionClient {
        &self.inner.client
    }

    pub fn accountant(&self) -> Arc<TokenAccountant> {
        self.inner.accountant.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.core().state
    }

    pub fn settings(&self) -> SessionSettings {
        self.inner.core().settings.clone()
    }

    /// Prompt of the most recent `ask`
    pub fn last_prompt(&self) -> Option<String> {
        self.inner.core().last_prompt.clone()
    }

    /// Copy of one conversation
    pub fn conversation(&self, id: &str) -> Result<Conversation> {
        self.inner.core().store.get(id).cloned()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        self.inner.core().store.ids()
    }

    /// Token cost of a stored conversation under the session's model
    pub fn token_count(&self, id: &str) -> Result<usize> {
        let core = self.inner.core();
        let conversation = core.store.get(id)?;
        self.inner
            .accountant
            .count_tokens(conversation, &core.settings.profile.id)
    }

    /// Seed a new conversation
    pub fn create_conversation(&self, id: &str, system_prompt: &str, overwrite: bool) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        check_seed(&self.inner.accountant, &core.settings.profile, system_prompt)?;
        core.store.create(id, system_prompt, overwrite)?;
        Ok(())
    }

    /// Reseed a conversation, with the session prompt unless one is given
    pub fn reset(&self, id: &str, system_prompt: Option<&str>) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        let prompt = system_prompt
            .map(str::to_string)
            .unwrap_or_else(|| core.settings.system_prompt.clone());
        check_seed(&self.inner.accountant, &core.settings.profile, &prompt)?;

        core.store.create(id, &prompt, true)?;
        core.state = SessionState::Idle;
        debug!("Conversation '{}' reset", id);
        Ok(())
    }

    /// Change the session prompt and reseed `default` with it
    pub fn set_system_prompt(&self, system_prompt: &str) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        check_seed(&self.inner.accountant, &core.settings.profile, system_prompt)?;

        core.settings.system_prompt = system_prompt.to_string();
        core.store.create(DEFAULT_CONVERSATION, system_prompt, true)?;
        core.state = SessionState::Idle;
        Ok(())
    }

    /// Move to another model. Every conversation is replaced by a fresh `default`.
    pub fn switch_model(&self, profile: ModelProfile) -> Result<()> {
        profile.validate()?;
        let mut core = self.inner.core();
        core.ensure_idle()?;
        check_seed(&self.inner.accountant, &profile, &core.settings.system_prompt)?;

        info!("Switching model: {} -> {}", core.settings.profile.id, profile.id);
        let seed = core.settings.system_prompt.clone();
        core.store.restore(ConversationSet::with_default(seed));
        core.settings.profile = profile;
        core.state = SessionState::Idle;
        Ok(())
    }

    pub fn append(&self, id: &str, message: Message) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        core.store.append(id, message)
    }

    /// Remove the last `n` messages. Only valid while `Idle` or `Completed`.
    pub fn rollback(&self, id: &str, n: usize) -> Result<Vec<Message>> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        if !matches!(core.state, SessionState::Idle | SessionState::Completed) {
            return Err(ChatError::InvalidState(format!(
                "cannot roll back while {}",
                core.state
            )));
        }
        core.store.rollback(id, n)
    }

    /// Swap in a loaded message list
    pub fn replace(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        core.store.replace(id, messages)
    }

    pub fn snapshot(&self) -> ConversationSet {
        self.inner.core().store.snapshot()
    }

    /// Replace every conversation with a loaded set. A set without `default`
    /// gets a fresh one.
    pub fn restore(&self, mut conversations: ConversationSet) -> Result<()> {
        let mut core = self.inner.core();
        core.ensure_idle()?;
        if !conversations.contains(DEFAULT_CONVERSATION) {
            conversations.insert(
                DEFAULT_CONVERSATION,
                Conversation::seeded(core.settings.system_prompt.clone()),
            );
        }
        core.store.restore(conversations);
        core.state = SessionState::Idle;
        Ok(())
    }

    /// Ask and stream the reply fragment by fragment
    pub async fn ask_stream(&self, prompt: &str, options: AskOptions) -> Result<ReplyStream> {
        let prepared = {
            let mut core = self.inner.core();
            self.prepare(&mut core, prompt, &options)?
        };
        self.dispatch(prepared, options).await
    }

    /// Ask and wait for the whole reply
    pub async fn ask(&self, prompt: &str, options: AskOptions) -> Result<String> {
        let mut stream = self.ask_stream(prompt, options).await?;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            reply.push_str(&fragment?);
        }
        Ok(reply)
    }

    /// Remove the last exchange and ask its prompt again.
    ///
    /// A trailing user message (no reply was received) is removed alone; a
    /// trailing assistant reply is removed together with its prompt.
    pub async fn retry(&self, mut options: AskOptions) -> Result<ReplyStream> {
        options.pass_history = true;
        let prepared = {
            let mut core = self.inner.core();
            core.ensure_idle()?;

            let (remove, prompt) = retry_target(core.store.get(&options.conversation_id)?)?;
            debug!(
                "Retrying '{}': removing {} trailing messages",
                options.conversation_id, remove
            );
            core.store.rollback(&options.conversation_id, remove)?;
            self.prepare(&mut core, &prompt, &options)?
        };
        self.dispatch(prepared, options).await
    }

    /// Validate, record the prompt, truncate and build the request.
    /// Enters `Sending` only when everything succeeded.
    fn prepare(&self, core: &mut SessionCore, prompt: &str, options: &AskOptions) -> Result<Prepared> {
        core.ensure_idle()?;

        let settings = &core.settings;
        let profile = match &options.model {
            Some(model) if *model != settings.profile.id => ModelProfile::for_model(model),
            _ => settings.profile.clone(),
        };
        let generation = settings.generation.clone();
        let policy = settings.partial_reply;

        let messages = if options.pass_history {
            let conversation = core.store.get_mut(&options.conversation_id)?;
            conversation.push(Message::user(prompt));
            let outcome = truncate(conversation, &profile, &self.inner.accountant)?;
            if outcome.exhausted(&profile) {
                warn!(
                    "Conversation '{}' is {} tokens after truncation, limit {}",
                    options.conversation_id, outcome.tokens, profile.truncate_limit
                );
            }
            conversation.messages().to_vec()
        } else {
            vec![Message::user(prompt)]
        };

        let prompt_tokens = self.inner.accountant.count_messages(&messages, &profile.id)?;
        let max_tokens =
            profile.reply_budget(prompt_tokens, options.max_tokens.or(generation.max_tokens));
        let model = self
            .inner
            .client
            .config()
            .model_override
            .clone()
            .unwrap_or_else(|| profile.id.clone());

        let request = ChatCompletionRequest {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
            temperature: options.temperature.unwrap_or(generation.temperature),
            top_p: options.top_p.unwrap_or(generation.top_p),
            presence_penalty: options.presence_penalty.unwrap_or(generation.presence_penalty),
            frequency_penalty: options.frequency_penalty.unwrap_or(generation.frequency_penalty),
            n: options.reply_count.unwrap_or(generation.reply_count),
            user: options.user.clone(),
            max_tokens,
        };

        METRICS.prompt_tokens.observe(prompt_tokens as f64);
        info!(
            "Sending prompt: conversation={}, model={}, prompt_tokens={}, max_tokens={}",
            options.conversation_id, request.model, prompt_tokens, max_tokens
        );

        core.state = SessionState::Sending;
        core.last_prompt = Some(prompt.to_string());

        Ok(Prepared {
            request,
            conversation_id: options.pass_history.then(|| options.conversation_id.clone()),
            policy,
        })
    }

    async fn dispatch(&self, prepared: Prepared, options: AskOptions) -> Result<ReplyStream> {
        let cancel = options.cancel.unwrap_or_default();
        let mut turn = Turn::new(self.inner.clone(), prepared.conversation_id, prepared.policy);

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            sent = self.inner.client.stream_chat(&prepared.request, options.timeout) => sent,
        };

        match sent {
            Ok(response) => {
                turn.set_state(SessionState::Streaming);
                Ok(ReplyStream::new(response, turn, cancel))
            }
            Err(ChatError::Cancelled) => {
                turn.cancel();
                Err(ChatError::Cancelled)
            }
            Err(e) => {
                error!("Completion request failed: {}", e);
                turn.fail();
                Err(e)
            }
        }
    }
}

/// Messages to drop and prompt to resend for a retry
fn retry_target(conversation: &Conversation) -> Result<(usize, String)> {
    let messages = conversation.messages();
    let len = messages.len();
    let last = conversation.last();

    let target = match last.role {
        Role::User if conversation.removable() >= 1 => Some((1, last.content.clone())),
        Role::Assistant if len >= 3 && messages[len - 2].role == Role::User => {
            Some((2, messages[len - 2].content.clone()))
        }
        _ => None,
    };

    target.ok_or_else(|| ChatError::InvalidState("no prompt to retry".to_string()))
}

/// Fail when a system prompt alone exceeds the model window
fn check_seed(accountant: &TokenAccountant, profile: &ModelProfile, system_prompt: &str) -> Result<()> {
    let tokens = accountant.count_messages(&[Message::system(system_prompt)], &profile.id)?;
    profile.check_system_prompt(tokens)
}
