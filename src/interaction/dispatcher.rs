//! Routes each inbound event through the rule lists and delivers the winning reply.

use std::{ops::Deref, sync::Arc};

use tracing::{debug, info, instrument};

use crate::{
    base::types::{Res, Reply, Scene},
    interaction::{
        dynamic::{DynamicRuleStore, HandlerPool},
        normalizer::{RawEvent, normalize},
        orchestrator::Orchestrator,
        rule::{Priority, Rule, RuleRegistry, TriggerContext},
        window::ConversationWindow,
    },
    service::chat::ChatClient,
};

// Types.

/// What the dispatcher did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a chat message (heartbeat, notice, and so on).
    Ignored,
    /// No rule matched.
    NoMatch,
    /// A rule matched and its reply was sent.
    Replied { rule: String },
    /// A rule matched but produced nothing to send.
    Silent { rule: String },
}

// Structs.

/// Dispatcher for inbound chat events.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Deref for Dispatcher {
    type Target = DispatcherInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct DispatcherInner {
    registry: RuleRegistry,
    window: ConversationWindow,
    rules: DynamicRuleStore,
    handlers: HandlerPool,
    orchestrator: Orchestrator,
    chat: ChatClient,
}

impl Dispatcher {
    /// Create a dispatcher with empty rule lists and an empty window.
    pub fn new(rules: DynamicRuleStore, handlers: HandlerPool, orchestrator: Orchestrator, chat: ChatClient) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RuleRegistry::new(),
                window: ConversationWindow::new(),
                rules,
                handlers,
                orchestrator,
                chat,
            }),
        }
    }

    /// Append a static rule.  Static rules are evaluated after every dynamic rule, in
    /// registration order.
    pub fn register_static_rule<C, A, F>(&self, scenes: impl IntoIterator<Item = Scene>, description: impl Into<String>, condition: C, action: A)
    where
        C: Fn(&TriggerContext) -> Res<bool> + Send + Sync + 'static,
        A: Fn(TriggerContext) -> F + Send + Sync + 'static,
        F: Future<Output = Res<Reply>> + Send + 'static,
    {
        self.registry.register_static_rule(Rule::new(Priority::Static, scenes, description, condition, action));
    }

    /// Recompile the live dynamic rules and swap them in.  Returns how many are active.
    #[instrument(name = "Dispatcher::reload_dynamic_rules", skip_all)]
    pub async fn reload_dynamic_rules(&self) -> Res<usize> {
        let rules = self.rules.load_dynamic_rules(&self.handlers).await?;
        let count = rules.len();

        self.registry.replace_dynamic_rules(rules);

        Ok(count)
    }

    /// Normalize an event, record it in its conversation window, and run the first rule
    /// whose scenes and condition match.
    ///
    /// An error from the matched rule's condition or action aborts the dispatch and is
    /// returned; no other rule is tried and nothing is sent.
    #[instrument(name = "Dispatcher::handle_inbound_event", skip_all)]
    pub async fn handle_inbound_event(&self, raw: RawEvent) -> Res<DispatchOutcome> {
        if !raw.is_message() {
            debug!("Ignoring `{}` event.", raw.post_type);
            return Ok(DispatchOutcome::Ignored);
        }

        let message = Arc::new(normalize(raw)?);
        let window = self.window.record(message.clone());

        let context = TriggerContext {
            message: message.clone(),
            window,
            orchestrator: self.orchestrator.clone(),
        };

        for rule in self.registry.ordered() {
            if !rule.applies_to(message.scene) || !rule.check(&context)? {
                continue;
            }

            info!("Rule `{}` matched a {:?} message in {}.", rule.description, message.scene, message.conversation);

            let reply = rule.run(context).await?;

            if reply.is_empty() {
                info!("Rule `{}` produced an empty reply; nothing sent.", rule.description);
                return Ok(DispatchOutcome::Silent { rule: rule.description.clone() });
            }

            self.chat.send_reply(&message.conversation, &reply).await?;

            return Ok(DispatchOutcome::Replied { rule: rule.description.clone() });
        }

        Ok(DispatchOutcome::NoMatch)
    }
}

impl DispatcherInner {
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    pub fn dynamic_rules(&self) -> &DynamicRuleStore {
        &self.rules
    }

    pub fn handlers(&self) -> &HandlerPool {
        &self.handlers
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn chat(&self) -> &ChatClient {
        &self.chat
    }
}
