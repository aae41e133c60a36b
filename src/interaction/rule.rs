//! Rules and the two-tier rule registry.

use std::{collections::HashSet, fmt, pin::Pin, sync::Arc};

use arc_swap::ArcSwap;

use crate::{
    base::types::{Res, Reply, Scene},
    interaction::{normalizer::NormalizedMessage, orchestrator::Orchestrator, window::WindowSnapshot},
};

// Types.

/// Predicate deciding whether a rule applies to a message.
pub type BoxedCondition = Box<dyn Fn(&TriggerContext) -> Res<bool> + Send + Sync>;

/// Producer of a rule's reply.
pub type BoxedAction = Box<dyn Fn(TriggerContext) -> Pin<Box<dyn Future<Output = Res<Reply>> + Send>> + Send + Sync>;

/// Everything a rule can look at when it is evaluated.
#[derive(Clone)]
pub struct TriggerContext {
    /// The message being dispatched.
    pub message: Arc<NormalizedMessage>,
    /// The conversation window, including `message` as its last entry.
    pub window: WindowSnapshot,
    /// Access to the completion model, sessions, and tools.
    pub orchestrator: Orchestrator,
}

/// Which list a rule lives in.  Dynamic rules are always evaluated first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Dynamic,
    Static,
}

/// A (scenes, condition, action) triple.
pub struct Rule {
    pub scenes: HashSet<Scene>,
    pub description: String,
    pub priority: Priority,
    pub condition: BoxedCondition,
    pub action: BoxedAction,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("scenes", &self.scenes)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl Rule {
    pub fn new<C, A, F>(priority: Priority, scenes: impl IntoIterator<Item = Scene>, description: impl Into<String>, condition: C, action: A) -> Self
    where
        C: Fn(&TriggerContext) -> Res<bool> + Send + Sync + 'static,
        A: Fn(TriggerContext) -> F + Send + Sync + 'static,
        F: Future<Output = Res<Reply>> + Send + 'static,
    {
        Self {
            scenes: scenes.into_iter().collect(),
            description: description.into(),
            priority,
            condition: Box::new(condition),
            action: Box::new(move |context| Box::pin(action(context))),
        }
    }

    /// Whether the rule's scene set contains the message's scene.
    pub fn applies_to(&self, scene: Scene) -> bool {
        self.scenes.contains(&scene)
    }

    /// Evaluate the condition.  Only called once the scene has matched.
    pub fn check(&self, context: &TriggerContext) -> Res<bool> {
        (self.condition)(context)
    }

    /// Run the action.
    pub async fn run(&self, context: TriggerContext) -> Res<Reply> {
        (self.action)(context).await
    }
}

/// The ordered dynamic and static rule lists.
///
/// Both lists are swapped atomically, so a dispatch that loads them sees either the old
/// or the new list, never a mix.  It is trivially cloneable.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    inner: Arc<RuleRegistryInner>,
}

#[derive(Default)]
struct RuleRegistryInner {
    dynamic_rules: ArcSwap<Vec<Arc<Rule>>>,
    static_rules: ArcSwap<Vec<Arc<Rule>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to the static list.
    pub fn register_static_rule(&self, rule: Rule) {
        let rule = Arc::new(rule);

        self.inner.static_rules.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(rule.clone());
            next
        });
    }

    /// Replace the whole dynamic list.
    pub fn replace_dynamic_rules(&self, rules: Vec<Rule>) {
        self.inner.dynamic_rules.store(Arc::new(rules.into_iter().map(Arc::new).collect()));
    }

    /// All rules in evaluation order: dynamic first, then static.
    pub fn ordered(&self) -> Vec<Arc<Rule>> {
        let dynamic = self.inner.dynamic_rules.load_full();
        let static_rules = self.inner.static_rules.load_full();

        dynamic.iter().chain(static_rules.iter()).cloned().collect()
    }

    pub fn dynamic_len(&self) -> usize {
        self.inner.dynamic_rules.load().len()
    }

    pub fn static_len(&self) -> usize {
        self.inner.static_rules.load().len()
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(priority: Priority, description: &str) -> Rule {
        Rule::new(priority, [Scene::Group], description, |_| Ok(true), |_| async { Ok(Reply::text("x")) })
    }

    #[test]
    fn test_dynamic_rules_come_first() {
        let registry = RuleRegistry::new();

        registry.register_static_rule(rule(Priority::Static, "s1"));
        registry.register_static_rule(rule(Priority::Static, "s2"));
        registry.replace_dynamic_rules(vec![rule(Priority::Dynamic, "d1")]);

        let order = registry.ordered().iter().map(|r| r.description.clone()).collect::<Vec<_>>();

        assert_eq!(order, vec!["d1", "s1", "s2"]);
    }

    #[test]
    fn test_replace_dynamic_rules_is_wholesale() {
        let registry = RuleRegistry::new();

        registry.replace_dynamic_rules(vec![rule(Priority::Dynamic, "a"), rule(Priority::Dynamic, "b")]);
        registry.replace_dynamic_rules(vec![rule(Priority::Dynamic, "c")]);

        assert_eq!(registry.dynamic_len(), 1);
        assert_eq!(registry.ordered()[0].description, "c");
    }

    #[test]
    fn test_scene_membership() {
        let rule = rule(Priority::Static, "s");

        assert!(rule.applies_to(Scene::Group));
        assert!(!rule.applies_to(Scene::Private));
    }
}
