//! Composable container predicates.
//!
//! A [`Filter`] is an AND of named predicates; an empty filter matches
//! every container.

use std::fmt;

use crate::container::Container;
use crate::types::ContainerState;

type Predicate = Box<dyn Fn(&Container) -> bool + Send + Sync>;

pub struct Filter {
    predicates: Vec<(&'static str, Predicate)>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.predicates.iter().map(|(name, _)| *name).collect();
        f.debug_struct("Filter").field("predicates", &names).finish()
    }
}

impl Filter {
    pub fn all() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    pub fn and<F>(mut self, name: &'static str, predicate: F) -> Self
    where
        F: Fn(&Container) -> bool + Send + Sync + 'static,
    {
        self.predicates.push((name, Box::new(predicate)));
        self
    }

    pub fn matches(&self, container: &Container) -> bool {
        self.predicates.iter().all(|(_, p)| p(container))
    }

    /// Exact container names; an empty list matches all.
    pub fn by_names(self, names: &[String]) -> Self {
        if names.is_empty() {
            return self;
        }
        let names: Vec<String> = names
            .iter()
            .map(|n| n.trim_start_matches('/').to_string())
            .collect();
        self.and("names", move |c| names.iter().any(|n| n == c.name()))
    }

    /// Honours the `enable` label; containers without it get `default_if_absent`.
    pub fn by_enable_label(self, default_if_absent: bool) -> Self {
        self.and("enable-label", move |c| {
            c.enabled().unwrap_or(default_if_absent)
        })
    }

    /// Scope tag; `"none"` selects containers without a scope label.
    pub fn by_scope(self, scope: Option<&str>) -> Self {
        let Some(scope) = scope.map(str::to_string) else {
            return self;
        };
        self.and("scope", move |c| match c.scope() {
            Some(tag) => tag == scope,
            None => scope == "none",
        })
    }

    pub fn exclude_self(self, agent_id: Option<&str>) -> Self {
        let Some(agent_id) = agent_id.map(str::to_string) else {
            return self;
        };
        self.and("exclude-self", move |c| c.id() != agent_id)
    }

    /// Running containers always pass; stopped and restarting ones only on request.
    pub fn by_state(self, include_stopped: bool, include_restarting: bool) -> Self {
        self.and("state", move |c| match c.state() {
            ContainerState::Running => true,
            ContainerState::Restarting => include_restarting,
            ContainerState::Created | ContainerState::Exited => include_stopped,
            _ => false,
        })
    }
}
