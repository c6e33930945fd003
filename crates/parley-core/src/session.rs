//! Session Identity
//!
//! Compound key (agent, chat, user, group, scope) addressing one logical
//! conversation's stored state, plus the keyed collection used to track them.

use serde::{Deserialize, Serialize};

/// Chat name used in keys when none is given.
pub const DEFAULT_CHAT_NAME: &str = "default";

/// Immutable identity of one session's stored state.
///
/// Key layout: `{agent}_{chat}[_user-{id}][_group-{group}][:{scope}]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub agent_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl SessionIdentity {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            chat_name: None,
            user_id: None,
            group: None,
            scope: None,
        }
    }

    pub fn with_chat(mut self, chat_name: impl Into<String>) -> Self {
        self.chat_name = Some(chat_name.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Copy of this identity namespaced to `scope`.
    #[must_use]
    pub fn with_scope(&self, scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..self.clone()
        }
    }

    /// Copy of this identity without a scope.
    #[must_use]
    pub fn unscoped(&self) -> Self {
        Self {
            scope: None,
            ..self.clone()
        }
    }

    pub fn chat_name(&self) -> &str {
        self.chat_name.as_deref().unwrap_or(DEFAULT_CHAT_NAME)
    }

    /// Deterministic storage lookup key.
    pub fn key(&self) -> String {
        let mut key = format!("{}_{}", self.agent_name, self.chat_name());
        if let Some(user) = &self.user_id {
            key.push_str("_user-");
            key.push_str(user);
        }
        if let Some(group) = &self.group {
            key.push_str("_group-");
            key.push_str(group);
        }
        if let Some(scope) = &self.scope {
            key.push(':');
            key.push_str(scope);
        }
        key
    }
}

impl std::fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Ordered set of identities, unique by [`SessionIdentity::key`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentityArray {
    items: Vec<SessionIdentity>,
}

impl SessionIdentityArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an identity with the same key is present.
    /// Returns whether the identity was inserted.
    pub fn add(&mut self, identity: SessionIdentity) -> bool {
        if self.has_key(&identity.key()) {
            return false;
        }
        self.items.push(identity);
        true
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.items.iter().any(|i| i.key() == key)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&SessionIdentity> {
        self.items.iter().find(|i| i.key() == key)
    }

    /// Remove by key, returning the removed identity.
    pub fn remove_by_key(&mut self, key: &str) -> Option<SessionIdentity> {
        let pos = self.items.iter().position(|i| i.key() == key)?;
        Some(self.items.remove(pos))
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(SessionIdentity::key).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SessionIdentity> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[SessionIdentity] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<SessionIdentity> for SessionIdentityArray {
    fn from_iter<I: IntoIterator<Item = SessionIdentity>>(iter: I) -> Self {
        let mut array = Self::new();
        for identity in iter {
            array.add(identity);
        }
        array
    }
}
