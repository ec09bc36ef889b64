//! Scope Resolver (spec.md §4.2) — pure functions from channel identity to
//! scope keys. No state, no manager object: just like the teacher's
//! `SessionKey::format`/`parse`, this is cheap enough to be free functions.

use crate::types::{MemoryKind, ScopeKind};

/// Resolve the three scope keys reachable from one turn's channel identity.
pub fn resolve(channel: &str, chat_id: &str, sender_id: Option<&str>, workspace_id: &str) -> crate::types::ResolvedScopes {
    let user_component = sender_id.unwrap_or(chat_id);
    crate::types::ResolvedScopes {
        chat: chat_scope(channel, chat_id),
        user: user_scope(channel, user_component),
        global: global_scope(workspace_id),
    }
}

pub fn chat_scope(channel: &str, chat_id: &str) -> String {
    format!("channel:{channel}:chat:{chat_id}")
}

pub fn user_scope(channel: &str, user_component: &str) -> String {
    format!("channel:{channel}:user:{user_component}")
}

pub fn global_scope(workspace_id: &str) -> String {
    format!("workspace:{workspace_id}:global")
}

/// The kind→scope default mapping used by Capture (spec.md §4.2):
/// `preference,fact → user`; `decision,episodic → chat`. Extractor output
/// always goes through this mapping; manual inserts may override it via an
/// explicit `--scope` argument instead.
pub fn default_scope_kind(kind: MemoryKind) -> ScopeKind {
    match kind {
        MemoryKind::Preference | MemoryKind::Fact => ScopeKind::User,
        MemoryKind::Decision | MemoryKind::Episodic => ScopeKind::Chat,
    }
}

/// Pick the concrete scope key for a kind out of an already-resolved triple.
pub fn scope_key_for(kind: MemoryKind, scopes: &crate::types::ResolvedScopes) -> String {
    key_for_scope_kind(default_scope_kind(kind), scopes)
}

/// Pick the concrete scope key for an explicit `ScopeKind`, bypassing the
/// kind→scope default. Manual inserts use this to honor an operator-supplied
/// `--scope` override (spec.md §4.2: defaults "MAY be overridden by explicit
/// manual insert parameters").
pub fn key_for_scope_kind(scope_kind: ScopeKind, scopes: &crate::types::ResolvedScopes) -> String {
    match scope_kind {
        ScopeKind::Chat => scopes.chat.clone(),
        ScopeKind::User => scopes.user.clone(),
        ScopeKind::Global => scopes.global.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_three_independent_keys() {
        let scopes = resolve("cli", "chat-a", Some("sender-1"), "ws-1");
        assert_eq!(scopes.chat, "channel:cli:chat:chat-a");
        assert_eq!(scopes.user, "channel:cli:user:sender-1");
        assert_eq!(scopes.global, "workspace:ws-1:global");
    }

    #[test]
    fn user_scope_falls_back_to_chat_id_when_sender_absent() {
        let scopes = resolve("cli", "chat-a", None, "ws-1");
        assert_eq!(scopes.user, "channel:cli:user:chat-a");
    }

    #[test]
    fn key_for_scope_kind_honors_explicit_override() {
        let scopes = resolve("cli", "chat-a", Some("sender-1"), "ws-1");
        assert_eq!(key_for_scope_kind(ScopeKind::Global, &scopes), scopes.global);
        assert_eq!(key_for_scope_kind(ScopeKind::Chat, &scopes), scopes.chat);
        assert_eq!(key_for_scope_kind(ScopeKind::User, &scopes), scopes.user);
    }

    #[test]
    fn kind_defaults_match_spec() {
        assert_eq!(default_scope_kind(MemoryKind::Preference), ScopeKind::User);
        assert_eq!(default_scope_kind(MemoryKind::Fact), ScopeKind::User);
        assert_eq!(default_scope_kind(MemoryKind::Decision), ScopeKind::Chat);
        assert_eq!(default_scope_kind(MemoryKind::Episodic), ScopeKind::Chat);
    }
}
