//! crates/chat_core/src/sessions.rs
//!
//! The session manager: create, switch, rename and delete the named chat
//! threads of a user record, and keep `active_session` pointing at one of
//! them.

use crate::domain::{Session, SessionId, UserRecord};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// What callers see of a session without its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub created: String,
    pub turns: usize,
    pub active: bool,
}

impl UserRecord {
    /// Makes `active_session` resolve to an existing session, creating a
    /// default one if the record has none. Returns whether anything changed.
    ///
    /// When the pointer dangles the replacement is whichever session
    /// iterates first; callers must not rely on which one that is.
    pub fn ensure_active(&mut self, now: DateTime<Utc>) -> bool {
        let resolves = self
            .active_session
            .as_ref()
            .is_some_and(|id| self.sessions.contains_key(id));
        if resolves {
            return false;
        }
        match self.sessions.keys().next().cloned() {
            Some(first) => self.active_session = Some(first),
            None => {
                let id = self.mint_session_id();
                self.sessions.insert(id.clone(), Session::new("Chat 1", now));
                self.active_session = Some(id);
            }
        }
        true
    }

    /// Creates an empty session and makes it active. A blank name becomes
    /// "Chat {n}" where n is one more than the current session count.
    pub fn create_session(&mut self, requested_name: Option<&str>, now: DateTime<Utc>) -> SessionId {
        let name = match requested_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Chat {}", self.sessions.len() + 1),
        };
        let id = self.mint_session_id();
        info!(session_id = %id, name = %name, "Created chat session.");
        self.sessions.insert(id.clone(), Session::new(name, now));
        self.active_session = Some(id.clone());
        id
    }

    pub fn switch_session(&mut self, session_id: &str) -> CoreResult<()> {
        self.require_session(session_id)?;
        self.active_session = Some(session_id.to_string());
        Ok(())
    }

    pub fn rename_session(&mut self, session_id: &str, new_name: &str) -> CoreResult<()> {
        self.require_session(session_id)?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(CoreError::InvalidArgument(
                "session name must not be empty".to_string(),
            ));
        }
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.name = new_name.to_string();
        }
        Ok(())
    }

    /// Deletes a session. The last remaining session can never be deleted.
    pub fn delete_session(&mut self, session_id: &str) -> CoreResult<()> {
        self.require_session(session_id)?;
        if self.sessions.len() <= 1 {
            return Err(CoreError::InvalidState(
                "cannot delete the last session".to_string(),
            ));
        }
        self.sessions.remove(session_id);
        if self.active_session.as_deref() == Some(session_id) {
            self.active_session = self.sessions.keys().next().cloned();
        }
        info!(session_id = %session_id, "Deleted chat session.");
        Ok(())
    }

    pub fn active(&self) -> Option<(&SessionId, &Session)> {
        let id = self.active_session.as_ref()?;
        self.sessions.get_key_value(id)
    }

    pub fn active_session_mut(&mut self) -> Option<&mut Session> {
        let id = self.active_session.as_ref()?;
        self.sessions.get_mut(id)
    }

    /// Sessions oldest first.
    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|(id, session)| SessionSummary {
                id: id.clone(),
                name: session.name.clone(),
                created: session.created.clone(),
                turns: session.history.len(),
                active: self.active_session.as_ref() == Some(id),
            })
            .collect();
        summaries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    fn require_session(&self, session_id: &str) -> CoreResult<()> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("session {}", session_id)))
        }
    }

    fn mint_session_id(&self) -> SessionId {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Turn;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn empty_record() -> UserRecord {
        let mut record = UserRecord::new(now());
        record.sessions = BTreeMap::new();
        record.active_session = None;
        record
    }

    #[test]
    fn test_ensure_active_creates_default_session_when_empty() {
        let mut record = empty_record();
        assert!(record.ensure_active(now()));
        assert_eq!(record.sessions.len(), 1);
        let (id, session) = record.active().unwrap();
        assert!(record.sessions.contains_key(id));
        assert_eq!(session.name, "Chat 1");
    }

    #[test]
    fn test_ensure_active_repairs_dangling_pointer() {
        let mut record = UserRecord::new(now());
        record.create_session(Some("Work"), now());
        record.active_session = Some("gone".to_string());
        assert!(record.ensure_active(now()));
        let active = record.active_session.clone().unwrap();
        assert!(record.sessions.contains_key(&active));
        assert_eq!(record.sessions.len(), 2);
    }

    #[test]
    fn test_ensure_active_leaves_valid_pointer_alone() {
        let mut record = UserRecord::new(now());
        let before = record.clone();
        assert!(!record.ensure_active(now()));
        assert_eq!(record, before);
    }

    #[test]
    fn test_create_named_session_becomes_active() {
        let mut record = UserRecord::new(now());
        let id = record.create_session(Some("  Work "), now());
        assert_eq!(record.sessions.len(), 2);
        assert_eq!(record.active_session.as_deref(), Some(id.as_str()));
        assert_eq!(record.sessions[&id].name, "Work");
        assert!(record.sessions[&id].history.is_empty());
    }

    #[test]
    fn test_blank_name_is_numbered_after_existing_sessions() {
        let mut record = UserRecord::new(now());
        record.create_session(Some("Work"), now());
        record.create_session(None, now());
        assert_eq!(record.sessions.len(), 3);
        let id = record.create_session(Some("   "), now());
        assert_eq!(record.sessions[&id].name, "Chat 4");
    }

    #[test]
    fn test_switch_to_unknown_session_fails() {
        let mut record = UserRecord::new(now());
        let before = record.active_session.clone();
        assert!(matches!(record.switch_session("nope"), Err(CoreError::NotFound(_))));
        assert_eq!(record.active_session, before);
    }

    #[test]
    fn test_switch_changes_active_session() {
        let mut record = UserRecord::new(now());
        let first = record.active_session.clone().unwrap();
        record.create_session(None, now());
        record.switch_session(&first).unwrap();
        assert_eq!(record.active_session, Some(first));
    }

    #[test]
    fn test_rename_validates_name_and_session() {
        let mut record = UserRecord::new(now());
        let id = record.active_session.clone().unwrap();
        assert!(matches!(
            record.rename_session(&id, "  "),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            record.rename_session("nope", "Name"),
            Err(CoreError::NotFound(_))
        ));
        record.rename_session(&id, " Travel plans ").unwrap();
        assert_eq!(record.sessions[&id].name, "Travel plans");
    }

    #[test]
    fn test_deleting_the_last_session_is_rejected() {
        let mut record = UserRecord::new(now());
        let id = record.active_session.clone().unwrap();
        assert!(matches!(
            record.delete_session(&id),
            Err(CoreError::InvalidState(_))
        ));
        assert_eq!(record.sessions.len(), 1);
    }

    #[test]
    fn test_deleting_active_session_activates_a_survivor() {
        let mut record = UserRecord::new(now());
        record.create_session(Some("B"), now());
        let c = record.create_session(Some("C"), now());
        record.delete_session(&c).unwrap();
        assert_eq!(record.sessions.len(), 2);
        let active = record.active_session.clone().unwrap();
        assert!(record.sessions.contains_key(&active));
    }

    #[test]
    fn test_deleting_inactive_session_keeps_active_pointer() {
        let mut record = UserRecord::new(now());
        let first = record.active_session.clone().unwrap();
        let second = record.create_session(None, now());
        record.switch_session(&first).unwrap();
        record.delete_session(&second).unwrap();
        assert_eq!(record.active_session, Some(first));
    }

    #[test]
    fn test_summaries_flag_the_active_session() {
        let mut record = UserRecord::new(now());
        let id = record.create_session(Some("Work"), now());
        record
            .active_session_mut()
            .unwrap()
            .append(Turn::user("hello", now()));
        let summaries = record.session_summaries();
        assert_eq!(summaries.len(), 2);
        let active: Vec<_> = summaries.iter().filter(|s| s.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert_eq!(active[0].turns, 1);
    }
}
