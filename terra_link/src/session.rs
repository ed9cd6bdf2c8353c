//! Session store: tokens, TTL, second-factor state.

use rand::RngCore;
use std::collections::HashMap;
use tracing::info;

/// One live operator session, bound to the client certificate CN.
#[derive(Debug, Clone)]
pub struct Session {
    /// 256-bit random token, hex.
    pub token: String,
    pub client_cn: String,
    /// Wall-clock creation time [ms].
    pub created_at_ms: u64,
    /// Wall-clock expiry [ms].
    pub expires_at_ms: u64,
    /// Wall-clock last activity [ms].
    pub last_activity_ms: u64,
    /// Second-factor proof recorded for this session.
    pub second_factor: bool,
}

/// Session store. Single writer (the link server task).
#[derive(Debug)]
pub struct SessionManager {
    ttl_ms: u64,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            sessions: HashMap::new(),
        }
    }

    /// Create a session bound to `client_cn`.
    pub fn create(&mut self, client_cn: &str, now_ms: u64) -> Session {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let session = Session {
            token: hex::encode(bytes),
            client_cn: client_cn.to_string(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + self.ttl_ms,
            last_activity_ms: now_ms,
            second_factor: false,
        };
        info!(client = client_cn, "session created");
        self.sessions.insert(session.token.clone(), session.clone());
        session
    }

    /// Look up a live session and touch its activity time.
    pub fn touch(&mut self, token: &str, now_ms: u64) -> Option<&Session> {
        let session = self.sessions.get_mut(token)?;
        if now_ms > session.expires_at_ms {
            return None;
        }
        session.last_activity_ms = now_ms;
        Some(session)
    }

    /// Record a second-factor proof on a live session.
    pub fn record_second_factor(&mut self, token: &str, now_ms: u64) -> bool {
        match self.sessions.get_mut(token) {
            Some(s) if now_ms <= s.expires_at_ms => {
                s.second_factor = true;
                true
            }
            _ => false,
        }
    }

    /// Explicitly invalidate a session.
    pub fn invalidate(&mut self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop expired sessions; returns how many were removed.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now_ms <= s.expires_at_ms);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_touch() {
        let mut m = SessionManager::new(3_600_000);
        let s = m.create("operator-1", 1_000);
        assert_eq!(s.token.len(), 64); // 256 bits hex
        let touched = m.touch(&s.token, 2_000).unwrap();
        assert_eq!(touched.last_activity_ms, 2_000);
        assert_eq!(touched.client_cn, "operator-1");
    }

    #[test]
    fn expired_session_rejected_and_purged() {
        let mut m = SessionManager::new(1_000);
        let s = m.create("operator-1", 0);
        assert!(m.touch(&s.token, 500).is_some());
        assert!(m.touch(&s.token, 2_000).is_none());
        assert_eq!(m.purge_expired(2_000), 1);
        assert!(m.is_empty());
    }

    #[test]
    fn second_factor_lifecycle() {
        let mut m = SessionManager::new(1_000);
        let s = m.create("operator-1", 0);
        assert!(!m.touch(&s.token, 10).unwrap().second_factor);
        assert!(m.record_second_factor(&s.token, 20));
        assert!(m.touch(&s.token, 30).unwrap().second_factor);
        // Not on expired sessions.
        assert!(!m.record_second_factor(&s.token, 5_000));
    }

    #[test]
    fn invalidate_removes() {
        let mut m = SessionManager::new(1_000);
        let s = m.create("operator-1", 0);
        assert!(m.invalidate(&s.token));
        assert!(!m.invalidate(&s.token));
        assert!(m.touch(&s.token, 10).is_none());
    }

    #[test]
    fn tokens_are_unique() {
        let mut m = SessionManager::new(1_000);
        let a = m.create("x", 0);
        let b = m.create("x", 0);
        assert_ne!(a.token, b.token);
    }
}
