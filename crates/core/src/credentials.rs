use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no API keys configured (set GOOGLE_API_KEYS)")]
    EmptyPool,
}

/// Ordered API keys with a cursor pointing at the active one.
///
/// Owned by the analysis client and only touched from the worker loop. Two
/// workers sharing the same keys will rotate independently of each other.
pub struct CredentialPool {
    keys: Vec<String>,
    index: usize,
    active: Option<String>,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        if keys.is_empty() {
            warn!("credential pool is empty, analysis requests will fail until keys are configured");
        }

        let mut pool = Self {
            keys,
            index: 0,
            active: None,
        };
        pool.init();
        pool
    }

    /// Build a pool from a comma separated list, skipping blanks and
    /// placeholder values left over from example configs.
    pub fn from_list(raw: &str) -> Self {
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .filter(|key| {
                let placeholder = is_placeholder(key);
                if placeholder {
                    warn!("ignoring placeholder API key entry");
                }
                !placeholder
            })
            .map(str::to_string)
            .collect();

        Self::new(keys)
    }

    /// Re-derive the active key from the cursor. The cursor is wrapped so it
    /// can never point past the end of the pool.
    pub fn init(&mut self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        self.index %= self.keys.len();
        self.active = Some(self.keys[self.index].clone());
        info!(slot = self.index + 1, total = self.keys.len(), "using API key");
        self.active.as_deref()
    }

    /// Advance to the next key, wrapping around at the end.
    pub fn rotate(&mut self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        self.index += 1;
        self.init()
    }

    pub fn active(&self) -> Result<&str, CredentialError> {
        self.active.as_deref().ok_or(CredentialError::EmptyPool)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .field("index", &self.index)
            .finish()
    }
}

fn is_placeholder(key: &str) -> bool {
    key.contains("YOUR_") || key.chars().count() <= 10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> CredentialPool {
        CredentialPool::new((0..n).map(|i| format!("test-api-key-{i:02}")).collect())
    }

    #[test]
    fn starts_on_first_key() {
        let pool = pool(3);
        assert_eq!(pool.index(), 0);
        assert_eq!(pool.active().unwrap(), "test-api-key-00");
    }

    #[test]
    fn rotation_is_cyclic() {
        let mut pool = pool(3);
        assert_eq!(pool.rotate(), Some("test-api-key-01"));
        assert_eq!(pool.rotate(), Some("test-api-key-02"));
        assert_eq!(pool.rotate(), Some("test-api-key-00"));
        assert_eq!(pool.index(), 0);
    }

    #[test]
    fn rotating_len_times_returns_to_start_from_any_slot() {
        let mut pool = pool(4);
        pool.rotate();
        let start = pool.index();
        for _ in 0..pool.len() {
            pool.rotate();
        }
        assert_eq!(pool.index(), start);
    }

    #[test]
    fn single_key_rotates_onto_itself() {
        let mut pool = pool(1);
        assert_eq!(pool.rotate(), Some("test-api-key-00"));
    }

    #[test]
    fn empty_pool_is_a_no_op() {
        let mut pool = CredentialPool::new(Vec::new());
        assert_eq!(pool.init(), None);
        assert_eq!(pool.rotate(), None);
        assert_eq!(pool.index(), 0);
        assert_eq!(pool.active(), Err(CredentialError::EmptyPool));
    }

    #[test]
    fn list_parsing_skips_blanks_and_placeholders() {
        let pool = CredentialPool::from_list(" AIzaSyA-first-key-0001 , ,YOUR_API_KEY_HERE, short, AIzaSyB-second-key-0002");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.active().unwrap(), "AIzaSyA-first-key-0001");
    }

    #[test]
    fn debug_output_hides_keys() {
        let rendered = format!("{:?}", pool(2));
        assert!(!rendered.contains("test-api-key"));
        assert!(rendered.contains("2 redacted"));
    }
}
