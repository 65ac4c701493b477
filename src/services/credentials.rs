use std::sync::atomic::{AtomicUsize, Ordering};

/// A Gemini API key. The secret never appears in Debug output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(****)")
    }
}

/// Ordered pool of analysis credentials with a rotating pointer.
///
/// The pool holds no retry logic; it only tracks which key is current.
/// `rotate` is the sole mutator and wraps around. The pointer is a
/// monotone counter so rotation counts survive wrap-around.
pub struct CredentialPool {
    keys: Vec<ApiKey>,
    cursor: AtomicUsize,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("credential pool is empty: configure at least one GEMINI_API_KEYS entry")]
    Empty,
}

impl CredentialPool {
    /// Build a pool from raw secrets. Zero credentials is a startup-time
    /// fatal condition, never a runtime retry case.
    pub fn new(secrets: Vec<String>) -> Result<Self, PoolError> {
        let keys: Vec<ApiKey> = secrets
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .map(ApiKey::new)
            .collect();
        if keys.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the currently selected credential.
    pub fn current_index(&self) -> usize {
        self.cursor.load(Ordering::SeqCst) % self.keys.len()
    }

    /// The currently selected credential.
    pub fn current(&self) -> &ApiKey {
        &self.keys[self.current_index()]
    }

    /// Advance to the next credential (circular). Returns the new index.
    pub fn rotate(&self) -> usize {
        let next = self.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::counter!("credential_rotations_total").increment(1);
        next % self.keys.len()
    }

    /// Total rotations performed since startup.
    pub fn rotations(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(CredentialPool::new(vec![]), Err(PoolError::Empty)));
        assert!(matches!(
            CredentialPool::new(vec!["".into(), "  ".into()]),
            Err(PoolError::Empty)
        ));
    }

    #[test]
    fn rotate_wraps_around() {
        let pool = CredentialPool::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(pool.current().secret(), "a");
        assert_eq!(pool.rotate(), 1);
        assert_eq!(pool.current().secret(), "b");
        pool.rotate();
        pool.rotate();
        assert_eq!(pool.current_index(), 0);
        assert_eq!(pool.rotations(), 3);
    }

    #[test]
    fn debug_redacts_secret() {
        let key = ApiKey::new("very-secret");
        assert!(!format!("{:?}", key).contains("very-secret"));
    }
}
