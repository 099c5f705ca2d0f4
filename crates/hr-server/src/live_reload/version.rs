//! Build version tracking.
//!
//! Each detected rebuild replaces the current [`VersionToken`] with a fresh
//! random UUID. Clients only ever compare tokens for equality.

use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Opaque identifier of the current build.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Generate a new random token.
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current token plus generation bookkeeping.
struct Snapshot {
    token: VersionToken,
    generated_at: DateTime<Utc>,
}

/// Holds the current build version.
///
/// # Thread Safety
///
/// Single writer (the watcher), many readers (request handlers). Reads take a
/// shared lock for the duration of a clone; `regenerate` swaps the whole
/// snapshot under the exclusive lock.
pub struct VersionState {
    current: RwLock<Snapshot>,
    generation: AtomicU64,
}

impl VersionState {
    /// Create state holding a freshly generated initial token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Snapshot {
                token: VersionToken::generate(),
                generated_at: Utc::now(),
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Latest token.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn current(&self) -> VersionToken {
        self.current.read().unwrap().token.clone()
    }

    /// Replace the token with a new one and return it.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    pub fn regenerate(&self) -> VersionToken {
        let token = VersionToken::generate();
        {
            let mut current = self.current.write().unwrap();
            *current = Snapshot {
                token: token.clone(),
                generated_at: Utc::now(),
            };
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        token
    }

    /// Number of regenerations since startup.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// When the current token was generated.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.current.read().unwrap().generated_at
    }
}

impl Default for VersionState {
    fn default() -> Self {
        Self::new()
    }
}
