//! Process-wide named exclusive locks.
//!
//! Two [`Instrument`](crate::Instrument) handles created independently for
//! the same device share nothing but the device itself. Holding the lock
//! named by `Options::lock_name` around a whole retry-wrapped command keeps
//! their read loops from interleaving. Locks are FIFO-fair tokio mutexes
//! looked up by name in a global registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type Registry = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn lock_named(name: &str) -> Arc<Mutex<()>> {
    let registry = REGISTRY.get_or_init(Registry::default);
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(name.to_string()).or_default())
}

/// Held named lock. Released on drop.
#[derive(Debug)]
pub struct ExclusiveLock {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl ExclusiveLock {
    /// Wait for the lock called `name`.
    ///
    /// # Examples
    ///
    /// ```
    /// use countlink_serial::ExclusiveLock;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let lock = ExclusiveLock::acquire("doc-counter").await;
    ///     assert_eq!(lock.name(), "doc-counter");
    /// }
    /// ```
    pub async fn acquire(name: &str) -> Self {
        let guard = lock_named(name).lock_owned().await;
        trace!(lock = name, "Exclusive lock acquired");
        Self {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }
}
