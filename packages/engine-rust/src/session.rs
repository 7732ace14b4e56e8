//! Session-scoped object store with ownership transfer on overwrite.
//!
//! A [`Session`] holds long-lived objects (connections, drivers, handles)
//! across invocations. Storing a value under an existing key hands ownership
//! of the slot to the new value and closes the previous one if it was stored
//! as [`Closeable`]. Closing the session closes every remaining closeable
//! exactly once; one failing close never stops the others.
//!
//! All operations take an internal mutex: a worker that outlived its timeout
//! may still call [`Session::put`] while the owner calls [`Session::close`].

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

/// Type-erased session object.
pub type SessionObject = Arc<dyn Any + Send + Sync>;

/// Capability of session objects that hold resources.
pub trait Closeable: Send + Sync {
    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Close failures are logged by the session and otherwise ignored.
    fn close(&self) -> anyhow::Result<()>;
}

/// Errors raised by session access.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session is available in this execution context")]
    Unavailable,
    #[error("session object '{key}' is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

struct Entry {
    object: SessionObject,
    closer: Option<Arc<dyn Closeable>>,
}

enum Scope {
    Active(Mutex<HashMap<String, Entry>>),
    Unusable,
}

/// Keyed store of long-lived objects scoped to a logical session.
pub struct Session {
    scope: Scope,
}

impl Session {
    /// Creates an empty, usable session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scope: Scope::Active(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a session that rejects every `get`/`put` with
    /// [`SessionError::Unavailable`]. Used when no session scope is wired.
    #[must_use]
    pub fn unusable() -> Self {
        Self {
            scope: Scope::Unusable,
        }
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self.scope, Scope::Active(_))
    }

    fn entries(&self) -> Result<&Mutex<HashMap<String, Entry>>, SessionError> {
        match &self.scope {
            Scope::Active(entries) => Ok(entries),
            Scope::Unusable => Err(SessionError::Unavailable),
        }
    }

    /// Returns the object stored under `key` without type checking.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn get_raw(&self, key: &str) -> Result<Option<SessionObject>, SessionError> {
        Ok(self
            .entries()?
            .lock()
            .get(key)
            .map(|entry| Arc::clone(&entry.object)))
    }

    /// Returns the object stored under `key`, downcast to `T`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session,
    /// [`SessionError::TypeMismatch`] if the stored object is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<T>>, SessionError> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(object) => object
                .downcast::<T>()
                .map(Some)
                .map_err(|_| SessionError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Stores `value` under `key` and returns the previous object, which has
    /// already been closed if it was stored as closeable.
    ///
    /// The session never closes a value stored through `put`, even when its
    /// type implements [`Closeable`]: it is neither closed on overwrite nor
    /// by [`Session::close`]. Store resources with [`Session::put_closeable`].
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn put<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<SessionObject>, SessionError> {
        self.put_entry(
            key.into(),
            Entry {
                object: Arc::new(value),
                closer: None,
            },
        )
    }

    /// Like [`Session::put`], but the value is closed when it is replaced or
    /// when the session closes.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn put_closeable<T: Closeable + Any>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<SessionObject>, SessionError> {
        let value = Arc::new(value);
        let closer: Arc<dyn Closeable> = value.clone();
        self.put_entry(
            key.into(),
            Entry {
                object: value,
                closer: Some(closer),
            },
        )
    }

    /// Stores `value` keyed by its type name.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn put_typed<T: Any + Send + Sync>(&self, value: T) -> Result<Option<SessionObject>, SessionError> {
        self.put(type_name::<T>(), value)
    }

    /// Retrieves the object stored by [`Session::put_typed`] for `T`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn get_typed<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>, SessionError> {
        self.get(type_name::<T>())
    }

    /// Returns the object under `key`, inserting `init()` first if absent.
    /// Check and insert happen under one lock.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session,
    /// [`SessionError::TypeMismatch`] if an existing object is not a `T`.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Result<Arc<T>, SessionError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries()?.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            object: Arc::new(init()),
            closer: None,
        });
        Arc::clone(&entry.object)
            .downcast::<T>()
            .map_err(|_| SessionError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// # Errors
    ///
    /// [`SessionError::Unavailable`] on an unusable session.
    pub fn contains(&self, key: &str) -> Result<bool, SessionError> {
        Ok(self.entries()?.lock().contains_key(key))
    }

    /// Number of stored objects; always 0 for an unusable session.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().map_or(0, |entries| entries.lock().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put_entry(&self, key: String, entry: Entry) -> Result<Option<SessionObject>, SessionError> {
        // The lock is released before closing so a close implementation may
        // touch the session without deadlocking.
        let previous = self.entries()?.lock().insert(key.clone(), entry);
        Ok(previous.map(|previous| {
            if previous.closer.is_some() {
                debug!(key = %key, "replacing session object, closing previous value");
            }
            close_entry(&key, &previous);
            previous.object
        }))
    }

    /// Closes every remaining closeable object, then empties the store.
    /// A no-op on an unusable session.
    pub fn close(&self) {
        let Ok(entries) = self.entries() else {
            return;
        };
        let drained: Vec<(String, Entry)> = entries.lock().drain().collect();
        for (key, entry) in &drained {
            close_entry(key, entry);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("usable", &self.is_usable())
            .field("len", &self.len())
            .finish()
    }
}

fn close_entry(key: &str, entry: &Entry) {
    if let Some(closer) = &entry.closer {
        if let Err(e) = closer.close() {
            error!(key = %key, error = %e, "error while closing session object");
        }
    }
}
