//! In-memory user directory.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use helpdesk_core::directory::UserDirectory;
use helpdesk_core::store::StoreFuture;
use helpdesk_core::{User, UserId};

/// In-memory [`UserDirectory`] that counts its lookups.
#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<BTreeMap<UserId, User>>>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory holding `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    /// Add or replace a user.
    pub fn insert(&self, user: User) {
        self.users.write().unwrap().insert(user.id, user);
    }

    /// Remove a user.
    pub fn remove(&self, id: UserId) {
        self.users.write().unwrap().remove(&id);
    }

    /// Number of `find_user` calls served.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.read().unwrap().get(&id).cloned())
        })
    }

    fn list_users(&self) -> StoreFuture<'_, Vec<User>> {
        Box::pin(async move { Ok(self.users.read().unwrap().values().cloned().collect()) })
    }
}
