//! User lookups.
//!
//! Users are registered outside this system; the pipeline only reads them to
//! check who may create tickets and for whom. Lookups may be served from a
//! cache, so nothing that decides a ticket's state goes through here.

use crate::store::StoreFuture;
use crate::types::{User, UserId};

/// Read access to registered users.
pub trait UserDirectory: Send + Sync {
    /// Find a user by id. A missing user is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the lookup fails.
    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>>;

    /// Every registered user, by id.
    ///
    /// # Errors
    ///
    /// `DatabaseError` if the query fails.
    fn list_users(&self) -> StoreFuture<'_, Vec<User>>;
}
