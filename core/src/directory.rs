//! Member directory owned by the membership system.

use crate::BoxFuture;
use crate::error::Result;
use crate::ids::UserId;

/// Read access to member profile data needed for issuance campaigns.
pub trait MemberDirectory: Send + Sync {
    /// Members whose birthday falls on `month`/`day`.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the directory is unreachable.
    fn birthdays_on(&self, month: u32, day: u32) -> BoxFuture<'_, Result<Vec<UserId>>>;
}
