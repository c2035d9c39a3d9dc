//! Storage seams of the redemption engine.
//!
//! The engine never talks to a database directly. It opens a transaction,
//! locks one code row, reads the per-user usage counter, credits the balance,
//! bumps the counter and writes the row back, then commits. Audit facts go to
//! a separate [`FactLog`] after commit.

use async_trait::async_trait;

use super::error::{RedeemError, StoreError};
use super::models::{
    CodeGroup, NewRedemptionCode, Page, PageRequest, RedemptionCode, RedemptionRow, UsageFact,
};

#[async_trait]
pub trait RedemptionStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RedemptionTx>, StoreError>;
}

/// One redemption transaction.
///
/// Dropping it without calling [`RedemptionTx::commit`] rolls back every staged
/// write and releases the code lock.
#[async_trait]
pub trait RedemptionTx: Send {
    /// Takes the exclusive lock on the code row with this key and returns it.
    /// Blocks while another transaction holds the same code.
    async fn lock_code(&mut self, key: &str) -> Result<Option<RedemptionCode>, StoreError>;

    /// Prior successful redemptions of `code_id` by `user_id`, as seen inside
    /// this transaction.
    async fn count_uses(&mut self, user_id: i64, code_id: i64) -> Result<i64, StoreError>;

    /// Bumps the per-(user, code) usage counter by one.
    async fn record_use(&mut self, user_id: i64, code_id: i64) -> Result<(), StoreError>;

    async fn credit_quota(&mut self, user_id: i64, amount: i64) -> Result<(), StoreError>;

    /// Writes back every column of the code row.
    async fn save_code(&mut self, code: &RedemptionCode) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Append-only audit log of successful redemptions.
#[async_trait]
pub trait FactLog: Send + Sync {
    async fn append_fact(&self, fact: &UsageFact) -> Result<(), StoreError>;

    /// Most recent facts first.
    async fn facts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<UsageFact>, StoreError>;
}

/// Administrative surface over code rows. Single-row mutations take the same
/// row lock as redemptions.
#[async_trait]
pub trait CodeAdminStore: Send + Sync {
    async fn list_codes(&self, page: PageRequest) -> Result<Page<RedemptionCode>, StoreError>;

    async fn search_codes(
        &self,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Page<RedemptionCode>, StoreError>;

    async fn codes_grouped_by_name(&self, page: PageRequest) -> Result<Page<CodeGroup>, StoreError>;

    async fn get_code(&self, id: i64) -> Result<Option<RedemptionCode>, StoreError>;

    async fn insert_code(
        &self,
        new_code: NewRedemptionCode,
        now: i64,
    ) -> Result<RedemptionCode, StoreError>;

    /// Locks the row, hands it to `edit`, and writes the result back.
    /// Returns `None` when no such code exists.
    async fn update_code(
        &self,
        id: i64,
        edit: Box<dyn for<'a> FnOnce(&'a mut RedemptionCode) + Send>,
    ) -> Result<Option<RedemptionCode>, StoreError>;

    async fn delete_code(&self, id: i64) -> Result<bool, StoreError>;

    async fn delete_codes_by_name(&self, name: &str) -> Result<u64, StoreError>;

    async fn delete_invalid_codes(&self, now: i64) -> Result<u64, StoreError>;
}

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Converts a stored row, keeping an unknown kind distinguishable.
pub(crate) fn row_to_code(row: RedemptionRow) -> Result<RedemptionCode, StoreError> {
    RedemptionCode::try_from(row).map_err(|err| match err {
        RedeemError::UnknownType(kind) => StoreError::UnknownType(kind),
        other => StoreError::Corrupt(other.to_string()),
    })
}
