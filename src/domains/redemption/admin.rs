//! Administrative operations over redemption codes.
//!
//! Every single-code mutation goes through [`CodeAdminStore::update_code`] or
//! the store's delete paths, which take the same row lock as a redemption.

use std::sync::Arc;

use super::error::RedeemError;
use super::models::{
    CodeGroup, CodeKind, CodePatch, CodeStatus, NewRedemptionCode, Page, PageRequest,
    RedemptionCode,
};
use super::store::{Clock, CodeAdminStore, SystemClock};
use crate::observability::metrics::record_admin_operation;

/// Keys are fixed-width tokens handed out to end users.
pub const KEY_LENGTH: usize = 32;
pub const MAX_NAME_LENGTH: usize = 20;

pub struct CodeAdminService {
    store: Arc<dyn CodeAdminStore>,
    clock: Arc<dyn Clock>,
}

impl CodeAdminService {
    pub fn new(store: Arc<dyn CodeAdminStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn list(&self, page: PageRequest) -> Result<Page<RedemptionCode>, RedeemError> {
        Ok(self.store.list_codes(page).await?)
    }

    pub async fn search(
        &self,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Page<RedemptionCode>, RedeemError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return self.list(page).await;
        }
        Ok(self.store.search_codes(keyword, page).await?)
    }

    pub async fn grouped_by_name(&self, page: PageRequest) -> Result<Page<CodeGroup>, RedeemError> {
        Ok(self.store.codes_grouped_by_name(page).await?)
    }

    pub async fn get(&self, id: i64) -> Result<RedemptionCode, RedeemError> {
        self.store.get_code(id).await?.ok_or(RedeemError::NotFound)
    }

    pub async fn create(&self, new_code: NewRedemptionCode) -> Result<RedemptionCode, RedeemError> {
        validate_new_code(&new_code)?;

        let result = self
            .store
            .insert_code(new_code, self.clock.now())
            .await
            .map_err(RedeemError::from);
        record_admin_operation("create", result.is_ok());

        let code = result?;
        tracing::info!(code_id = code.id(), kind = code.kind().as_str(), "Redemption code created");
        Ok(code)
    }

    pub async fn update(&self, id: i64, patch: CodePatch) -> Result<RedemptionCode, RedeemError> {
        validate_patch(&patch)?;
        self.edit("update", id, Box::new(move |code: &mut RedemptionCode| patch.apply(code)))
            .await
    }

    /// Enables or disables a code. Used codes keep their status.
    pub async fn set_status(&self, id: i64, enabled: bool) -> Result<RedemptionCode, RedeemError> {
        let target = if enabled {
            CodeStatus::Enabled
        } else {
            CodeStatus::Disabled
        };
        let operation = if enabled { "enable" } else { "disable" };

        self.edit(
            operation,
            id,
            Box::new(move |code: &mut RedemptionCode| {
                if code.status() != CodeStatus::Used {
                    code.header_mut().status = target;
                }
            }),
        )
        .await
    }

    async fn edit(
        &self,
        operation: &str,
        id: i64,
        edit: Box<dyn for<'a> FnOnce(&'a mut RedemptionCode) + Send>,
    ) -> Result<RedemptionCode, RedeemError> {
        let result = match self.store.update_code(id, edit).await {
            Ok(Some(code)) => Ok(code),
            Ok(None) => Err(RedeemError::NotFound),
            Err(e) => Err(RedeemError::from(e)),
        };
        record_admin_operation(operation, result.is_ok());

        let code = result?;
        tracing::info!(code_id = id, operation, status = ?code.status(), "Redemption code edited");
        Ok(code)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RedeemError> {
        let result = self.store.delete_code(id).await;
        record_admin_operation("delete", result.is_ok());

        if !result? {
            return Err(RedeemError::NotFound);
        }
        tracing::info!(code_id = id, "Redemption code deleted");
        Ok(())
    }

    pub async fn delete_by_name(&self, name: &str) -> Result<u64, RedeemError> {
        if name.trim().is_empty() {
            return Err(RedeemError::InvalidInput("name must not be empty".to_string()));
        }

        let result = self.store.delete_codes_by_name(name).await;
        record_admin_operation("delete_by_name", result.is_ok());

        let deleted = result?;
        tracing::info!(code_name = name, deleted, "Redemption codes deleted by name");
        Ok(deleted)
    }

    /// Removes used, disabled and expired codes.
    pub async fn delete_invalid(&self) -> Result<u64, RedeemError> {
        let result = self.store.delete_invalid_codes(self.clock.now()).await;
        record_admin_operation("delete_invalid", result.is_ok());

        let deleted = result?;
        tracing::info!(deleted, "Invalid redemption codes deleted");
        Ok(deleted)
    }
}

fn validate_new_code(new_code: &NewRedemptionCode) -> Result<(), RedeemError> {
    if new_code.key.chars().count() != KEY_LENGTH {
        return Err(RedeemError::InvalidInput(format!(
            "key must be exactly {} characters",
            KEY_LENGTH
        )));
    }
    if new_code.key.trim() != new_code.key {
        return Err(RedeemError::InvalidInput("key must not contain surrounding whitespace".to_string()));
    }
    validate_name(&new_code.name)?;
    validate_quota(new_code.quota)?;
    validate_expiry(new_code.expires_at)?;
    if new_code.kind == CodeKind::Gift {
        validate_caps(Some(new_code.max_uses), Some(new_code.max_uses_per_user))?;
    }
    Ok(())
}

fn validate_patch(patch: &CodePatch) -> Result<(), RedeemError> {
    if let Some(name) = &patch.name {
        validate_name(name)?;
    }
    if let Some(quota) = patch.quota {
        validate_quota(quota)?;
    }
    if let Some(expires_at) = patch.expires_at {
        validate_expiry(expires_at)?;
    }
    if patch.status == Some(CodeStatus::Used) {
        return Err(RedeemError::InvalidInput("status can only be set to enabled or disabled".to_string()));
    }
    validate_caps(patch.max_uses, patch.max_uses_per_user)
}

fn validate_name(name: &str) -> Result<(), RedeemError> {
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(RedeemError::InvalidInput(format!(
            "name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn validate_quota(quota: i64) -> Result<(), RedeemError> {
    if quota <= 0 {
        return Err(RedeemError::InvalidInput("quota must be positive".to_string()));
    }
    Ok(())
}

fn validate_expiry(expires_at: i64) -> Result<(), RedeemError> {
    if expires_at < 0 {
        return Err(RedeemError::InvalidInput("expires_at must be 0 or a unix timestamp".to_string()));
    }
    Ok(())
}

fn validate_caps(max_uses: Option<i32>, max_uses_per_user: Option<i32>) -> Result<(), RedeemError> {
    if max_uses.is_some_and(|v| v < 0) || max_uses_per_user.is_some_and(|v| v < 0) {
        return Err(RedeemError::InvalidInput("usage caps must be 0 (unlimited) or positive".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_code(key: &str) -> NewRedemptionCode {
        NewRedemptionCode {
            key: key.to_string(),
            name: "promo".to_string(),
            kind: CodeKind::Gift,
            quota: 10,
            expires_at: 0,
            max_uses: 5,
            max_uses_per_user: 1,
        }
    }

    #[test]
    fn key_must_be_full_width() {
        assert!(validate_new_code(&new_code(&"a".repeat(KEY_LENGTH))).is_ok());
        assert!(matches!(
            validate_new_code(&new_code("short")),
            Err(RedeemError::InvalidInput(_))
        ));
    }

    #[test]
    fn negative_caps_are_rejected() {
        let mut code = new_code(&"b".repeat(KEY_LENGTH));
        code.max_uses = -1;
        assert!(validate_new_code(&code).is_err());
    }

    #[test]
    fn patch_cannot_mark_used() {
        let patch = CodePatch {
            status: Some(CodeStatus::Used),
            ..Default::default()
        };
        assert!(validate_patch(&patch).is_err());
    }
}
