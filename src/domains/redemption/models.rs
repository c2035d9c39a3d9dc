//! Modelos del sistema de códigos de canje de cuota

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::error::RedeemError;

// ======================================================================
// CLASIFICACIÓN Y ESTADO
// ======================================================================

/// Kind tag as stored in the `redemptions.type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Single,
    Gift,
}

impl CodeKind {
    pub fn as_i32(self) -> i32 {
        match self {
            CodeKind::Single => 1,
            CodeKind::Gift => 2,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self, RedeemError> {
        match value {
            1 => Ok(CodeKind::Single),
            2 => Ok(CodeKind::Gift),
            other => Err(RedeemError::UnknownType(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodeKind::Single => "single",
            CodeKind::Gift => "gift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Enabled,
    Disabled,
    Used,
}

impl CodeStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            CodeStatus::Enabled => 1,
            CodeStatus::Disabled => 2,
            CodeStatus::Used => 3,
        }
    }

    /// Unknown stored values are treated as disabled so they can never be redeemed.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => CodeStatus::Enabled,
            3 => CodeStatus::Used,
            _ => CodeStatus::Disabled,
        }
    }
}

// ======================================================================
// CÓDIGOS
// ======================================================================

/// Fields every code carries regardless of kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeHeader {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub status: CodeStatus,
    pub quota: i64,
    pub created_at: i64,
    /// Last successful redemption, 0 if never redeemed.
    pub redeemed_at: i64,
    /// 0 means the code never expires.
    pub expires_at: i64,
}

impl CodeHeader {
    /// A code whose `expires_at` equals `now` is already expired.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleCode {
    #[serde(flatten)]
    pub header: CodeHeader,
    pub used_user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftCode {
    #[serde(flatten)]
    pub header: CodeHeader,
    /// Cap on distinct users, 0 = unlimited.
    pub max_uses: i32,
    /// Cap on redemptions by one user, 0 = unlimited.
    pub max_uses_per_user: i32,
    pub used_count: i32,
    pub used_user_count: i32,
}

impl GiftCode {
    fn user_cap_reached(&self) -> bool {
        self.max_uses > 0 && self.used_user_count >= self.max_uses
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RedemptionCode {
    Single(SingleCode),
    Gift(GiftCode),
}

/// Result of applying one successful use to a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub credited: i64,
    pub first_time_user: bool,
}

impl RedemptionCode {
    pub fn header(&self) -> &CodeHeader {
        match self {
            RedemptionCode::Single(code) => &code.header,
            RedemptionCode::Gift(code) => &code.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut CodeHeader {
        match self {
            RedemptionCode::Single(code) => &mut code.header,
            RedemptionCode::Gift(code) => &mut code.header,
        }
    }

    pub fn id(&self) -> i64 {
        self.header().id
    }

    pub fn key(&self) -> &str {
        &self.header().key
    }

    pub fn kind(&self) -> CodeKind {
        match self {
            RedemptionCode::Single(_) => CodeKind::Single,
            RedemptionCode::Gift(_) => CodeKind::Gift,
        }
    }

    pub fn status(&self) -> CodeStatus {
        self.header().status
    }

    pub fn quota(&self) -> i64 {
        self.header().quota
    }

    /// Gate evaluated right after the row lock is taken: kind-specific status
    /// checks first, expiry second.
    pub fn check_admissible(&self, now: i64) -> Result<(), RedeemError> {
        match self {
            RedemptionCode::Single(code) => {
                if code.header.status != CodeStatus::Enabled {
                    return Err(RedeemError::AlreadyUsed);
                }
            }
            RedemptionCode::Gift(code) => {
                if code.header.status == CodeStatus::Disabled {
                    return Err(RedeemError::Disabled);
                }
                if code.user_cap_reached() {
                    return Err(RedeemError::MaxUsersReached);
                }
            }
        }

        if self.header().is_expired(now) {
            return Err(RedeemError::Expired);
        }

        Ok(())
    }

    /// Applies one use by `user_id`. `prior_uses` is how many times this user
    /// already redeemed this code and is ignored for single codes.
    ///
    /// On error the record is left untouched.
    pub fn consume(
        &mut self,
        user_id: i64,
        prior_uses: i64,
        now: i64,
    ) -> Result<Consumption, RedeemError> {
        match self {
            RedemptionCode::Single(code) => {
                code.header.redeemed_at = now;
                code.header.status = CodeStatus::Used;
                code.used_user_id = user_id;
                Ok(Consumption {
                    credited: code.header.quota,
                    first_time_user: true,
                })
            }
            RedemptionCode::Gift(code) => {
                if code.max_uses_per_user > 0 && prior_uses >= i64::from(code.max_uses_per_user) {
                    return Err(RedeemError::PerUserLimitReached);
                }

                let first_time_user = prior_uses == 0;

                // Only newcomers are blocked by the user cap; returning users
                // keep their per-user allowance.
                if first_time_user && code.user_cap_reached() {
                    return Err(RedeemError::MaxUsersReached);
                }

                code.used_count += 1;
                code.header.redeemed_at = now;
                if first_time_user {
                    code.used_user_count += 1;
                }

                code.header.status = if code.user_cap_reached() {
                    CodeStatus::Used
                } else {
                    CodeStatus::Enabled
                };

                Ok(Consumption {
                    credited: code.header.quota,
                    first_time_user,
                })
            }
        }
    }

    /// Used or disabled codes, and enabled codes past their expiry.
    pub fn is_invalid(&self, now: i64) -> bool {
        match self.status() {
            CodeStatus::Used | CodeStatus::Disabled => true,
            CodeStatus::Enabled => self.header().is_expired(now),
        }
    }
}

// ======================================================================
// PERSISTENCIA
// ======================================================================

/// Flat row of the `redemptions` table.
#[derive(Debug, Clone, FromRow)]
pub struct RedemptionRow {
    pub id: i64,
    pub key: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: i32,
    pub status: i32,
    pub quota: i64,
    pub created_time: i64,
    pub redeemed_time: i64,
    pub expired_time: i64,
    pub used_user_id: i64,
    pub max_uses: i32,
    pub max_uses_per_user: i32,
    pub used_count: i32,
    pub used_user_count: i32,
}

impl TryFrom<RedemptionRow> for RedemptionCode {
    type Error = RedeemError;

    fn try_from(row: RedemptionRow) -> Result<Self, Self::Error> {
        let kind = CodeKind::from_i32(row.kind)?;
        let header = CodeHeader {
            id: row.id,
            key: row.key,
            name: row.name,
            status: CodeStatus::from_i32(row.status),
            quota: row.quota,
            created_at: row.created_time,
            redeemed_at: row.redeemed_time,
            expires_at: row.expired_time,
        };

        Ok(match kind {
            CodeKind::Single => RedemptionCode::Single(SingleCode {
                header,
                used_user_id: row.used_user_id,
            }),
            CodeKind::Gift => RedemptionCode::Gift(GiftCode {
                header,
                max_uses: row.max_uses,
                max_uses_per_user: row.max_uses_per_user,
                used_count: row.used_count,
                used_user_count: row.used_user_count,
            }),
        })
    }
}

impl From<&RedemptionCode> for RedemptionRow {
    fn from(code: &RedemptionCode) -> Self {
        let header = code.header();
        let mut row = RedemptionRow {
            id: header.id,
            key: header.key.clone(),
            name: header.name.clone(),
            kind: code.kind().as_i32(),
            status: header.status.as_i32(),
            quota: header.quota,
            created_time: header.created_at,
            redeemed_time: header.redeemed_at,
            expired_time: header.expires_at,
            used_user_id: 0,
            max_uses: 0,
            max_uses_per_user: 0,
            used_count: 0,
            used_user_count: 0,
        };

        match code {
            RedemptionCode::Single(single) => row.used_user_id = single.used_user_id,
            RedemptionCode::Gift(gift) => {
                row.max_uses = gift.max_uses;
                row.max_uses_per_user = gift.max_uses_per_user;
                row.used_count = gift.used_count;
                row.used_user_count = gift.used_user_count;
            }
        }

        row
    }
}

// ======================================================================
// AUDITORÍA
// ======================================================================

/// Immutable record of one successful redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFact {
    pub user_id: i64,
    pub code_id: i64,
    pub kind: FactKind,
    pub quota: i64,
    pub created_at: i64,
}

/// Kind column of `redemption_facts`, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Single,
    Gift,
}

impl From<CodeKind> for FactKind {
    fn from(kind: CodeKind) -> Self {
        match kind {
            CodeKind::Single => FactKind::Single,
            CodeKind::Gift => FactKind::Gift,
        }
    }
}

impl TryFrom<String> for FactKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "single" => Ok(FactKind::Single),
            "gift" => Ok(FactKind::Gift),
            other => Err(format!("unknown fact kind: {}", other)),
        }
    }
}

impl FactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FactKind::Single => "single",
            FactKind::Gift => "gift",
        }
    }
}

impl UsageFact {
    pub fn new(user_id: i64, code: &RedemptionCode, quota: i64, created_at: i64) -> Self {
        Self {
            user_id,
            code_id: code.id(),
            kind: code.kind().into(),
            quota,
            created_at,
        }
    }

    /// Human readable log line.
    pub fn describe(&self) -> String {
        let label = match self.kind {
            FactKind::Single => "redemption code",
            FactKind::Gift => "gift code",
        };
        format!("Topped up {} quota via {} #{}", self.quota, label, self.code_id)
    }
}

// ======================================================================
// ADMINISTRACIÓN
// ======================================================================

/// Input for inserting a code. The key is supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRedemptionCode {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub kind: CodeKind,
    pub quota: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default = "default_max_uses")]
    pub max_uses: i32,
    #[serde(default = "default_max_uses")]
    pub max_uses_per_user: i32,
}

fn default_max_uses() -> i32 {
    1
}

impl NewRedemptionCode {
    /// Materializes the record with a store-assigned id.
    pub fn into_code(self, id: i64, created_at: i64) -> RedemptionCode {
        let header = CodeHeader {
            id,
            key: self.key,
            name: self.name,
            status: CodeStatus::Enabled,
            quota: self.quota,
            created_at,
            redeemed_at: 0,
            expires_at: self.expires_at,
        };
        match self.kind {
            CodeKind::Single => RedemptionCode::Single(SingleCode {
                header,
                used_user_id: 0,
            }),
            CodeKind::Gift => RedemptionCode::Gift(GiftCode {
                header,
                max_uses: self.max_uses,
                max_uses_per_user: self.max_uses_per_user,
                used_count: 0,
                used_user_count: 0,
            }),
        }
    }
}

/// Administrative edit. Usage counters are never editable and a used code
/// keeps its status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodePatch {
    pub name: Option<String>,
    pub status: Option<CodeStatus>,
    pub quota: Option<i64>,
    pub expires_at: Option<i64>,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
}

impl CodePatch {
    pub fn apply(&self, code: &mut RedemptionCode) {
        let was_used = code.status() == CodeStatus::Used;
        let header = code.header_mut();
        if let Some(name) = &self.name {
            header.name = name.clone();
        }
        if let Some(status) = self.status {
            if !was_used {
                header.status = status;
            }
        }
        if let Some(quota) = self.quota {
            header.quota = quota;
        }
        if let Some(expires_at) = self.expires_at {
            header.expires_at = expires_at;
        }
        if let RedemptionCode::Gift(gift) = code {
            if let Some(max_uses) = self.max_uses {
                gift.max_uses = max_uses;
            }
            if let Some(max_uses_per_user) = self.max_uses_per_user {
                gift.max_uses_per_user = max_uses_per_user;
            }
            // A new user cap closes or reopens the code against the users
            // already counted.
            if self.max_uses.is_some() {
                if gift.user_cap_reached() {
                    gift.header.status = CodeStatus::Used;
                } else if gift.header.status == CodeStatus::Used {
                    gift.header.status = CodeStatus::Enabled;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

pub const MAX_PAGE_SIZE: i64 = 100;

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeGroup {
    pub name: String,
    pub count: usize,
    pub codes: Vec<RedemptionCode>,
}
