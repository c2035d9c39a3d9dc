//! PostgreSQL implementation of the redemption storage seams.
//!
//! The per-code lock is `SELECT ... FOR UPDATE` on the code row, held until the
//! transaction commits or rolls back. Balance credit and usage counter live in
//! the same transaction.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::error::StoreError;
use super::models::{
    CodeGroup, CodeStatus, FactKind, NewRedemptionCode, Page, PageRequest, RedemptionCode, RedemptionRow,
    UsageFact,
};
use super::store::{row_to_code, CodeAdminStore, FactLog, RedemptionStore, RedemptionTx};

const CODE_COLUMNS: &str = r#"id, "key", name, type, status, quota, created_time, redeemed_time,
    expired_time, used_user_id, max_uses, max_uses_per_user, used_count, used_user_count"#;

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgRedemptionStore {
    db: PgPool,
}

impl PgRedemptionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

fn rows_to_codes(rows: Vec<RedemptionRow>) -> Result<Vec<RedemptionCode>, StoreError> {
    rows.into_iter().map(row_to_code).collect()
}

/// Full-column write of a code row.
async fn write_code(conn: &mut PgConnection, code: &RedemptionCode) -> Result<(), StoreError> {
    let row = RedemptionRow::from(code);
    sqlx::query(
        r#"
        UPDATE redemptions
        SET "key" = $2,
            name = $3,
            type = $4,
            status = $5,
            quota = $6,
            created_time = $7,
            redeemed_time = $8,
            expired_time = $9,
            used_user_id = $10,
            max_uses = $11,
            max_uses_per_user = $12,
            used_count = $13,
            used_user_count = $14
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(&row.key)
    .bind(&row.name)
    .bind(row.kind)
    .bind(row.status)
    .bind(row.quota)
    .bind(row.created_time)
    .bind(row.redeemed_time)
    .bind(row.expired_time)
    .bind(row.used_user_id)
    .bind(row.max_uses)
    .bind(row.max_uses_per_user)
    .bind(row.used_count)
    .bind(row.used_user_count)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// `LIKE` prefix pattern with wildcards in the keyword taken literally.
fn prefix_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}%", escaped)
}

#[async_trait]
impl RedemptionStore for PgRedemptionStore {
    async fn begin(&self) -> Result<Box<dyn RedemptionTx>, StoreError> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgRedemptionTx { tx }))
    }
}

struct PgRedemptionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RedemptionTx for PgRedemptionTx {
    async fn lock_code(&mut self, key: &str) -> Result<Option<RedemptionCode>, StoreError> {
        let sql = format!(
            r#"SELECT {} FROM redemptions WHERE "key" = $1 AND deleted_at IS NULL FOR UPDATE"#,
            CODE_COLUMNS
        );
        let row = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_code).transpose()
    }

    async fn count_uses(&mut self, user_id: i64, code_id: i64) -> Result<i64, StoreError> {
        let uses: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT uses
            FROM redemption_usages
            WHERE user_id = $1 AND redemption_id = $2
            "#,
        )
        .bind(user_id)
        .bind(code_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(uses.unwrap_or(0))
    }

    async fn record_use(&mut self, user_id: i64, code_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO redemption_usages (user_id, redemption_id, uses)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, redemption_id)
            DO UPDATE SET uses = redemption_usages.uses + 1
            "#,
        )
        .bind(user_id)
        .bind(code_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn credit_quota(&mut self, user_id: i64, amount: i64) -> Result<(), StoreError> {
        let result = sqlx::query(r#"UPDATE users SET quota = quota + $1 WHERE id = $2"#)
            .bind(amount)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn save_code(&mut self, code: &RedemptionCode) -> Result<(), StoreError> {
        write_code(&mut self.tx, code).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FactRow {
    user_id: i64,
    code_id: i64,
    kind: String,
    quota: i64,
    created_at: i64,
}

#[async_trait]
impl FactLog for PgRedemptionStore {
    async fn append_fact(&self, fact: &UsageFact) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO redemption_facts (user_id, redemption_id, kind, quota, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(fact.user_id)
        .bind(fact.code_id)
        .bind(fact.kind.as_str())
        .bind(fact.quota)
        .bind(fact.describe())
        .bind(fact.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn facts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<UsageFact>, StoreError> {
        let rows = sqlx::query_as::<_, FactRow>(
            r#"
            SELECT user_id, redemption_id AS code_id, kind, quota, created_at
            FROM redemption_facts
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit.max(0))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(UsageFact {
                    user_id: row.user_id,
                    code_id: row.code_id,
                    kind: FactKind::try_from(row.kind).map_err(StoreError::Corrupt)?,
                    quota: row.quota,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CodeAdminStore for PgRedemptionStore {
    async fn list_codes(&self, page: PageRequest) -> Result<Page<RedemptionCode>, StoreError> {
        let mut tx = self.db.begin().await?;

        let total: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM redemptions WHERE deleted_at IS NULL"#)
                .fetch_one(&mut *tx)
                .await?;

        let sql = format!(
            r#"
            SELECT {} FROM redemptions
            WHERE deleted_at IS NULL
            ORDER BY id DESC
            LIMIT $1 OFFSET $2
            "#,
            CODE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Page {
            items: rows_to_codes(rows)?,
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        })
    }

    async fn search_codes(
        &self,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Page<RedemptionCode>, StoreError> {
        // A numeric keyword also matches the id.
        let id = keyword.parse::<i64>().ok();
        let pattern = prefix_pattern(keyword);
        let filter = r#"deleted_at IS NULL AND (($1::BIGINT IS NOT NULL AND id = $1) OR name LIKE $2)"#;

        let mut tx = self.db.begin().await?;

        let count_sql = format!("SELECT COUNT(*) FROM redemptions WHERE {}", filter);
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(id)
            .bind(&pattern)
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT {} FROM redemptions WHERE {} ORDER BY id DESC LIMIT $3 OFFSET $4",
            CODE_COLUMNS, filter
        );
        let rows = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(id)
            .bind(&pattern)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Page {
            items: rows_to_codes(rows)?,
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        })
    }

    async fn codes_grouped_by_name(&self, page: PageRequest) -> Result<Page<CodeGroup>, StoreError> {
        let mut tx = self.db.begin().await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT name)
            FROM redemptions
            WHERE deleted_at IS NULL AND name <> ''
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT name
            FROM redemptions
            WHERE deleted_at IS NULL AND name <> ''
            ORDER BY name ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut *tx)
        .await?;

        let sql = format!(
            r#"SELECT {} FROM redemptions WHERE deleted_at IS NULL AND name = $1 ORDER BY id DESC"#,
            CODE_COLUMNS
        );
        let mut groups = Vec::with_capacity(names.len());
        for name in names {
            let rows = sqlx::query_as::<_, RedemptionRow>(&sql)
                .bind(&name)
                .fetch_all(&mut *tx)
                .await?;
            let codes = rows_to_codes(rows)?;
            groups.push(CodeGroup {
                name,
                count: codes.len(),
                codes,
            });
        }

        tx.commit().await?;

        Ok(Page {
            items: groups,
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        })
    }

    async fn get_code(&self, id: i64) -> Result<Option<RedemptionCode>, StoreError> {
        let sql = format!(
            r#"SELECT {} FROM redemptions WHERE id = $1 AND deleted_at IS NULL"#,
            CODE_COLUMNS
        );
        let row = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(row_to_code).transpose()
    }

    async fn insert_code(
        &self,
        new_code: NewRedemptionCode,
        now: i64,
    ) -> Result<RedemptionCode, StoreError> {
        let mut code = new_code.into_code(0, now);
        let row = RedemptionRow::from(&code);

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO redemptions (
                "key", name, type, status, quota, created_time, redeemed_time,
                expired_time, used_user_id, max_uses, max_uses_per_user, used_count, used_user_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&row.key)
        .bind(&row.name)
        .bind(row.kind)
        .bind(row.status)
        .bind(row.quota)
        .bind(row.created_time)
        .bind(row.redeemed_time)
        .bind(row.expired_time)
        .bind(row.used_user_id)
        .bind(row.max_uses)
        .bind(row.max_uses_per_user)
        .bind(row.used_count)
        .bind(row.used_user_count)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(id) => {
                code.header_mut().id = id;
                Ok(code)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateKey)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_code(
        &self,
        id: i64,
        edit: Box<dyn for<'a> FnOnce(&'a mut RedemptionCode) + Send>,
    ) -> Result<Option<RedemptionCode>, StoreError> {
        let mut tx = self.db.begin().await?;

        let sql = format!(
            r#"SELECT {} FROM redemptions WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"#,
            CODE_COLUMNS
        );
        let Some(row) = sqlx::query_as::<_, RedemptionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut code = row_to_code(row)?;
        edit(&mut code);
        write_code(&mut tx, &code).await?;

        tx.commit().await?;
        Ok(Some(code))
    }

    async fn delete_code(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE redemptions SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL"#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_codes_by_name(&self, name: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"UPDATE redemptions SET deleted_at = NOW() WHERE name = $1 AND deleted_at IS NULL"#,
        )
        .bind(name)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_invalid_codes(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE redemptions
            SET deleted_at = NOW()
            WHERE deleted_at IS NULL
              AND (
                status IN ($1, $2)
                OR (status = $3 AND expired_time <> 0 AND expired_time <= $4)
              )
            "#,
        )
        .bind(CodeStatus::Used.as_i32())
        .bind(CodeStatus::Disabled.as_i32())
        .bind(CodeStatus::Enabled.as_i32())
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}
