use sqlx::PgPool;
use tracing::info;

/// Statements run in order; every one is idempotent.
const SCHEMA: &[&str] = &[
    // Balance rows owned by the user subsystem; only `quota` is touched here.
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        quota BIGINT NOT NULL DEFAULT 0
    )
    "#,
    // Codes. Soft delete: deleted_at = when deleted, NULL = live.
    r#"
    CREATE TABLE IF NOT EXISTS redemptions (
        id BIGSERIAL PRIMARY KEY,
        "key" VARCHAR(32) NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        type INTEGER NOT NULL DEFAULT 1,
        status INTEGER NOT NULL DEFAULT 1,
        quota BIGINT NOT NULL DEFAULT 100,
        created_time BIGINT NOT NULL DEFAULT 0,
        redeemed_time BIGINT NOT NULL DEFAULT 0,
        expired_time BIGINT NOT NULL DEFAULT 0,
        used_user_id BIGINT NOT NULL DEFAULT 0,
        max_uses INTEGER NOT NULL DEFAULT 1,
        max_uses_per_user INTEGER NOT NULL DEFAULT 1,
        used_count INTEGER NOT NULL DEFAULT 0,
        used_user_count INTEGER NOT NULL DEFAULT 0,
        deleted_at TIMESTAMPTZ
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS uq_redemptions_key ON redemptions ("key") WHERE deleted_at IS NULL"#,
    r#"CREATE INDEX IF NOT EXISTS idx_redemptions_name ON redemptions (name) WHERE deleted_at IS NULL"#,
    // Per-(user, code) successful redemption counter, bumped in the redeem transaction.
    r#"
    CREATE TABLE IF NOT EXISTS redemption_usages (
        user_id BIGINT NOT NULL,
        redemption_id BIGINT NOT NULL,
        uses BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, redemption_id)
    )
    "#,
    // Append-only audit facts.
    r#"
    CREATE TABLE IF NOT EXISTS redemption_facts (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        redemption_id BIGINT NOT NULL,
        kind TEXT NOT NULL,
        quota BIGINT NOT NULL,
        content TEXT NOT NULL,
        created_at BIGINT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_redemption_facts_user ON redemption_facts (user_id, id DESC)"#,
];

/// Creates the tables this service needs if they are missing
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!("✅ Redemption schema ready");
    Ok(())
}
