use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::RedeemError;
use super::models::{CodeKind, RedemptionCode, UsageFact};
use super::store::{Clock, FactLog, RedemptionStore, RedemptionTx, SystemClock};
use crate::observability::metrics::{
    record_fact_append_failure, record_quota_credited, record_redemption,
};

/// Bounds of the random pause taken before each redemption. `max_ms == 0`
/// disables it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeemDelay {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl RedeemDelay {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms,
        }
    }

    fn pick(&self) -> Option<Duration> {
        if self.max_ms == 0 {
            return None;
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Some(Duration::from_millis(ms))
    }
}

/// Successful redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redeemed {
    pub code_id: i64,
    pub kind: CodeKind,
    pub quota: i64,
    pub redeemed_at: i64,
}

/// Motor de canje: valida, consume y acredita un código bajo su lock de fila
pub struct RedemptionService {
    store: Arc<dyn RedemptionStore>,
    facts: Arc<dyn FactLog>,
    clock: Arc<dyn Clock>,
    delay: RedeemDelay,
}

impl RedemptionService {
    pub fn new(store: Arc<dyn RedemptionStore>, facts: Arc<dyn FactLog>) -> Self {
        Self {
            store,
            facts,
            clock: Arc::new(SystemClock),
            delay: RedeemDelay::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_delay(mut self, delay: RedeemDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Redeems `key` for `user_id` and returns the credited quota.
    pub async fn redeem(&self, key: &str, user_id: i64) -> Result<i64, RedeemError> {
        self.redeem_detailed(key, user_id).await.map(|r| r.quota)
    }

    /// Like [`RedemptionService::redeem`] but also reports which code was used.
    pub async fn redeem_detailed(&self, key: &str, user_id: i64) -> Result<Redeemed, RedeemError> {
        let start_time = Instant::now();
        if key.trim().is_empty() {
            return Err(RedeemError::InvalidInput("redemption key is empty".to_string()));
        }
        if user_id == 0 {
            return Err(RedeemError::InvalidInput("user id is required".to_string()));
        }

        if let Some(pause) = self.delay.pick() {
            tokio::time::sleep(pause).await;
        }

        let mut kind_label = "unknown";
        let result = self.redeem_locked(key, user_id, &mut kind_label).await;
        let elapsed = start_time.elapsed().as_secs_f64();

        match &result {
            Ok(redeemed) => {
                record_redemption(kind_label, "success", elapsed);
                record_quota_credited(kind_label, redeemed.quota);
                tracing::info!(
                    user_id,
                    code_id = redeemed.code_id,
                    kind = kind_label,
                    quota = redeemed.quota,
                    "Redemption code consumed"
                );
                self.append_fact(user_id, redeemed).await;
            }
            Err(err) if err.is_rejection() => {
                record_redemption(kind_label, &err.error_code().to_lowercase(), elapsed);
                tracing::info!(user_id, kind = kind_label, reason = err.error_code(), "Redemption refused");
            }
            Err(err) => {
                record_redemption(kind_label, &err.error_code().to_lowercase(), elapsed);
                tracing::error!(user_id, kind = kind_label, "Redemption failed: {}", err);
            }
        }

        result
    }

    /// Steps under the row lock. Any early return drops the transaction,
    /// which rolls back every staged write.
    async fn redeem_locked(
        &self,
        key: &str,
        user_id: i64,
        kind_label: &mut &'static str,
    ) -> Result<Redeemed, RedeemError> {
        let mut tx = self.store.begin().await?;

        let mut code = tx.lock_code(key).await?.ok_or(RedeemError::NotFound)?;
        *kind_label = code.kind().as_str();

        let now = self.clock.now();
        code.check_admissible(now)?;

        let prior_uses = match &code {
            RedemptionCode::Gift(_) => tx.count_uses(user_id, code.id()).await?,
            RedemptionCode::Single(_) => 0,
        };

        let consumption = code.consume(user_id, prior_uses, now)?;

        apply(&mut *tx, &code, user_id, consumption.credited).await?;
        tx.commit().await?;

        Ok(Redeemed {
            code_id: code.id(),
            kind: code.kind(),
            quota: consumption.credited,
            redeemed_at: now,
        })
    }

    /// Best effort: the credit is already committed.
    async fn append_fact(&self, user_id: i64, redeemed: &Redeemed) {
        let fact = UsageFact {
            user_id,
            code_id: redeemed.code_id,
            kind: redeemed.kind.into(),
            quota: redeemed.quota,
            created_at: redeemed.redeemed_at,
        };

        if let Err(e) = self.facts.append_fact(&fact).await {
            record_fact_append_failure(redeemed.kind.as_str());
            tracing::error!(
                user_id,
                code_id = redeemed.code_id,
                "Failed to append usage fact after committed redemption: {}",
                e
            );
        }
    }

    /// Most recent usage facts of `user_id`.
    pub async fn user_history(&self, user_id: i64, limit: i64) -> Result<Vec<UsageFact>, RedeemError> {
        Ok(self.facts.facts_for_user(user_id, limit.clamp(1, 100)).await?)
    }
}

async fn apply(
    tx: &mut dyn RedemptionTx,
    code: &RedemptionCode,
    user_id: i64,
    credited: i64,
) -> Result<(), RedeemError> {
    tx.credit_quota(user_id, credited).await?;
    tx.record_use(user_id, code.id()).await?;
    tx.save_code(code).await?;
    Ok(())
}
