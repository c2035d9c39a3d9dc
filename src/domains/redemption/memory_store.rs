//! In-process implementation of the redemption storage seams.
//!
//! Used by the test-suite, by `REDEEM_STORE=memory` local runs, and wherever the
//! backing storage has no native row locks. Serialization per code comes from
//! [`KeyedLocks`]; each transaction stages its writes and applies them in one
//! step on commit.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::error::StoreError;
use super::locks::{KeyLease, KeyedLocks};
use super::models::{
    CodeGroup, NewRedemptionCode, Page, PageRequest, RedemptionCode, UsageFact,
};
use super::store::{CodeAdminStore, FactLog, RedemptionStore, RedemptionTx};

#[derive(Debug, Default)]
struct MemoryState {
    last_code_id: i64,
    codes: BTreeMap<i64, RedemptionCode>,
    key_index: HashMap<String, i64>,
    balances: HashMap<i64, i64>,
    usages: HashMap<(i64, i64), i64>,
    facts: Vec<UsageFact>,
}

impl MemoryState {
    fn code_by_key(&self, key: &str) -> Option<&RedemptionCode> {
        self.key_index.get(key).and_then(|id| self.codes.get(id))
    }

    fn remove_code(&mut self, id: i64) -> Option<RedemptionCode> {
        let code = self.codes.remove(&id)?;
        self.key_index.remove(code.key());
        Some(code)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    locks: KeyedLocks,
    failing_fact_appends: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or resets) a user balance row.
    pub fn seed_user(&self, user_id: i64, balance: i64) {
        self.state.lock().balances.insert(user_id, balance);
    }

    pub fn balance_of(&self, user_id: i64) -> Option<i64> {
        self.state.lock().balances.get(&user_id).copied()
    }

    pub fn usage_count(&self, user_id: i64, code_id: i64) -> i64 {
        self.state
            .lock()
            .usages
            .get(&(user_id, code_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn code_by_key(&self, key: &str) -> Option<RedemptionCode> {
        self.state.lock().code_by_key(key).cloned()
    }

    /// Inserts a fully formed record, counters included. Id 0 gets a fresh id.
    pub fn put_code(&self, mut code: RedemptionCode) -> RedemptionCode {
        let mut state = self.state.lock();
        if code.id() == 0 {
            state.last_code_id += 1;
            code.header_mut().id = state.last_code_id;
        } else {
            state.last_code_id = state.last_code_id.max(code.id());
        }
        state.key_index.insert(code.key().to_string(), code.id());
        state.codes.insert(code.id(), code.clone());
        code
    }

    pub fn facts(&self) -> Vec<UsageFact> {
        self.state.lock().facts.clone()
    }

    /// Makes the next `count` fact appends fail.
    pub fn fail_next_fact_appends(&self, count: usize) {
        self.failing_fact_appends.store(count, Ordering::SeqCst);
    }

    fn key_of(&self, id: i64) -> Option<String> {
        self.state.lock().codes.get(&id).map(|code| code.key().to_string())
    }

    /// Deletes every code matching `predicate`, each under its own lease.
    async fn delete_where<F>(&self, predicate: F) -> u64
    where
        F: Fn(&RedemptionCode) -> bool + Send + Sync,
    {
        let candidates: Vec<(i64, String)> = self
            .state
            .lock()
            .codes
            .values()
            .filter(|code| predicate(code))
            .map(|code| (code.id(), code.key().to_string()))
            .collect();

        let mut deleted = 0;
        for (id, key) in candidates {
            let _lease = self.locks.acquire(&key).await;
            let mut state = self.state.lock();
            // Re-check: a redemption may have changed the row meanwhile.
            if state.codes.get(&id).map(&predicate).unwrap_or(false) {
                state.remove_code(id);
                deleted += 1;
            }
        }
        deleted
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit() as usize).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        total: items.len() as i64,
        page: page.page.max(1),
        page_size: page.limit(),
    }
}

#[async_trait]
impl RedemptionStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn RedemptionTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            locks: self.locks.clone(),
            lease: None,
            locked_id: None,
            staged_code: None,
            staged_credits: Vec::new(),
            staged_uses: Vec::new(),
        }))
    }
}

struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    locks: KeyedLocks,
    lease: Option<KeyLease>,
    locked_id: Option<i64>,
    staged_code: Option<RedemptionCode>,
    staged_credits: Vec<(i64, i64)>,
    staged_uses: Vec<(i64, i64)>,
}

#[async_trait]
impl RedemptionTx for MemoryTx {
    async fn lock_code(&mut self, key: &str) -> Result<Option<RedemptionCode>, StoreError> {
        if self.lease.as_ref().map(|lease| lease.key() != key).unwrap_or(false) {
            return Err(StoreError::Corrupt(
                "transaction already holds another code".to_string(),
            ));
        }
        if self.lease.is_none() {
            self.lease = Some(self.locks.acquire(key).await);
        }

        let code = self.state.lock().code_by_key(key).cloned();
        self.locked_id = code.as_ref().map(RedemptionCode::id);
        Ok(code)
    }

    async fn count_uses(&mut self, user_id: i64, code_id: i64) -> Result<i64, StoreError> {
        let committed = self
            .state
            .lock()
            .usages
            .get(&(user_id, code_id))
            .copied()
            .unwrap_or(0);
        let staged = self
            .staged_uses
            .iter()
            .filter(|pair| **pair == (user_id, code_id))
            .count() as i64;
        Ok(committed + staged)
    }

    async fn record_use(&mut self, user_id: i64, code_id: i64) -> Result<(), StoreError> {
        self.staged_uses.push((user_id, code_id));
        Ok(())
    }

    async fn credit_quota(&mut self, user_id: i64, amount: i64) -> Result<(), StoreError> {
        if !self.state.lock().balances.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }
        self.staged_credits.push((user_id, amount));
        Ok(())
    }

    async fn save_code(&mut self, code: &RedemptionCode) -> Result<(), StoreError> {
        if self.locked_id != Some(code.id()) {
            return Err(StoreError::Corrupt(format!(
                "code {} is not locked by this transaction",
                code.id()
            )));
        }
        self.staged_code = Some(code.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            state,
            lease,
            staged_code,
            staged_credits,
            staged_uses,
            ..
        } = *self;

        {
            let mut state = state.lock();
            if let Some(code) = staged_code {
                state.codes.insert(code.id(), code);
            }
            for (user_id, amount) in staged_credits {
                *state.balances.entry(user_id).or_insert(0) += amount;
            }
            for pair in staged_uses {
                *state.usages.entry(pair).or_insert(0) += 1;
            }
        }
        drop(lease);
        Ok(())
    }
}

#[async_trait]
impl FactLog for MemoryStore {
    async fn append_fact(&self, fact: &UsageFact) -> Result<(), StoreError> {
        let injected = self
            .failing_fact_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Injected("fact append".to_string()));
        }
        self.state.lock().facts.push(fact.clone());
        Ok(())
    }

    async fn facts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<UsageFact>, StoreError> {
        Ok(self
            .state
            .lock()
            .facts
            .iter()
            .rev()
            .filter(|fact| fact.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CodeAdminStore for MemoryStore {
    async fn list_codes(&self, page: PageRequest) -> Result<Page<RedemptionCode>, StoreError> {
        let codes: Vec<RedemptionCode> = self.state.lock().codes.values().rev().cloned().collect();
        Ok(paginate(&codes, page))
    }

    async fn search_codes(
        &self,
        keyword: &str,
        page: PageRequest,
    ) -> Result<Page<RedemptionCode>, StoreError> {
        let id = keyword.parse::<i64>().ok();
        let codes: Vec<RedemptionCode> = self
            .state
            .lock()
            .codes
            .values()
            .rev()
            .filter(|code| Some(code.id()) == id || code.header().name.starts_with(keyword))
            .cloned()
            .collect();
        Ok(paginate(&codes, page))
    }

    async fn codes_grouped_by_name(&self, page: PageRequest) -> Result<Page<CodeGroup>, StoreError> {
        let state = self.state.lock();
        let names: Vec<String> = state
            .codes
            .values()
            .map(|code| code.header().name.clone())
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let names_page = paginate(&names, page);
        let groups = names_page
            .items
            .iter()
            .map(|name| {
                let codes: Vec<RedemptionCode> = state
                    .codes
                    .values()
                    .rev()
                    .filter(|code| &code.header().name == name)
                    .cloned()
                    .collect();
                CodeGroup {
                    name: name.clone(),
                    count: codes.len(),
                    codes,
                }
            })
            .collect();

        Ok(Page {
            items: groups,
            total: names_page.total,
            page: names_page.page,
            page_size: names_page.page_size,
        })
    }

    async fn get_code(&self, id: i64) -> Result<Option<RedemptionCode>, StoreError> {
        Ok(self.state.lock().codes.get(&id).cloned())
    }

    async fn insert_code(
        &self,
        new_code: NewRedemptionCode,
        now: i64,
    ) -> Result<RedemptionCode, StoreError> {
        let mut state = self.state.lock();
        if state.key_index.contains_key(&new_code.key) {
            return Err(StoreError::DuplicateKey);
        }
        state.last_code_id += 1;
        let code = new_code.into_code(state.last_code_id, now);
        state.key_index.insert(code.key().to_string(), code.id());
        state.codes.insert(code.id(), code.clone());
        Ok(code)
    }

    async fn update_code(
        &self,
        id: i64,
        edit: Box<dyn for<'a> FnOnce(&'a mut RedemptionCode) + Send>,
    ) -> Result<Option<RedemptionCode>, StoreError> {
        let Some(key) = self.key_of(id) else {
            return Ok(None);
        };
        let _lease = self.locks.acquire(&key).await;

        let mut state = self.state.lock();
        let Some(code) = state.codes.get_mut(&id) else {
            return Ok(None);
        };
        edit(code);
        Ok(Some(code.clone()))
    }

    async fn delete_code(&self, id: i64) -> Result<bool, StoreError> {
        let Some(key) = self.key_of(id) else {
            return Ok(false);
        };
        let _lease = self.locks.acquire(&key).await;
        Ok(self.state.lock().remove_code(id).is_some())
    }

    async fn delete_codes_by_name(&self, name: &str) -> Result<u64, StoreError> {
        let name = name.to_string();
        Ok(self.delete_where(move |code| code.header().name == name).await)
    }

    async fn delete_invalid_codes(&self, now: i64) -> Result<u64, StoreError> {
        Ok(self.delete_where(move |code| code.is_invalid(now)).await)
    }
}
