// ============================================================================
// REDEMPTION ENGINE TESTS - concurrencia, límites y atomicidad del canje
// ============================================================================

use quota_redeem_ws::domains::redemption::{
    CodeHeader, CodeStatus, FactKind, GiftCode, MemoryStore, RedeemError, RedemptionCode,
    RedemptionService, RedemptionStore, RedemptionTx, SingleCode,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;

struct FixedClock(AtomicI64);

impl quota_redeem_ws::domains::redemption::Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn header(key: &str, quota: i64) -> CodeHeader {
    CodeHeader {
        id: 0,
        key: key.to_string(),
        name: "test".to_string(),
        status: CodeStatus::Enabled,
        quota,
        created_at: NOW - 100,
        redeemed_at: 0,
        expires_at: 0,
    }
}

fn single(key: &str, quota: i64) -> RedemptionCode {
    RedemptionCode::Single(SingleCode {
        header: header(key, quota),
        used_user_id: 0,
    })
}

fn gift(key: &str, quota: i64, max_uses: i32, max_uses_per_user: i32) -> RedemptionCode {
    RedemptionCode::Gift(GiftCode {
        header: header(key, quota),
        max_uses,
        max_uses_per_user,
        used_count: 0,
        used_user_count: 0,
    })
}

fn setup(users: impl IntoIterator<Item = i64>) -> (MemoryStore, Arc<RedemptionService>) {
    let store = MemoryStore::new();
    for user in users {
        store.seed_user(user, 0);
    }
    let service = RedemptionService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_clock(Arc::new(FixedClock(AtomicI64::new(NOW))));
    (store, Arc::new(service))
}

fn gift_counters(code: &RedemptionCode) -> (i32, i32) {
    match code {
        RedemptionCode::Gift(g) => (g.used_count, g.used_user_count),
        RedemptionCode::Single(_) => panic!("expected a gift code"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn single_code_is_credited_exactly_once_under_race() {
    let (store, service) = setup(1..=16);
    store.put_code(single("single-race", 100));

    let handles: Vec<_> = (1..=16)
        .map(|user| {
            let service = service.clone();
            tokio::spawn(async move { service.redeem("single-race", user).await })
        })
        .collect();

    let mut successes = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(quota) => {
                assert_eq!(quota, 100);
                successes += 1;
            }
            Err(RedeemError::AlreadyUsed) => already_used += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(already_used, 15);

    let total: i64 = (1..=16).map(|u| store.balance_of(u).unwrap()).sum();
    assert_eq!(total, 100);

    let code = store.code_by_key("single-race").unwrap();
    assert_eq!(code.status(), CodeStatus::Used);
    assert_eq!(code.header().redeemed_at, NOW);
    match code {
        RedemptionCode::Single(s) => assert_eq!(store.balance_of(s.used_user_id), Some(100)),
        RedemptionCode::Gift(_) => unreachable!(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_racing_a_single_code_is_credited_once() {
    let (store, service) = setup([7]);
    store.put_code(single("single-same-user", 100));

    let a = tokio::spawn({
        let service = service.clone();
        async move { service.redeem("single-same-user", 7).await }
    });
    let b = tokio::spawn({
        let service = service.clone();
        async move { service.redeem("single-same-user", 7).await }
    });

    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(RedeemError::AlreadyUsed))));
    assert_eq!(store.balance_of(7), Some(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gift_code_user_cap_holds_under_race() {
    let (store, service) = setup([1, 2, 3]);
    store.put_code(gift("gift-race", 50, 2, 1));

    let handles: Vec<_> = [1, 2, 3]
        .into_iter()
        .map(|user| {
            let service = service.clone();
            tokio::spawn(async move { (user, service.redeem("gift-race", user).await) })
        })
        .collect();

    let mut winners = Vec::new();
    let mut capped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            (user, Ok(50)) => winners.push(user),
            (_, Err(RedeemError::MaxUsersReached)) => capped += 1,
            (_, other) => panic!("unexpected result: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 2);
    assert_eq!(capped, 1);

    let code = store.code_by_key("gift-race").unwrap();
    assert_eq!(gift_counters(&code), (2, 2));
    assert_eq!(code.status(), CodeStatus::Used);

    for user in [1, 2, 3] {
        let expected = if winners.contains(&user) { 50 } else { 0 };
        assert_eq!(store.balance_of(user), Some(expected));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn unlimited_gift_counts_every_redemption() {
    let users: Vec<i64> = (1..=20).collect();
    let (store, service) = setup(users.clone());
    let code = store.put_code(gift("gift-unlimited", 5, 0, 3));

    let handles: Vec<_> = users
        .iter()
        .flat_map(|&user| std::iter::repeat(user).take(3))
        .map(|user| {
            let service = service.clone();
            tokio::spawn(async move { service.redeem("gift-unlimited", user).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), 5);
    }

    let code_after = store.code_by_key("gift-unlimited").unwrap();
    assert_eq!(gift_counters(&code_after), (60, 20));
    assert_eq!(code_after.status(), CodeStatus::Enabled);
    for user in users {
        assert_eq!(store.balance_of(user), Some(15));
        assert_eq!(store.usage_count(user, code.id()), 3);
    }
}

#[tokio::test]
async fn gift_code_with_three_user_cap() {
    let (store, service) = setup(1..=4);
    store.put_code(gift("gift-three", 10, 3, 2));

    assert_eq!(service.redeem("gift-three", 1).await.unwrap(), 10);
    assert_eq!(service.redeem("gift-three", 2).await.unwrap(), 10);

    // A returning user does not consume another seat.
    assert_eq!(service.redeem("gift-three", 1).await.unwrap(), 10);
    let code = store.code_by_key("gift-three").unwrap();
    assert_eq!(gift_counters(&code), (3, 2));
    assert_eq!(code.status(), CodeStatus::Enabled);

    assert_eq!(service.redeem("gift-three", 3).await.unwrap(), 10);
    assert!(matches!(
        service.redeem("gift-three", 4).await,
        Err(RedeemError::MaxUsersReached)
    ));

    // Once the seats are taken the coarse gate also stops returning users.
    assert!(matches!(
        service.redeem("gift-three", 2).await,
        Err(RedeemError::MaxUsersReached)
    ));

    let code = store.code_by_key("gift-three").unwrap();
    assert_eq!(gift_counters(&code), (4, 3));
    assert_eq!(code.status(), CodeStatus::Used);
    assert_eq!(store.balance_of(1), Some(20));
    assert_eq!(store.balance_of(4), Some(0));
}

#[tokio::test]
async fn per_user_limit_is_enforced() {
    let (store, service) = setup([9]);
    let code = store.put_code(gift("gift-per-user", 25, 0, 2));

    assert_eq!(service.redeem("gift-per-user", 9).await.unwrap(), 25);
    assert_eq!(service.redeem("gift-per-user", 9).await.unwrap(), 25);
    assert!(matches!(
        service.redeem("gift-per-user", 9).await,
        Err(RedeemError::PerUserLimitReached)
    ));

    assert_eq!(store.balance_of(9), Some(50));
    assert_eq!(store.usage_count(9, code.id()), 2);
    assert_eq!(gift_counters(&store.code_by_key("gift-per-user").unwrap()), (2, 1));
}

#[tokio::test]
async fn expiry_is_inclusive_and_leaves_no_trace() {
    let (store, service) = setup([1]);
    let mut code = single("expiring", 100);
    code.header_mut().expires_at = NOW;
    let code = store.put_code(code);

    assert!(matches!(
        service.redeem("expiring", 1).await,
        Err(RedeemError::Expired)
    ));
    assert_eq!(store.code_by_key("expiring").unwrap(), code);
    assert_eq!(store.balance_of(1), Some(0));
    assert!(store.facts().is_empty());

    let mut later = gift("not-yet", 10, 0, 0);
    later.header_mut().expires_at = NOW + 1;
    store.put_code(later);
    assert_eq!(service.redeem("not-yet", 1).await.unwrap(), 10);
}

#[tokio::test]
async fn status_checks_come_before_expiry() {
    let (store, service) = setup([1]);

    let mut used_and_expired = single("used-expired", 1);
    used_and_expired.header_mut().status = CodeStatus::Used;
    used_and_expired.header_mut().expires_at = NOW - 10;
    store.put_code(used_and_expired);

    let mut disabled_gift = gift("disabled-gift", 1, 0, 0);
    disabled_gift.header_mut().status = CodeStatus::Disabled;
    disabled_gift.header_mut().expires_at = NOW - 10;
    store.put_code(disabled_gift);

    let mut disabled_single = single("disabled-single", 1);
    disabled_single.header_mut().status = CodeStatus::Disabled;
    store.put_code(disabled_single);

    assert!(matches!(
        service.redeem("used-expired", 1).await,
        Err(RedeemError::AlreadyUsed)
    ));
    assert!(matches!(
        service.redeem("disabled-gift", 1).await,
        Err(RedeemError::Disabled)
    ));
    assert!(matches!(
        service.redeem("disabled-single", 1).await,
        Err(RedeemError::AlreadyUsed)
    ));
}

#[tokio::test]
async fn invalid_input_and_unknown_codes() {
    let (_store, service) = setup([1]);

    assert!(matches!(
        service.redeem("", 1).await,
        Err(RedeemError::InvalidInput(_))
    ));
    assert!(matches!(
        service.redeem("   ", 1).await,
        Err(RedeemError::InvalidInput(_))
    ));
    assert!(matches!(
        service.redeem("anything", 0).await,
        Err(RedeemError::InvalidInput(_))
    ));
    assert!(matches!(
        service.redeem("missing", 1).await,
        Err(RedeemError::NotFound)
    ));
}

#[tokio::test]
async fn credit_failure_rolls_back_everything() {
    // User 404 has no balance row.
    let (store, service) = setup([1]);
    let code = store.put_code(gift("rollback", 10, 5, 1));

    assert!(matches!(
        service.redeem("rollback", 404).await,
        Err(RedeemError::Storage(_))
    ));

    assert_eq!(store.code_by_key("rollback").unwrap(), code);
    assert_eq!(store.usage_count(404, code.id()), 0);
    assert!(store.facts().is_empty());

    // The lock was released with the rolled back transaction.
    assert_eq!(service.redeem("rollback", 1).await.unwrap(), 10);
}

#[tokio::test]
async fn fact_append_failure_keeps_the_credit() {
    let (store, service) = setup([3]);
    store.put_code(gift("fact-failure", 40, 0, 0));
    store.fail_next_fact_appends(1);

    assert_eq!(service.redeem("fact-failure", 3).await.unwrap(), 40);
    assert_eq!(store.balance_of(3), Some(40));
    assert!(store.facts().is_empty());

    assert_eq!(service.redeem("fact-failure", 3).await.unwrap(), 40);
    assert_eq!(store.facts().len(), 1);
}

#[tokio::test]
async fn successful_redemptions_append_usage_facts() {
    let (store, service) = setup([5]);
    let single_code = store.put_code(single("history-single", 100));
    let gift_code = store.put_code(gift("history-gift", 30, 0, 0));

    service.redeem("history-single", 5).await.unwrap();
    service.redeem("history-gift", 5).await.unwrap();

    let history = service.user_history(5, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].code_id, gift_code.id());
    assert_eq!(history[0].kind, FactKind::Gift);
    assert_eq!(history[0].quota, 30);
    assert_eq!(history[0].created_at, NOW);
    assert_eq!(history[1].code_id, single_code.id());
    assert_eq!(
        history[1].describe(),
        format!("Topped up 100 quota via redemption code #{}", single_code.id())
    );

    assert!(service.user_history(6, 10).await.unwrap().is_empty());
}

/// Clock that moves one second forward on every read.
struct TickingClock(AtomicI64);

impl quota_redeem_ws::domains::redemption::Clock for TickingClock {
    fn now(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[tokio::test]
async fn usage_fact_is_stamped_with_the_redemption_time() {
    let store = MemoryStore::new();
    store.seed_user(8, 0);
    store.put_code(single("stamped", 70));
    let service = RedemptionService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_clock(Arc::new(TickingClock(AtomicI64::new(NOW))));

    service.redeem("stamped", 8).await.unwrap();

    let code = store.code_by_key("stamped").unwrap();
    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].created_at, code.header().redeemed_at);
}

#[tokio::test]
async fn keys_are_matched_exactly() {
    let (store, service) = setup([9]);
    store.put_code(single("exact-key", 15));

    assert!(matches!(
        service.redeem(" exact-key ", 9).await,
        Err(RedeemError::NotFound)
    ));
    assert_eq!(store.balance_of(9), Some(0));
    assert_eq!(service.redeem("exact-key", 9).await.unwrap(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_is_scoped_to_one_code() {
    let (store, service) = setup([1, 2]);
    store.put_code(single("held", 10));
    store.put_code(single("free", 10));

    let mut held_tx = store.begin().await.unwrap();
    held_tx.lock_code("held").await.unwrap().unwrap();

    // Another code redeems while "held" is locked.
    let free = tokio::time::timeout(Duration::from_secs(2), service.redeem("free", 1)).await;
    assert_eq!(free.unwrap().unwrap(), 10);

    // The same code waits for the holder.
    let waiting = tokio::spawn({
        let service = service.clone();
        async move { service.redeem("held", 2).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    drop(held_tx);
    let result = tokio::time::timeout(Duration::from_secs(2), waiting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap(), 10);
}

#[tokio::test(start_paused = true)]
async fn random_delay_is_applied_before_redeeming() {
    use quota_redeem_ws::domains::redemption::RedeemDelay;

    let store = MemoryStore::new();
    store.seed_user(1, 0);
    store.put_code(single("delayed", 10));
    let service = RedemptionService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_delay(RedeemDelay::new(200, 200));

    let started = tokio::time::Instant::now();
    assert_eq!(service.redeem("delayed", 1).await.unwrap(), 10);
    assert!(started.elapsed() >= Duration::from_millis(200));
}
