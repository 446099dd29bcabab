//! End-to-end flash-sale scenarios over the in-memory ports.
//!
//! Each test wires the full service graph through [`Services`], starts the
//! background tasks under a [`Supervisor`] and drives it through the client
//! traits or the services directly.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use seckill::app::{Ports, Services};
use seckill::client::{ActivityClient, OrderClient};
use seckill::config::SeckillConfig;
use seckill::reconciler::OrderReconciler;
use seckill::{ActivityService, OrderCoordinator, Supervisor};
use seckill_core::context::RequestContext;
use seckill_core::error::{Rejection, SeckillError};
use seckill_core::keys;
use seckill_core::lock::DistributedLock;
use seckill_core::message::OrderMessage;
use seckill_core::repository::ActivityRepository;
use seckill_core::response::ResponseCode;
use seckill_core::stock::StockStore;
use seckill_core::types::{
    ActivityId, ActivityStatus, Money, NewActivity, OrderStatus, ProductId, UserId,
};
use seckill_testing::{
    InMemoryActivityCache, InMemoryActivityRepository, InMemoryBroker, InMemoryLedger,
    InMemoryLock, InMemoryOrderRepository, InMemoryStockStore, init_tracing, test_clock,
    test_time,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TOPIC: &str = "seckill.order";

struct Harness {
    activities: ActivityService,
    orders: OrderCoordinator,
    reconciler: OrderReconciler,
    supervisor: Supervisor,
    stock: Arc<InMemoryStockStore>,
    lock: Arc<InMemoryLock>,
    repo: Arc<InMemoryActivityRepository>,
    order_repo: Arc<InMemoryOrderRepository>,
    broker: Arc<InMemoryBroker>,
}

impl Harness {
    fn start() -> Self {
        init_tracing();
        let stock = Arc::new(InMemoryStockStore::new());
        let lock = Arc::new(InMemoryLock::new());
        let repo = Arc::new(InMemoryActivityRepository::new());
        let order_repo = Arc::new(InMemoryOrderRepository::new());
        let broker = Arc::new(InMemoryBroker::new());

        let ports = Ports {
            stock: stock.clone(),
            lock: lock.clone(),
            ledger: Arc::new(InMemoryLedger::default()),
            cache: Arc::new(InMemoryActivityCache::new()),
            activities: repo.clone(),
            orders: order_repo.clone(),
            broker: broker.clone(),
            clock: Arc::new(test_clock()),
        };

        let services = Services::new(ports, &SeckillConfig::default(), TOPIC);
        let reconciler = services.reconciler.clone();
        let mut supervisor = Supervisor::new();
        let (activities, orders) = services.start(&mut supervisor, Duration::from_millis(10));

        Self {
            activities,
            orders,
            reconciler,
            supervisor,
            stock,
            lock,
            repo,
            order_repo,
            broker,
        }
    }

    async fn open_activity(&self, stock: i64) -> ActivityId {
        self.activities
            .create_activity(&RequestContext::background(), sale(stock))
            .await
            .unwrap()
    }

    async fn wait_until(&self, what: &str, check: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn all_confirmed(&self) -> bool {
        self.order_repo
            .all()
            .iter()
            .all(|o| o.status == OrderStatus::Created)
    }

    async fn stop(self) {
        self.supervisor.shutdown(Duration::from_secs(1)).await;
    }
}

fn sale(stock: i64) -> NewActivity {
    NewActivity {
        name: "midnight sale".to_string(),
        product_id: ProductId::new(42),
        seckill_price: Money::from_cents(9_900),
        total_stock: stock,
        start_time: test_time() - chrono::Duration::hours(1),
        end_time: test_time() + chrono::Duration::hours(1),
    }
}

/// Buy once for `user`, retrying while the activity lock is busy.
async fn buy(orders: &OrderCoordinator, user: UserId, activity: ActivityId) -> Result<(), Rejection> {
    let ctx = RequestContext::background();
    loop {
        match orders.create_order(&ctx, user, activity).await {
            Ok(_) => return Ok(()),
            Err(SeckillError::LockBusy) => tokio::time::sleep(Duration::from_millis(1)).await,
            Err(SeckillError::Conflict(rejection)) => return Err(rejection),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buyers_never_oversell() {
    let h = Harness::start();
    let activity = h.open_activity(10).await;

    let mut buyers = Vec::new();
    for user in 1..=50 {
        let orders = h.orders.clone();
        buyers.push(tokio::spawn(async move { buy(&orders, UserId::new(user), activity).await }));
    }

    let mut sold = 0;
    let mut sold_out = 0;
    for buyer in buyers {
        match buyer.await.unwrap() {
            Ok(()) => sold += 1,
            Err(Rejection::InsufficientStock) => sold_out += 1,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }

    assert_eq!(sold, 10);
    assert_eq!(sold_out, 40);
    assert_eq!(h.stock.get_stock(activity).await.unwrap(), 0);
    assert_eq!(h.order_repo.len(), 10);
    assert_eq!(h.broker.published(TOPIC).len(), 10);

    h.wait_until("every order confirmed", Harness::all_confirmed).await;
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_by_one_user_buy_once() {
    let h = Harness::start();
    let activity = h.open_activity(100).await;

    let mut attempts = Vec::new();
    for _ in 0..20 {
        let orders = h.orders.clone();
        attempts.push(tokio::spawn(async move { buy(&orders, UserId::new(7), activity).await }));
    }

    let mut admitted = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(rejection) => assert_eq!(rejection, Rejection::AlreadyParticipated),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(h.order_repo.len(), 1);
    assert_eq!(h.stock.get_stock(activity).await.unwrap(), 99);
    h.stop().await;
}

#[tokio::test]
async fn order_is_confirmed_by_consumer() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;
    let ctx = RequestContext::background();

    let response = OrderClient::create_order(&h.orders, &ctx, UserId::new(3), activity).await;
    assert_eq!(response.code, ResponseCode::Ok);
    assert_eq!(response.msg, "order created");
    let pending = response.data.unwrap();
    assert_eq!(pending.status, OrderStatus::Pending);
    assert_eq!(pending.amount, Money::from_cents(9_900));

    h.wait_until("order confirmed", Harness::all_confirmed).await;

    let confirmed = h
        .orders
        .get_order(&ctx, UserId::new(3), &pending.order_serial)
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Created);
    assert_eq!(confirmed.order_serial, pending.order_serial);

    let created = h
        .orders
        .list_orders(&ctx, UserId::new(3), Some(OrderStatus::Created))
        .await
        .unwrap();
    assert_eq!(created.total, 1);
    h.stop().await;
}

#[tokio::test]
async fn sold_out_answers_conflict_without_side_effects() {
    let h = Harness::start();
    let activity = h.open_activity(1).await;
    let ctx = RequestContext::background();

    let first = OrderClient::create_order(&h.orders, &ctx, UserId::new(1), activity).await;
    assert!(first.is_ok());

    let second = OrderClient::create_order(&h.orders, &ctx, UserId::new(2), activity).await;
    assert_eq!(second.code, ResponseCode::Conflict);
    assert_eq!(second.code.as_i32(), 409);
    assert!(second.data.is_none());

    assert_eq!(h.order_repo.len(), 1);
    assert_eq!(h.broker.published(TOPIC).len(), 1);
    assert_eq!(h.stock.get_stock(activity).await.unwrap(), 0);
    h.stop().await;
}

#[tokio::test]
async fn redelivered_event_leaves_order_unchanged() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;
    let ctx = RequestContext::background();

    let order = h.orders.create_order(&ctx, UserId::new(4), activity).await.unwrap();
    h.wait_until("first delivery acked", |h| h.broker.acked() == 1).await;

    let duplicate = h.broker.published(TOPIC).remove(0);
    let message = OrderMessage::from_slice(&duplicate).unwrap();
    assert_eq!(message.order_serial, order.order_serial);
    seckill_core::broker::MessageBroker::publish(
        h.broker.as_ref(),
        TOPIC,
        order.order_serial.as_str(),
        duplicate,
    )
    .await
    .unwrap();

    h.wait_until("duplicate acked", |h| h.broker.acked() == 2).await;
    assert_eq!(h.order_repo.len(), 1);
    assert!(h.all_confirmed());
    assert_eq!(h.broker.discarded(), 0);
    h.stop().await;
}

#[tokio::test]
async fn reconciler_confirms_order_whose_event_was_lost() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;
    h.broker.set_publish_failing(true);

    let order = h
        .orders
        .create_order(&RequestContext::background(), UserId::new(5), activity)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(h.broker.published(TOPIC).is_empty());

    // Outage persists: the sweep skips the order and it stays pending.
    assert_eq!(h.reconciler.sweep().await.unwrap(), 0);
    assert!(!h.all_confirmed());

    h.broker.set_publish_failing(false);
    assert_eq!(h.reconciler.sweep().await.unwrap(), 1);

    h.wait_until("reconciled order confirmed", Harness::all_confirmed).await;
    assert_eq!(h.reconciler.sweep().await.unwrap(), 0);
    h.stop().await;
}

#[tokio::test]
async fn held_lock_answers_busy() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;
    let _token = h
        .lock
        .acquire(&keys::activity_lock(activity), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let response = OrderClient::create_order(
        &h.orders,
        &RequestContext::background(),
        UserId::new(6),
        activity,
    )
    .await;

    assert_eq!(response.code, ResponseCode::LockBusy);
    assert_eq!(response.code.as_i32(), 429);
    assert!(response.data.is_none());
    assert!(h.order_repo.is_empty());
    assert_eq!(h.stock.get_stock(activity).await.unwrap(), 5);
    h.stop().await;
}

#[tokio::test]
async fn expired_deadline_answers_internal_error() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;

    let expired = RequestContext::with_deadline(Instant::now());
    let response = OrderClient::create_order(&h.orders, &expired, UserId::new(6), activity).await;

    assert_eq!(response.code, ResponseCode::Internal);
    assert_eq!(response.code.as_i32(), 500);
    assert!(h.order_repo.is_empty());
    assert!(!h.lock.is_held(&keys::activity_lock(activity)));
    assert_eq!(h.stock.get_stock(activity).await.unwrap(), 5);
    h.stop().await;
}

#[tokio::test]
async fn disabled_activity_rejects_buyers() {
    let h = Harness::start();
    let activity = h.open_activity(5).await;
    let ctx = RequestContext::background();

    h.activities.set_enabled(&ctx, activity, false).await.unwrap();
    let err = h
        .orders
        .create_order(&ctx, UserId::new(9), activity)
        .await
        .unwrap_err();
    assert_eq!(err, SeckillError::Conflict(Rejection::Unavailable));

    h.activities.set_enabled(&ctx, activity, true).await.unwrap();
    h.orders.create_order(&ctx, UserId::new(9), activity).await.unwrap();
    h.stop().await;
}

#[tokio::test]
async fn activity_client_envelopes() {
    let h = Harness::start();
    let ctx = SeckillConfig::default().request_context();

    let created = ActivityClient::create_activity(&h.activities, &ctx, sale(3)).await;
    assert_eq!(created.code, ResponseCode::Ok);
    let id = created.data.unwrap();

    let deducted = ActivityClient::deduct_stock(&h.activities, &ctx, id, UserId::new(1), 2).await;
    assert_eq!(deducted.data, Some(true));

    let info = ActivityClient::get_activity(&h.activities, &ctx, id).await.data.unwrap();
    assert_eq!(info.available_stock, 1);
    assert_eq!(info.total_stock, 3);
    assert_eq!(info.status, ActivityStatus::Active);

    let active = ActivityClient::list_activities(&h.activities, &ctx, Some(ActivityStatus::Active))
        .await
        .data
        .unwrap();
    assert_eq!(active.total, 1);
    let ended = ActivityClient::list_activities(&h.activities, &ctx, Some(ActivityStatus::Ended))
        .await
        .data
        .unwrap();
    assert_eq!(ended.total, 0);

    let missing = ActivityClient::get_activity(&h.activities, &ctx, ActivityId::new(999)).await;
    assert_eq!(missing.code, ResponseCode::NotFound);

    let invalid = ActivityClient::deduct_stock(&h.activities, &ctx, id, UserId::new(2), 0).await;
    assert_eq!(invalid.code, ResponseCode::Validation);
    h.stop().await;
}

#[tokio::test]
async fn flusher_mirrors_live_stock() {
    let h = Harness::start();
    let activity = h.open_activity(4).await;
    let ctx = RequestContext::background();

    h.orders.create_order(&ctx, UserId::new(1), activity).await.unwrap();
    h.orders.create_order(&ctx, UserId::new(2), activity).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mirrored = h.repo.get(activity).await.unwrap().unwrap().available_stock;
        if mirrored == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "mirror stuck at {mirrored}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.stop().await;
}

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Sequential deductions follow a simple model: each user succeeds at
        /// most once and stock never goes below zero.
        #[test]
        fn deductions_match_model(
            initial in 1_i64..30,
            requests in prop::collection::vec((1_i64..10, 1_i64..5), 1..40),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let h = Harness::start();
                let activity = h.open_activity(initial).await;
                let ctx = RequestContext::background();

                let mut remaining = initial;
                let mut joined = HashSet::new();
                for (user, count) in requests {
                    let outcome = h
                        .activities
                        .deduct_stock(&ctx, activity, UserId::new(user), count)
                        .await;

                    let expected = if joined.contains(&user) {
                        Err(SeckillError::Conflict(Rejection::AlreadyParticipated))
                    } else if count > remaining {
                        Err(SeckillError::Conflict(Rejection::InsufficientStock))
                    } else {
                        remaining -= count;
                        joined.insert(user);
                        Ok(true)
                    };
                    assert_eq!(outcome, expected);
                }

                assert_eq!(h.stock.get_stock(activity).await.unwrap(), remaining);
                assert!(remaining >= 0);
                h.stop().await;
            });
        }
    }
}
