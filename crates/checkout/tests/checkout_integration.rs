//! Integration tests for the checkout workflow and order materialization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use checkout::{
    CheckoutConfig, CheckoutError, CheckoutRequest, CheckoutStatus, Compensation, FailureStep,
    InMemoryNotificationDispatcher, InMemoryPaymentGateway, MaterializeOutcome,
    NotificationSender, OrderMaterializer, ReconciliationKind, ReconciliationLog, RetryPolicy,
    WorkflowOrchestrator, WorkflowState,
};
use common::{CheckoutAttemptId, UserId};
use domain::{
    Cart, CartItem, Money, OrderItem, OrderMessage, OrderNotification, OrderStatus, PaymentStatus,
    ProductId, ShippingAddress,
};
use futures_util::future::join_all;
use queue::{ConsumerConfig, ConsumerPool, InMemoryMessageQueue, MessageQueue, QueueConfig};
use store::{CartStore, InMemoryStore, InventoryStore, OrderStore};

type TestOrchestrator =
    WorkflowOrchestrator<InMemoryStore, InMemoryPaymentGateway, InMemoryMessageQueue<OrderMessage>>;

struct TestHarness {
    store: InMemoryStore,
    gateway: InMemoryPaymentGateway,
    queue: InMemoryMessageQueue<OrderMessage>,
    dispatcher: InMemoryNotificationDispatcher,
    reconciliation: ReconciliationLog<InMemoryStore>,
    orchestrator: TestOrchestrator,
    materializer: Arc<OrderMaterializer<InMemoryStore>>,
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
    )
}

fn fast_config() -> CheckoutConfig {
    CheckoutConfig {
        payment_retry: fast_retry(3),
        enqueue_retry: fast_retry(3),
        refund_retry: fast_retry(3),
        notification_retry: fast_retry(5),
        ..CheckoutConfig::default()
    }
}

impl TestHarness {
    fn new() -> Self {
        Self::with(fast_config(), QueueConfig::default())
    }

    fn with(config: CheckoutConfig, queue_config: QueueConfig) -> Self {
        let store = InMemoryStore::new();
        let gateway = InMemoryPaymentGateway::new();
        let queue = InMemoryMessageQueue::new(queue_config);
        let dispatcher = InMemoryNotificationDispatcher::new();
        let reconciliation = ReconciliationLog::new(store.clone());

        let (notifications, _task) =
            NotificationSender::spawn(dispatcher.clone(), config.notification_retry);
        let materializer = Arc::new(OrderMaterializer::new(store.clone(), notifications));
        let orchestrator =
            WorkflowOrchestrator::new(store.clone(), gateway.clone(), queue.clone(), config);

        Self {
            store,
            gateway,
            queue,
            dispatcher,
            reconciliation,
            orchestrator,
            materializer,
        }
    }

    async fn seed_cart(&self, user: &str, items: Vec<CartItem>) -> UserId {
        let user_id = UserId::new(user);
        let cart = Cart::with_items(user_id.clone(), items).unwrap();
        self.store.put_cart(&cart).await.unwrap();
        user_id
    }

    fn request(&self, user_id: &UserId, payment_method_ref: &str) -> CheckoutRequest {
        CheckoutRequest {
            user_id: user_id.clone(),
            payment_method_ref: payment_method_ref.to_string(),
            shipping_address: address(),
        }
    }

    async fn next_message(&self) -> OrderMessage {
        let mut deliveries = self.queue.receive(1).await.unwrap();
        assert_eq!(deliveries.len(), 1, "expected one queued message");
        let delivery = deliveries.remove(0);
        self.queue.ack(delivery.receipt).await.unwrap();
        delivery.payload
    }
}

fn address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Ada Lovelace".to_string(),
        line1: "12 St James's Square".to_string(),
        line2: None,
        city: "London".to_string(),
        postal_code: "SW1Y 4JH".to_string(),
        country: "GB".to_string(),
    }
}

fn message_for(product: &str, quantity: u32, unit_price: Money) -> OrderMessage {
    OrderMessage {
        checkout_attempt_id: CheckoutAttemptId::new(),
        user_id: UserId::new("u1"),
        items: vec![OrderItem::new(product, quantity, unit_price)],
        payment_id: "pi_test".to_string(),
        total_amount: unit_price.multiply(quantity),
        shipping_address: address(),
        created_at: Utc::now(),
    }
}

fn states(history: &[WorkflowState]) -> Vec<&'static str> {
    history.iter().map(WorkflowState::as_str).collect()
}

#[tokio::test]
async fn scenario_a_checkout_and_materialize() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 2, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;
    assert_eq!(outcome.status, CheckoutStatus::Accepted);
    assert!(outcome.error.is_none());
    assert_eq!(
        states(&outcome.history),
        vec!["VALIDATING", "AUTHORIZING", "ENQUEUEING", "COMPLETED"]
    );

    let message = h.next_message().await;
    assert_eq!(message.checkout_attempt_id, outcome.checkout_attempt_id);
    assert_eq!(message.total_amount, Money::from_cents(2000));

    let result = h.materializer.materialize(&message).await.unwrap();
    let MaterializeOutcome::Completed { order_id } = result else {
        panic!("expected Completed");
    };

    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.total_amount, Money::from_cents(2000));
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.checkout_attempt_id, outcome.checkout_attempt_id);
    assert_ne!(order.order_id.as_uuid(), outcome.checkout_attempt_id.as_uuid());
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(3)
    );
    assert!(h.store.get_cart(&user).await.unwrap().is_none());

    let polled = h
        .store
        .find_by_checkout_attempt(outcome.checkout_attempt_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(polled.order_id, order_id);

    assert!(h.dispatcher.wait_for(1, Duration::from_secs(2)).await);
    let sent = h.dispatcher.sent().await;
    assert!(matches!(sent[0], OrderNotification::OrderConfirmed(_)));
    assert_eq!(sent[0].order_id(), order_id);
}

#[tokio::test]
async fn scenario_b_declined_payment() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.gateway
        .decline_method("pm_broke", "insufficient_funds")
        .await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 2, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_broke")).await;

    assert_eq!(outcome.status, CheckoutStatus::Declined);
    let Some(CheckoutError::PaymentDeclined(declined)) = &outcome.error else {
        panic!("expected PaymentDeclined");
    };
    assert_eq!(declined.decline_code, "insufficient_funds");
    assert_eq!(outcome.compensation(), Some(&Compensation::NotNeeded));
    assert_eq!(h.gateway.charge_calls().await, 1);
    assert_eq!(h.gateway.refund_calls().await, 0);
    assert_eq!(h.queue.depth().await, 0);
    assert_eq!(h.store.order_count().await, 0);
    assert!(h.store.get_cart(&user).await.unwrap().is_some());
}

#[tokio::test]
async fn scenario_c_crash_after_order_insert_is_resumed() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 2, Money::from_cents(1000))])
        .await;
    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;
    assert_eq!(outcome.status, CheckoutStatus::Accepted);

    let pool = ConsumerPool::new(
        h.queue.clone(),
        Arc::clone(&h.materializer),
        ConsumerConfig::default(),
    );

    // The order insert succeeds, then storage fails before inventory is taken
    h.store.fail_next_inventory_writes(1).await;
    let first = pool.poll_once().await.unwrap();
    assert_eq!(first.nacked, 1);
    assert_eq!(h.store.order_count().await, 1);
    let record = h
        .store
        .idempotency_record(outcome.checkout_attempt_id)
        .await
        .unwrap();
    assert!(!record.completed);

    let second = pool.poll_once().await.unwrap();
    assert_eq!(second.acked, 1);
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(3)
    );
    assert_eq!(h.store.decrement_writes().await, 1);
    assert!(
        h.store
            .idempotency_record(outcome.checkout_attempt_id)
            .await
            .unwrap()
            .completed
    );
    assert_eq!(h.queue.depth().await, 0);
}

#[tokio::test]
async fn scenario_c_crash_after_inventory_is_not_decremented_twice() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    let message = message_for("p1", 2, Money::from_cents(1000));

    // Inventory taken, then the cart delete fails
    h.store.fail_next_cart_deletes(1).await;
    assert!(h.materializer.materialize(&message).await.is_err());
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(3)
    );

    let resumed = h.materializer.materialize(&message).await.unwrap();
    assert!(matches!(resumed, MaterializeOutcome::Completed { .. }));
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(3)
    );

    let replay = h.materializer.materialize(&message).await.unwrap();
    assert!(matches!(replay, MaterializeOutcome::DuplicateNoop { .. }));
    assert_eq!(replay.order_id(), resumed.order_id());
}

#[tokio::test]
async fn same_message_delivered_concurrently_creates_one_order() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 10).await;
    let message = message_for("p1", 2, Money::from_cents(1000));

    let deliveries = (0..10).map(|_| {
        let materializer = Arc::clone(&h.materializer);
        let message = message.clone();
        tokio::spawn(async move { materializer.materialize(&message).await })
    });
    let results = join_all(deliveries).await;

    let mut order_ids = Vec::new();
    for result in results {
        order_ids.push(result.unwrap().unwrap().order_id());
    }
    order_ids.dedup();
    assert_eq!(order_ids.len(), 1);

    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(8)
    );
    assert_eq!(h.store.decrement_writes().await, 1);
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 3).await;

    let materializations = (0..8).map(|_| {
        let materializer = Arc::clone(&h.materializer);
        let message = message_for("p1", 1, Money::from_cents(1000));
        tokio::spawn(async move { materializer.materialize(&message).await })
    });
    let results = join_all(materializations).await;

    let mut completed = 0;
    let mut conflicts = 0;
    for result in results {
        match result.unwrap().unwrap() {
            MaterializeOutcome::Completed { .. } => completed += 1,
            MaterializeOutcome::PartiallyFailed { conflicts: c, .. } => {
                assert_eq!(c.len(), 1);
                assert_eq!(c[0].requested, 1);
                assert_eq!(c[0].available, 0);
                conflicts += 1;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(completed, 3);
    assert_eq!(conflicts, 5);
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(0)
    );
    assert_eq!(
        h.store
            .list_by_status(OrderStatus::PartiallyFailed)
            .await
            .unwrap()
            .len(),
        5
    );
    assert_eq!(
        h.reconciliation
            .open_items_of_kind(ReconciliationKind::PartiallyFailedOrder)
            .await
            .unwrap()
            .len(),
        5
    );
}

#[tokio::test]
async fn partially_failed_order_sends_partial_notification() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.store.seed_product("p2", Money::from_cents(500), 0).await;

    let mut message = message_for("p1", 1, Money::from_cents(1000));
    message
        .items
        .push(OrderItem::new("p2", 2, Money::from_cents(500)));

    let outcome = h.materializer.materialize(&message).await.unwrap();
    let MaterializeOutcome::PartiallyFailed {
        order_id,
        conflicts,
    } = outcome
    else {
        panic!("expected PartiallyFailed");
    };
    assert_eq!(conflicts[0].product_id, ProductId::new("p2"));

    // The items in stock are still taken
    assert_eq!(
        h.store.get_stock(&ProductId::new("p1")).await.unwrap(),
        Some(4)
    );
    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFailed);

    assert!(h.dispatcher.wait_for(1, Duration::from_secs(2)).await);
    let OrderNotification::OrderPartiallyFailed(data) = &h.dispatcher.sent().await[0] else {
        panic!("expected OrderPartiallyFailed");
    };
    assert_eq!(data.short_items, vec![ProductId::new("p2")]);
}

#[tokio::test]
async fn enqueue_failure_refunds_exactly_once() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.queue.fail_next_publishes(3).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 2, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    assert!(matches!(outcome.error, Some(CheckoutError::QueuePublish(_))));
    assert_eq!(
        states(&outcome.history),
        vec!["VALIDATING", "AUTHORIZING", "ENQUEUEING", "FAILED"]
    );
    let Some(WorkflowState::Failed { step, compensation }) = outcome.final_state() else {
        panic!("expected Failed");
    };
    assert_eq!(*step, FailureStep::Enqueue);
    assert!(matches!(compensation, Compensation::Refunded { .. }));

    assert_eq!(h.gateway.refund_calls().await, 1);
    assert_eq!(
        h.gateway
            .intent_for(outcome.checkout_attempt_id)
            .await
            .unwrap()
            .status,
        PaymentStatus::Refunded
    );
    assert_eq!(h.queue.depth().await, 0);
    assert_eq!(h.store.order_count().await, 0);
    // A definite publish failure leaves nothing for an operator
    assert!(h.reconciliation.open_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn refund_exhaustion_raises_reconciliation_item() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.queue.fail_next_publishes(3).await;
    h.gateway.fail_next_refunds(10).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 1, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    assert_eq!(outcome.compensation(), Some(&Compensation::RefundFailed));
    assert_eq!(h.gateway.refund_calls().await, 3);

    let items = h
        .reconciliation
        .open_items_of_kind(ReconciliationKind::RefundFailed)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].checkout_attempt_id, outcome.checkout_attempt_id);
    let intent = h
        .gateway
        .intent_for(outcome.checkout_attempt_id)
        .await
        .unwrap();
    assert_eq!(items[0].payment_id.as_deref(), Some(intent.gateway_id.as_str()));
    assert_eq!(intent.status, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn stale_cart_lists_every_stale_item_and_charges_nothing() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.store.seed_product("p2", Money::from_cents(500), 1).await;
    let user = h
        .seed_cart(
            "u1",
            vec![
                CartItem::new("p1", 1, Money::from_cents(1000)),
                CartItem::new("p2", 3, Money::from_cents(500)),
            ],
        )
        .await;
    h.store.set_price("p1", Money::from_cents(1100)).await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    let Some(CheckoutError::CartStale(stale)) = &outcome.error else {
        panic!("expected CartStale");
    };
    assert_eq!(stale.items.len(), 2);
    assert_eq!(states(&outcome.history), vec!["VALIDATING", "FAILED"]);
    assert_eq!(h.gateway.charge_calls().await, 0);
}

#[tokio::test]
async fn empty_cart_is_rejected_before_payment() {
    let h = TestHarness::new();
    let outcome = h
        .orchestrator
        .checkout(h.request(&UserId::new("nobody"), "pm_card"))
        .await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    assert!(matches!(outcome.error, Some(CheckoutError::EmptyCart(_))));
    assert_eq!(h.gateway.charge_calls().await, 0);
}

#[tokio::test]
async fn transient_gateway_failures_charge_once() {
    let h = TestHarness::new();
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.gateway.fail_next_charges(2).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 1, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Accepted);
    assert_eq!(h.gateway.charge_calls().await, 3);
    assert_eq!(h.gateway.intent_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_during_charge_raises_unknown_charge_item() {
    let config = CheckoutConfig {
        workflow_timeout: Duration::from_secs(1),
        ..fast_config()
    };
    let h = TestHarness::with(config, QueueConfig::default());
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.gateway
        .set_charge_delay(Some(Duration::from_secs(10)))
        .await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 1, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    assert!(matches!(
        outcome.error,
        Some(CheckoutError::Timeout {
            step: "AUTHORIZING"
        })
    ));
    assert_eq!(
        outcome.compensation(),
        Some(&Compensation::ChargeOutcomeUnknown)
    );
    assert_eq!(h.gateway.refund_calls().await, 0);

    let items = h
        .reconciliation
        .open_items_of_kind(ReconciliationKind::ChargeOutcomeUnknown)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].checkout_attempt_id, outcome.checkout_attempt_id);
}

#[tokio::test(start_paused = true)]
async fn timeout_after_capture_refunds() {
    let config = CheckoutConfig {
        workflow_timeout: Duration::from_secs(1),
        enqueue_retry: RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(2)),
        ..fast_config()
    };
    let h = TestHarness::with(config, QueueConfig::default());
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    h.queue.fail_next_publishes(1).await;
    let user = h
        .seed_cart("u1", vec![CartItem::new("p1", 1, Money::from_cents(1000))])
        .await;

    let outcome = h.orchestrator.checkout(h.request(&user, "pm_card")).await;

    assert_eq!(outcome.status, CheckoutStatus::Error);
    let Some(WorkflowState::Failed { step, compensation }) = outcome.final_state() else {
        panic!("expected Failed");
    };
    assert_eq!(*step, FailureStep::Timeout);
    assert!(matches!(compensation, Compensation::Refunded { .. }));
    assert_eq!(h.gateway.refund_calls().await, 1);
    assert_eq!(h.queue.published_count().await, 0);

    let items = h
        .reconciliation
        .open_items_of_kind(ReconciliationKind::EnqueueOutcomeUnknown)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].checkout_attempt_id, outcome.checkout_attempt_id);
    let intent = h
        .gateway
        .intent_for(outcome.checkout_attempt_id)
        .await
        .unwrap();
    assert_eq!(items[0].payment_id.as_deref(), Some(intent.gateway_id.as_str()));
    assert!(items[0].detail.contains("Refunded"));
}

#[tokio::test]
async fn poison_message_is_dead_lettered_then_redriven() {
    let h = TestHarness::with(
        fast_config(),
        QueueConfig {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 3,
        },
    );
    h.store.seed_product("p1", Money::from_cents(1000), 5).await;
    let message = message_for("p1", 1, Money::from_cents(1000));
    let message_id = h.queue.publish(&message).await.unwrap();

    let pool = ConsumerPool::new(
        h.queue.clone(),
        Arc::clone(&h.materializer),
        ConsumerConfig::default(),
    );

    h.store.fail_next_order_writes(100).await;
    for _ in 0..4 {
        pool.poll_once().await.unwrap();
    }

    let letters = h.queue.dead_letters().await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message_id, message_id);
    assert_eq!(letters[0].receive_count, 3);
    assert_eq!(h.store.order_count().await, 0);

    h.store.fail_next_order_writes(0).await;
    h.queue.redrive(message_id).await.unwrap();
    let stats = pool.poll_once().await.unwrap();
    assert_eq!(stats.acked, 1);
    assert_eq!(h.store.order_count().await, 1);
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}
