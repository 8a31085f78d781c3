//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{CheckoutAttemptId, OrderId, UserId};
use domain::{
    Cart, CartItem, Money, Order, OrderItem, OrderMessage, OrderStatus, ProductId,
    ReconciliationId, ReconciliationItem, ReconciliationKind, ShippingAddress,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartStore, CatalogStore, CreateOrderOutcome, DecrementOutcome, InventoryStore, OrderStore,
    PostgresStore, ReconciliationStore, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE idempotency_records, orders, inventory_ledger, carts, inventory, products, \
         reconciliation_items",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn test_order(checkout_attempt_id: CheckoutAttemptId) -> Order {
    Order::from_message(&OrderMessage {
        checkout_attempt_id,
        user_id: UserId::new("u1"),
        items: vec![OrderItem::new("p1", 2, Money::from_cents(1000))],
        payment_id: "pi_1".to_string(),
        total_amount: Money::from_cents(2000),
        shipping_address: ShippingAddress {
            recipient: "Ada".to_string(),
            line1: "1 Main St".to_string(),
            line2: Some("Apt 2".to_string()),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: "US".to_string(),
        },
        created_at: Utc::now(),
    })
}

#[tokio::test]
#[serial]
async fn catalog_item_joins_price_and_stock() {
    let store = get_test_store().await;
    let p1 = ProductId::new("p1");
    store
        .upsert_product(&p1, Money::from_cents(1250), 7)
        .await
        .unwrap();

    let item = store.get_item(&p1).await.unwrap().unwrap();
    assert_eq!(item.price, Money::from_cents(1250));
    assert_eq!(item.stock, 7);

    assert!(
        store
            .get_item(&ProductId::new("missing"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn cart_round_trips_and_deletes() {
    let store = get_test_store().await;
    let user = UserId::new("u1");
    let cart = Cart::with_items(
        user.clone(),
        vec![
            CartItem::new("p1", 2, Money::from_cents(1000)),
            CartItem::new("p2", 1, Money::from_cents(500)),
        ],
    )
    .unwrap();

    store.put_cart(&cart).await.unwrap();
    let loaded = store.get_cart(&user).await.unwrap().unwrap();
    assert_eq!(loaded.items, cart.items);

    assert!(store.delete_cart(&user).await.unwrap());
    assert!(!store.delete_cart(&user).await.unwrap());
}

#[tokio::test]
#[serial]
async fn create_order_once_is_atomic_and_deduplicated() {
    let store = get_test_store().await;
    let attempt = CheckoutAttemptId::new();
    let first = test_order(attempt);

    let created = store.create_order_once(&first).await.unwrap();
    assert!(matches!(created, CreateOrderOutcome::Created(_)));

    let second = test_order(attempt);
    match store.create_order_once(&second).await.unwrap() {
        CreateOrderOutcome::Existing { record, order } => {
            assert_eq!(record.order_id, first.order_id);
            assert!(!record.completed);
            assert_eq!(order.shipping_address, first.shipping_address);
            assert_eq!(order.items, first.items);
        }
        other => panic!("expected Existing, got {other:?}"),
    }

    assert!(store.get_order(second.order_id).await.unwrap().is_none());

    store.mark_completed(attempt).await.unwrap();
    match store.create_order_once(&second).await.unwrap() {
        CreateOrderOutcome::Existing { record, .. } => assert!(record.completed),
        other => panic!("expected Existing, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn concurrent_create_order_once_creates_one_order() {
    let store = get_test_store().await;
    let attempt = CheckoutAttemptId::new();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create_order_once(&test_order(attempt)).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if let CreateOrderOutcome::Created(_) = handle.await.unwrap().unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn concurrent_decrements_never_oversell() {
    let store = get_test_store().await;
    let p1 = ProductId::new("p1");
    store.set_stock(&p1, 5).await.unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            let p1 = p1.clone();
            tokio::spawn(async move { store.decrement_for_order(OrderId::new(), &p1, 1).await })
        })
        .collect();

    let mut decremented = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_decremented() {
            decremented += 1;
        }
    }

    assert_eq!(decremented, 5);
    assert_eq!(store.get_stock(&p1).await.unwrap(), Some(0));
}

#[tokio::test]
#[serial]
async fn decrement_replay_uses_ledger() {
    let store = get_test_store().await;
    let p1 = ProductId::new("p1");
    store.set_stock(&p1, 3).await.unwrap();
    let order_id = OrderId::new();

    let first = store.decrement_for_order(order_id, &p1, 2).await.unwrap();
    let replay = store.decrement_for_order(order_id, &p1, 2).await.unwrap();
    assert_eq!(first, DecrementOutcome::Decremented { remaining: 1 });
    assert_eq!(replay, first);

    let short_order = OrderId::new();
    let short = store.decrement_for_order(short_order, &p1, 2).await.unwrap();
    assert_eq!(
        short,
        DecrementOutcome::Insufficient {
            requested: 2,
            available: 1
        }
    );

    // Restocking does not change the recorded outcome of an earlier attempt
    store.set_stock(&p1, 10).await.unwrap();
    let short_replay = store.decrement_for_order(short_order, &p1, 2).await.unwrap();
    assert_eq!(short_replay, short);
    assert_eq!(store.get_stock(&p1).await.unwrap(), Some(10));
}

#[tokio::test]
#[serial]
async fn update_status_is_conditional() {
    let store = get_test_store().await;
    let order = test_order(CheckoutAttemptId::new());
    store.create_order_once(&order).await.unwrap();

    let updated = store
        .update_status(order.order_id, OrderStatus::Processing, OrderStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Shipped);

    let conflict = store
        .update_status(
            order.order_id,
            OrderStatus::Processing,
            OrderStatus::Cancelled,
        )
        .await;
    assert!(matches!(
        conflict,
        Err(StoreError::StatusConflict {
            actual: OrderStatus::Shipped,
            ..
        })
    ));

    let shipped = store.list_by_status(OrderStatus::Shipped).await.unwrap();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].order_id, order.order_id);
}

#[tokio::test]
#[serial]
async fn missing_order_and_record_are_not_found() {
    let store = get_test_store().await;

    let result = store
        .update_status(OrderId::new(), OrderStatus::Processing, OrderStatus::Shipped)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));

    let result = store.mark_completed(CheckoutAttemptId::new()).await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
#[serial]
async fn reconciliation_items_persist_across_pools_until_resolved() {
    let store = get_test_store().await;
    let attempt = CheckoutAttemptId::new();
    let order_id = OrderId::new();
    let item = ReconciliationItem::new(
        ReconciliationKind::PartiallyFailedOrder,
        attempt,
        "p1: requested 2, available 0",
    )
    .with_order(order_id)
    .with_payment("pi_1");

    assert!(store.raise_item(&item).await.unwrap());
    assert!(
        !store
            .raise_item(&ReconciliationItem::new(
                ReconciliationKind::PartiallyFailedOrder,
                attempt,
                "redelivered"
            ))
            .await
            .unwrap()
    );

    // A second pool stands in for a restarted process
    let info = get_container_info().await;
    let restarted = PostgresStore::new(PgPool::connect(&info.connection_string).await.unwrap());
    let open = restarted.list_items(true).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].item_id, item.item_id);
    assert_eq!(open[0].order_id, Some(order_id));
    assert_eq!(open[0].payment_id.as_deref(), Some("pi_1"));
    assert_eq!(open[0].detail, "p1: requested 2, available 0");

    let resolved = restarted
        .resolve_item(item.item_id, "restocked and shipped")
        .await
        .unwrap();
    assert!(!resolved.is_open());
    assert_eq!(resolved.resolution.as_deref(), Some("restocked and shipped"));

    assert!(store.list_items(true).await.unwrap().is_empty());
    assert_eq!(store.list_items(false).await.unwrap().len(), 1);
    assert!(matches!(
        store.resolve_item(item.item_id, "again").await,
        Err(StoreError::AlreadyResolved(_))
    ));
    assert!(matches!(
        store.resolve_item(ReconciliationId::new(), "missing").await,
        Err(StoreError::NotFound { .. })
    ));
}
