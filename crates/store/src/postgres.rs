use async_trait::async_trait;
use common::{CheckoutAttemptId, OrderId, UserId};
use domain::{
    Cart, CartItem, Money, Order, OrderItem, OrderStatus, ProductId, ReconciliationId,
    ReconciliationItem, ReconciliationKind, ShippingAddress,
};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        CartStore, CatalogItem, CatalogStore, CreateOrderOutcome, DecrementOutcome,
        IdempotencyRecord, InventoryStore, OrderStore, ReconciliationStore, validate_transition,
    },
};

const ORDER_COLUMNS: &str = "order_id, checkout_attempt_id, user_id, items, total_cents, \
     payment_id, shipping_address, status, created_at, updated_at";

const RECONCILIATION_COLUMNS: &str = "item_id, kind, checkout_attempt_id, order_id, payment_id, \
     detail, raised_at, resolved_at, resolution";

/// PostgreSQL-backed implementation of every store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a product with its price and stock.
    pub async fn upsert_product(&self, product_id: &ProductId, price: Money, stock: u32) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (product_id, price_cents) VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET price_cents = EXCLUDED.price_cents
            "#,
        )
        .bind(product_id.as_str())
        .bind(price.cents())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, stock) VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET stock = EXCLUDED.stock
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(stock))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
        let Json(items): Json<Vec<OrderItem>> = row.try_get("items")?;
        let Json(shipping_address): Json<ShippingAddress> = row.try_get("shipping_address")?;

        Ok(Order {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            checkout_attempt_id: CheckoutAttemptId::from_uuid(
                row.try_get::<Uuid, _>("checkout_attempt_id")?,
            ),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            items,
            total_amount: Money::from_cents(row.try_get("total_cents")?),
            payment_id: row.try_get("payment_id")?,
            shipping_address,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<ReconciliationItem> {
        let kind: String = row.try_get("kind")?;
        let kind = kind
            .parse::<ReconciliationKind>()
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(ReconciliationItem {
            item_id: ReconciliationId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
            kind,
            checkout_attempt_id: CheckoutAttemptId::from_uuid(
                row.try_get::<Uuid, _>("checkout_attempt_id")?,
            ),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            payment_id: row.try_get("payment_id")?,
            detail: row.try_get("detail")?,
            raised_at: row.try_get("raised_at")?,
            resolved_at: row.try_get("resolved_at")?,
            resolution: row.try_get("resolution")?,
        })
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        Ok(IdempotencyRecord {
            checkout_attempt_id: CheckoutAttemptId::from_uuid(
                row.try_get::<Uuid, _>("checkout_attempt_id")?,
            ),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            completed: row.try_get("completed")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_outcome(row: &PgRow, quantity: u32) -> Result<DecrementOutcome> {
        let decremented: Option<bool> = row.try_get("decremented")?;
        let stock_after: Option<i64> = row.try_get("stock_after")?;

        match (decremented, stock_after) {
            (Some(true), Some(remaining)) => Ok(DecrementOutcome::Decremented {
                remaining: to_u32(remaining)?,
            }),
            (Some(false), Some(available)) => Ok(DecrementOutcome::Insufficient {
                requested: quantity,
                available: to_u32(available)?,
            }),
            _ => Err(StoreError::Unavailable(
                "inventory ledger entry has no recorded outcome".to_string(),
            )),
        }
    }
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[async_trait]
impl CatalogStore for PostgresStore {
    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn get_item(&self, product_id: &ProductId) -> Result<Option<CatalogItem>> {
        let row = sqlx::query(
            r#"
            SELECT p.price_cents, COALESCE(i.stock, 0) AS stock
            FROM products p
            LEFT JOIN inventory i ON i.product_id = p.product_id
            WHERE p.product_id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(CatalogItem {
                product_id: product_id.clone(),
                price: Money::from_cents(row.try_get("price_cents")?),
                stock: to_u32(row.try_get("stock")?)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_cart(&self, user_id: &UserId) -> Result<Option<Cart>> {
        let row = sqlx::query("SELECT items, updated_at FROM carts WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let Json(items): Json<Vec<CartItem>> = row.try_get("items")?;
            Ok(Cart {
                user_id: user_id.clone(),
                items,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn put_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, items, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET items = EXCLUDED.items, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.user_id.as_str())
        .bind(Json(&cart.items))
        .bind(cart.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_cart(&self, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn get_stock(&self, product_id: &ProductId) -> Result<Option<u32>> {
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM inventory WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        stock.map(to_u32).transpose()
    }

    async fn set_stock(&self, product_id: &ProductId, stock: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, stock) VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE SET stock = EXCLUDED.stock
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(stock))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(product_id = %product_id))]
    async fn decrement_for_order(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<DecrementOutcome> {
        let mut tx = self.pool.begin().await?;

        // Claim the ledger slot; a concurrent replay blocks here until we commit
        let claimed = sqlx::query(
            r#"
            INSERT INTO inventory_ledger (order_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id, product_id) DO NOTHING
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            let row = sqlx::query(
                r#"
                SELECT decremented, stock_after FROM inventory_ledger
                WHERE order_id = $1 AND product_id = $2
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(product_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;

            tracing::debug!(%order_id, "Inventory decrement already recorded");
            return Self::row_to_outcome(&row, quantity);
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE inventory SET stock = stock - $2
            WHERE product_id = $1 AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match remaining {
            Some(remaining) => DecrementOutcome::Decremented {
                remaining: to_u32(remaining)?,
            },
            None => {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT stock FROM inventory WHERE product_id = $1")
                        .bind(product_id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                DecrementOutcome::Insufficient {
                    requested: quantity,
                    available: to_u32(available.unwrap_or(0))?,
                }
            }
        };

        let (decremented, stock_after) = match outcome {
            DecrementOutcome::Decremented { remaining } => (true, remaining),
            DecrementOutcome::Insufficient { available, .. } => (false, available),
        };

        sqlx::query(
            r#"
            UPDATE inventory_ledger SET decremented = $3, stock_after = $4
            WHERE order_id = $1 AND product_id = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_str())
        .bind(decremented)
        .bind(i64::from(stock_after))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[tracing::instrument(skip(self, order), fields(checkout_attempt_id = %order.checkout_attempt_id))]
    async fn create_order_once(&self, order: &Order) -> Result<CreateOrderOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (order_id, checkout_attempt_id, user_id, items, total_cents,
                                payment_id, shipping_address, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (checkout_attempt_id) DO NOTHING
            "#,
        )
        .bind(order.order_id.as_uuid())
        .bind(order.checkout_attempt_id.as_uuid())
        .bind(order.user_id.as_str())
        .bind(Json(&order.items))
        .bind(order.total_amount.cents())
        .bind(&order.payment_id)
        .bind(Json(&order.shipping_address))
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            sqlx::query(
                r#"
                INSERT INTO idempotency_records (checkout_attempt_id, order_id, completed, created_at)
                VALUES ($1, $2, FALSE, NOW())
                "#,
            )
            .bind(order.checkout_attempt_id.as_uuid())
            .bind(order.order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(CreateOrderOutcome::Created(order.clone()));
        }

        tx.rollback().await?;

        let record_row = sqlx::query(
            r#"
            SELECT checkout_attempt_id, order_id, completed, created_at
            FROM idempotency_records WHERE checkout_attempt_id = $1
            "#,
        )
        .bind(order.checkout_attempt_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        let record = Self::row_to_record(record_row)?;

        let existing = self
            .get_order(record.order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "Order",
                id: record.order_id.to_string(),
            })?;

        Ok(CreateOrderOutcome::Existing {
            record,
            order: existing,
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_checkout_attempt(
        &self,
        checkout_attempt_id: CheckoutAttemptId,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE checkout_attempt_id = $1"
        ))
        .bind(checkout_attempt_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        validate_transition(expected, next)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE orders SET status = $3, updated_at = NOW()
            WHERE order_id = $1 AND status = $2
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_order(row);
        }

        match self.get_order(order_id).await? {
            Some(current) => Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual: current.status,
            }),
            None => Err(StoreError::NotFound {
                entity: "Order",
                id: order_id.to_string(),
            }),
        }
    }

    async fn mark_completed(&self, checkout_attempt_id: CheckoutAttemptId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET completed = TRUE WHERE checkout_attempt_id = $1",
        )
        .bind(checkout_attempt_id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "IdempotencyRecord",
                id: checkout_attempt_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl ReconciliationStore for PostgresStore {
    #[tracing::instrument(skip(self, item), fields(kind = %item.kind, checkout_attempt_id = %item.checkout_attempt_id))]
    async fn raise_item(&self, item: &ReconciliationItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reconciliation_items (item_id, kind, checkout_attempt_id, order_id,
                                              payment_id, detail, raised_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (kind, checkout_attempt_id) DO NOTHING
            "#,
        )
        .bind(item.item_id.as_uuid())
        .bind(item.kind.as_str())
        .bind(item.checkout_attempt_id.as_uuid())
        .bind(item.order_id.map(|id| id.as_uuid()))
        .bind(item.payment_id.as_deref())
        .bind(&item.detail)
        .bind(item.raised_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_items(&self, open_only: bool) -> Result<Vec<ReconciliationItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECONCILIATION_COLUMNS} FROM reconciliation_items
            WHERE NOT $1 OR resolved_at IS NULL
            ORDER BY raised_at ASC
            "#
        ))
        .bind(open_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_item(
        &self,
        item_id: ReconciliationId,
        resolution: &str,
    ) -> Result<ReconciliationItem> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE reconciliation_items SET resolved_at = NOW(), resolution = $2
            WHERE item_id = $1 AND resolved_at IS NULL
            RETURNING {RECONCILIATION_COLUMNS}
            "#
        ))
        .bind(item_id.as_uuid())
        .bind(resolution)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_item(row);
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reconciliation_items WHERE item_id = $1)",
        )
        .bind(item_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Err(StoreError::AlreadyResolved(item_id))
        } else {
            Err(StoreError::NotFound {
                entity: "ReconciliationItem",
                id: item_id.to_string(),
            })
        }
    }
}
