use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::errors::ServiceError;

/// Input line for order creation. `unit_price` is the caller's snapshot of
/// the magazine price; the repository never re-reads the catalog.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub magazine_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Persistence boundary for orders and their items. Writes are atomic with
/// respect to the item collection, and status updates use optimistic
/// concurrency on the expected current status.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a pending order together with all of its items in a single
    /// transaction. Items are never partially persisted.
    #[instrument(skip(self, items), fields(retailer_id = %retailer_id, item_count = items.len()))]
    pub async fn create_order(
        &self,
        retailer_id: Uuid,
        currency: &str,
        items: Vec<NewOrderItem>,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidCartItem(
                "Order must contain at least one item".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let mut line_models = Vec::with_capacity(items.len());
        let mut total = Decimal::ZERO;
        for item in &items {
            if item.quantity <= 0 {
                return Err(ServiceError::InvalidCartItem(format!(
                    "Quantity for magazine {} must be positive",
                    item.magazine_id
                )));
            }
            let line_total = item.unit_price * Decimal::from(item.quantity);
            total += line_total;
            line_models.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                magazine_id: Set(item.magazine_id),
                title: Set(item.title.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(line_total),
                created_at: Set(now),
            });
        }

        let txn = self.db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            retailer_id: Set(retailer_id),
            status: Set(OrderStatus::Pending),
            total_amount: Set(total),
            currency: Set(currency.to_string()),
            payment_session_id: Set(None),
            payment_intent_id: Set(None),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        let mut inserted_items = Vec::with_capacity(line_models.len());
        for line in line_models {
            inserted_items.push(line.insert(&txn).await?);
        }

        txn.commit().await?;

        info!(order_id = %order_id, total = %total, "Order created");
        Ok((order_model, inserted_items))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(order) = self.get_order(order_id).await? else {
            return Ok(None);
        };
        let items = self.get_items(order_id).await?;
        Ok(Some((order, items)))
    }

    #[instrument(skip(self))]
    pub async fn get_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    #[instrument(skip(self))]
    pub async fn find_by_retailer(
        &self,
        retailer_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::RetailerId.eq(retailer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    /// Looks up the order referencing a gateway checkout session; used by
    /// webhook delivery.
    #[instrument(skip(self))]
    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::PaymentSessionId.eq(session_id))
            .one(&*self.db)
            .await?;
        Ok(order)
    }

    /// Pending orders older than `cutoff`, candidates for the abandonment
    /// sweep.
    #[instrument(skip(self))]
    pub async fn find_expired_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;
        Ok(orders)
    }

    /// Attaches the gateway session reference to a still-pending order.
    #[instrument(skip(self))]
    pub async fn set_payment_session(
        &self,
        order_id: Uuid,
        session_id: &str,
        payment_intent_id: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let mut update = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentSessionId,
                Expr::value(Some(session_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending));

        if let Some(intent) = payment_intent_id {
            update = update.col_expr(
                order::Column::PaymentIntentId,
                Expr::value(Some(intent.to_string())),
            );
        }

        let result = update.exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return self.stale_or_missing(order_id, OrderStatus::Pending).await;
        }

        self.require_order(order_id).await
    }

    /// Records the captured payment intent reported by the gateway.
    #[instrument(skip(self))]
    pub async fn record_payment_intent(
        &self,
        order_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentIntentId,
                Expr::value(Some(payment_intent_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::OrderNotFound(order_id));
        }
        Ok(())
    }

    /// Compare-and-swap status update. The caller names the status it read;
    /// if another writer got there first the swap fails with
    /// `StaleOrderState` and no row changes.
    #[instrument(skip(self), fields(order_id = %order_id, expected = %expected, target = %target))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        target: OrderStatus,
        cancellation_reason: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(expected));

        if let Some(reason) = cancellation_reason {
            update = update.col_expr(
                order::Column::CancellationReason,
                Expr::value(Some(reason.to_string())),
            );
        }

        let result = update.exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return self.stale_or_missing(order_id, expected).await;
        }

        info!(order_id = %order_id, from = %expected, to = %target, "Order status updated");
        self.require_order(order_id).await
    }

    async fn require_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.get_order(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))
    }

    async fn stale_or_missing(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        match self.get_order(order_id).await? {
            Some(_) => {
                error!(order_id = %order_id, expected = %expected, "Optimistic status update lost the race");
                Err(ServiceError::StaleOrderState {
                    order_id,
                    expected: expected.to_string(),
                })
            }
            None => Err(ServiceError::OrderNotFound(order_id)),
        }
    }
}
