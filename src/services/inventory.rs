use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::magazine::{self, Entity as MagazineEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Manages `magazines.available_quantity`, the one piece of shared mutable
/// state touched by concurrent checkouts. All mutation goes through single
/// conditional UPDATE statements so the datastore arbitrates races.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn get_magazine(
        &self,
        magazine_id: Uuid,
    ) -> Result<Option<magazine::Model>, ServiceError> {
        let found = MagazineEntity::find_by_id(magazine_id)
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Atomically reserves `quantity` units: a compare-and-decrement that
    /// fails with `InsufficientInventory` instead of going negative.
    #[instrument(skip(self), fields(magazine_id = %magazine_id, quantity = quantity))]
    pub async fn reserve(
        &self,
        magazine_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidCartItem(format!(
                "Quantity must be positive, got {}",
                quantity
            )));
        }

        let result = MagazineEntity::update_many()
            .col_expr(
                magazine::Column::AvailableQuantity,
                Expr::col(magazine::Column::AvailableQuantity).sub(quantity),
            )
            .col_expr(magazine::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(magazine::Column::Id.eq(magazine_id))
            .filter(magazine::Column::AvailableQuantity.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // Either the magazine is unknown or the guard rejected the decrement
            let magazine = self.get_magazine(magazine_id).await?.ok_or_else(|| {
                ServiceError::InvalidCartItem(format!("Unknown magazine {}", magazine_id))
            })?;
            return Err(ServiceError::InsufficientInventory {
                magazine_id,
                requested: quantity,
                available: magazine.available_quantity,
            });
        }

        info!(magazine_id = %magazine_id, quantity, "Inventory reserved");
        if let Err(e) = self
            .event_sender
            .send(Event::InventoryReserved {
                magazine_id,
                quantity,
                order_id,
            })
            .await
        {
            warn!(error = %e, magazine_id = %magazine_id, "Failed to emit reservation event");
        }

        Ok(())
    }

    /// Returns previously reserved units to the magazine. Unconditional
    /// increment; used by cancellation and by checkout rollback.
    #[instrument(skip(self), fields(magazine_id = %magazine_id, quantity = quantity))]
    pub async fn release(
        &self,
        magazine_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidCartItem(format!(
                "Quantity must be positive, got {}",
                quantity
            )));
        }

        let result = MagazineEntity::update_many()
            .col_expr(
                magazine::Column::AvailableQuantity,
                Expr::col(magazine::Column::AvailableQuantity).add(quantity),
            )
            .col_expr(magazine::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(magazine::Column::Id.eq(magazine_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Magazine {} not found",
                magazine_id
            )));
        }

        info!(magazine_id = %magazine_id, quantity, "Inventory released");
        if let Err(e) = self
            .event_sender
            .send(Event::InventoryReleased {
                magazine_id,
                quantity,
                order_id,
            })
            .await
        {
            warn!(error = %e, magazine_id = %magazine_id, "Failed to emit release event");
        }

        Ok(())
    }
}
