use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::inventory_item::{self, InventoryStatus};
use crate::entities::{listing_item, order, restock_notification};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::{INVENTORY_ALLOCATIONS, INVENTORY_ALLOCATION_RETRIES, INVENTORY_OUT_OF_STOCK};

/// Advisory stock level for a listing item. Never reserves anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub listing_item_id: Uuid,
    pub available: u64,
    pub restock_notified: bool,
}

/// What the winning buyer may see about their unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedUnit {
    pub inventory_item_id: Uuid,
    pub serial_number: String,
    pub secret_code: String,
    pub sold_at: Option<DateTime<Utc>>,
}

/// Counts available units for a listing item.
pub async fn available_count<C: ConnectionTrait>(
    conn: &C,
    listing_item_id: Uuid,
) -> Result<u64, ServiceError> {
    Ok(inventory_item::Entity::find()
        .filter(inventory_item::Column::ListingItemId.eq(listing_item_id))
        .filter(inventory_item::Column::Status.eq(InventoryStatus::Available))
        .count(conn)
        .await?)
}

/// The oldest available unit of a listing item as of this read. Another
/// buyer may still take it before the caller claims it.
pub async fn next_available<C: ConnectionTrait>(
    conn: &C,
    listing_item_id: Uuid,
) -> Result<Option<inventory_item::Model>, ServiceError> {
    Ok(inventory_item::Entity::find()
        .filter(inventory_item::Column::ListingItemId.eq(listing_item_id))
        .filter(inventory_item::Column::Status.eq(InventoryStatus::Available))
        .order_by_asc(inventory_item::Column::CreatedAt)
        .one(conn)
        .await?)
}

/// Marks `unit_id` sold to `order_id` with `UPDATE ... WHERE id = ? AND
/// status = 'available'`. Returns `false` when the unit was no longer
/// available, whatever the caller read earlier.
pub async fn claim_unit<C: ConnectionTrait>(
    conn: &C,
    unit_id: Uuid,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let result = inventory_item::Entity::update_many()
        .col_expr(
            inventory_item::Column::Status,
            Expr::value(InventoryStatus::Sold),
        )
        .col_expr(inventory_item::Column::OrderId, Expr::value(order_id))
        .col_expr(inventory_item::Column::SoldAt, Expr::value(now))
        .filter(inventory_item::Column::Id.eq(unit_id))
        .filter(inventory_item::Column::Status.eq(InventoryStatus::Available))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Marks one available unit sold to `order_id` inside the caller's
/// transaction.
///
/// The candidate read is only a hint; [`claim_unit`] decides. Losing the
/// claim while stock remains retries up to `retry_limit` times.
pub async fn allocate<C: ConnectionTrait>(
    conn: &C,
    listing_item_id: Uuid,
    order_id: Uuid,
    retry_limit: u32,
    now: DateTime<Utc>,
) -> Result<inventory_item::Model, ServiceError> {
    if let Some(existing) = unit_for_order(conn, order_id).await? {
        debug!(order_id = %order_id, "Order already holds a unit");
        return Ok(existing);
    }

    let attempts = retry_limit.max(1);
    for attempt in 1..=attempts {
        let Some(candidate) = next_available(conn, listing_item_id).await? else {
            INVENTORY_OUT_OF_STOCK.inc();
            return Err(ServiceError::OutOfStock(listing_item_id));
        };

        if claim_unit(conn, candidate.id, order_id, now).await? {
            let unit = unit_for_order(conn, order_id).await?.ok_or_else(|| {
                ServiceError::InternalError("allocated unit vanished".to_string())
            })?;
            INVENTORY_ALLOCATIONS.inc();
            return Ok(unit);
        }

        INVENTORY_ALLOCATION_RETRIES.inc();
        debug!(
            listing_item_id = %listing_item_id,
            attempt = attempt,
            "Allocation lost a race with stock remaining, retrying"
        );
    }

    warn!(
        listing_item_id = %listing_item_id,
        order_id = %order_id,
        attempts = attempts,
        "Allocation gave up under contention"
    );
    Err(ServiceError::StateConflict(format!(
        "could not allocate a unit of listing item {listing_item_id} after {attempts} attempts"
    )))
}

pub async fn unit_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<inventory_item::Model>, ServiceError> {
    Ok(inventory_item::Entity::find()
        .filter(inventory_item::Column::OrderId.eq(order_id))
        .one(conn)
        .await?)
}

/// Claims the restock notification slot for a listing item. Returns `true`
/// for the one caller per cooldown window that should notify the provider.
pub async fn claim_restock_notification<C: ConnectionTrait>(
    conn: &C,
    listing_item_id: Uuid,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let inserted = restock_notification::Entity::insert(restock_notification::ActiveModel {
        listing_item_id: Set(listing_item_id),
        last_notified_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(restock_notification::Column::ListingItemId)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await;

    match inserted {
        Ok(rows) if rows > 0 => return Ok(true),
        Ok(_) | Err(DbErr::RecordNotInserted) => {}
        Err(e) => return Err(e.into()),
    }

    let result = restock_notification::Entity::update_many()
        .col_expr(
            restock_notification::Column::LastNotifiedAt,
            Expr::value(now),
        )
        .filter(restock_notification::Column::ListingItemId.eq(listing_item_id))
        .filter(restock_notification::Column::LastNotifiedAt.lte(now - cooldown))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Serialized inventory: advisory availability, reveal of allocated units and
/// the allocation settings used by checkout.
#[derive(Clone)]
pub struct InventoryAllocator {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    retry_limit: u32,
    restock_threshold: u64,
    restock_cooldown: Duration,
}

impl InventoryAllocator {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        retry_limit: u32,
        restock_threshold: u64,
        restock_cooldown: Duration,
    ) -> Self {
        Self {
            db,
            event_sender,
            retry_limit,
            restock_threshold,
            restock_cooldown,
        }
    }

    pub fn from_config(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            db,
            event_sender,
            config.allocation_retry_limit,
            config.restock_threshold,
            Duration::hours(config.restock_cooldown_hours),
        )
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Read-only stock count. At or below the restock threshold the provider
    /// is notified, at most once per cooldown window.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        listing_item_id: Uuid,
    ) -> Result<Availability, ServiceError> {
        let listing = listing_item::Entity::find_by_id(listing_item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing item {listing_item_id}")))?;

        let available = available_count(&*self.db, listing_item_id).await?;

        let mut restock_notified = false;
        if listing.serialized && available <= self.restock_threshold {
            restock_notified = claim_restock_notification(
                &*self.db,
                listing_item_id,
                self.restock_cooldown,
                Utc::now(),
            )
            .await?;

            if restock_notified {
                info!(
                    listing_item_id = %listing_item_id,
                    available = available,
                    "Low stock, notifying provider"
                );
                self.event_sender
                    .send_or_log(Event::RestockNotificationRequested {
                        listing_item_id,
                        provider_id: listing.provider_id,
                        available,
                    })
                    .await;
            }
        }

        Ok(Availability {
            listing_item_id,
            available,
            restock_notified,
        })
    }

    /// Standalone allocation in its own transaction.
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        listing_item_id: Uuid,
        order_id: Uuid,
    ) -> Result<inventory_item::Model, ServiceError> {
        let txn = crate::db::begin(&self.db).await?;
        let unit = match allocate(&txn, listing_item_id, order_id, self.retry_limit, Utc::now()).await
        {
            Ok(unit) => unit,
            Err(ServiceError::OutOfStock(id)) => {
                drop(txn);
                self.event_sender
                    .send_or_log(Event::OutOfStock {
                        listing_item_id: id,
                        order_id,
                    })
                    .await;
                return Err(ServiceError::OutOfStock(id));
            }
            Err(e) => return Err(e),
        };
        txn.commit().await?;

        info!(
            listing_item_id = %listing_item_id,
            inventory_item_id = %unit.id,
            order_id = %order_id,
            "Unit allocated"
        );
        self.event_sender
            .send_or_log(Event::InventoryAllocated {
                listing_item_id,
                inventory_item_id: unit.id,
                order_id,
            })
            .await;

        Ok(unit)
    }

    /// Returns the serial and secret of the unit sold to `order_id`. Only that
    /// order's buyer may see it.
    #[instrument(skip(self))]
    pub async fn reveal_for_order(
        &self,
        order_id: Uuid,
        caller_id: Uuid,
    ) -> Result<RevealedUnit, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))?;

        if order.buyer_id != caller_id {
            return Err(ServiceError::Forbidden(
                "only the buyer may view this unit's code".to_string(),
            ));
        }

        let unit = unit_for_order(&*self.db, order_id)
            .await?
            .filter(|u| u.status == InventoryStatus::Sold)
            .ok_or_else(|| ServiceError::NotFound(format!("No unit allocated to order {order_id}")))?;

        Ok(RevealedUnit {
            inventory_item_id: unit.id,
            serial_number: unit.serial_number,
            secret_code: unit.secret_code,
            sold_at: unit.sold_at,
        })
    }
}
