use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveEnum, ActiveModelTrait, EntityTrait, Set};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::commands::Command;
use crate::db::DbPool;
use crate::entities::listing_item::{self, ListingKind};
use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics::ORDERS_CREATED;
use crate::services::inventory_allocator::available_count;
use crate::services::pricing::{PricingEngine, PurchaseTerms};

/// Places an order for one listing item under the given purchase terms.
#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub buyer_id: Uuid,
    pub listing_item_id: Uuid,
    pub terms: PurchaseTerms,
    pub pricing: PricingEngine,
}

#[async_trait]
impl Command for CreateOrderCommand {
    type Result = order::Model;

    #[instrument(skip(self, db_pool, event_sender), fields(listing_item_id = %self.listing_item_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let db = db_pool.as_ref();

        let listing = listing_item::Entity::find_by_id(self.listing_item_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Listing item {}", self.listing_item_id))
            })?;

        self.check_terms(&listing)?;

        if listing.serialized && available_count(db, listing.id).await? == 0 {
            warn!(listing_item_id = %listing.id, "Order refused, no units available");
            return Err(ServiceError::OutOfStock(listing.id));
        }

        let now = Utc::now();
        let units = self.terms.units()?;
        let base = self.terms.base_amount_cents(listing.unit_price_cents)?;
        let deposit = listing.deposit_cents.filter(|d| *d > 0);

        let (status, breakdown) = match base {
            None => (OrderStatus::PendingQuote, None),
            Some(base) => {
                let breakdown = self.pricing.quote(
                    base,
                    listing.service_call_fee_cents.unwrap_or(0),
                    0,
                    deposit,
                    Some(&listing.currency),
                )?;
                let status = if listing.kind == ListingKind::Rental && deposit.is_some() {
                    OrderStatus::PendingDeposit
                } else {
                    OrderStatus::PendingPayment
                };
                (status, Some(breakdown))
            }
        };

        let (rental_start, rental_end) = match self.terms.rental_window() {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None, None),
        };

        let model = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            buyer_id: Set(self.buyer_id),
            provider_id: Set(listing.provider_id),
            master_id: Set(listing.master_id),
            listing_item_id: Set(listing.id),
            status: Set(status),
            listing_kind: Set(listing.kind),
            pricing_model: Set(listing.pricing_model),
            units: Set(units),
            base_amount_cents: Set(breakdown.as_ref().map_or(0, |b| b.base_amount_cents)),
            discount_cents: Set(0),
            platform_fee_cents: Set(breakdown.as_ref().map_or(0, |b| b.platform_fee_cents)),
            tax_cents: Set(breakdown.as_ref().map_or(0, |b| b.tax_cents)),
            service_call_fee_cents: Set(breakdown
                .as_ref()
                .map_or(0, |b| b.service_call_fee_cents)),
            deposit_cents: Set(breakdown.as_ref().and_then(|b| b.deposit_cents)),
            total_cents: Set(breakdown.as_ref().map_or(0, |b| b.total_cents)),
            currency: Set(listing.currency.to_ascii_uppercase()),
            deposit_deduction_cents: Set(None),
            rental_start_date: Set(rental_start),
            rental_end_date: Set(rental_end),
            snapshot_title: Set(listing.title.clone()),
            snapshot_item_name: Set(listing.item_name.clone()),
            snapshot_image_url: Set(listing.image_url.clone()),
            paid_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(db).await?;

        ORDERS_CREATED
            .with_label_values(&[status.to_value().as_str()])
            .inc();
        info!(
            order_id = %created.id,
            buyer_id = %created.buyer_id,
            status = ?created.status,
            total_cents = created.total_cents,
            "Order created"
        );
        event_sender.send_or_log(Event::OrderCreated(created.id)).await;

        Ok(created)
    }
}

impl CreateOrderCommand {
    fn check_terms(&self, listing: &listing_item::Model) -> Result<(), ServiceError> {
        if listing.provider_id == self.buyer_id {
            return Err(ServiceError::ValidationError(
                "providers cannot order their own listing".to_string(),
            ));
        }

        if self.terms.pricing_model() != listing.pricing_model {
            return Err(ServiceError::ValidationError(format!(
                "listing is priced {:?}, terms were {:?}",
                listing.pricing_model,
                self.terms.pricing_model()
            )));
        }

        if let Some((start, _)) = self.terms.rental_window() {
            if start < Utc::now().date_naive() {
                return Err(ServiceError::ValidationError(
                    "rental cannot start in the past".to_string(),
                ));
            }
        }

        if listing.serialized && self.terms != (PurchaseTerms::Fixed { quantity: 1 }) {
            return Err(ServiceError::ValidationError(
                "serialized items are bought one unit at a time".to_string(),
            ));
        }

        Ok(())
    }
}
