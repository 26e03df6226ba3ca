// sea-orm-migration trait signatures use an elided SchemaManager lifetime.
#![allow(elided_lifetimes_in_paths)]

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_listing_items_table::Migration),
            Box::new(m20240301_000002_create_orders_table::Migration),
            Box::new(m20240301_000003_create_inventory_items_table::Migration),
            Box::new(m20240301_000004_create_coupon_tables::Migration),
            Box::new(m20240301_000005_create_checkout_sessions_table::Migration),
            Box::new(m20240301_000006_create_restock_notifications_table::Migration),
            Box::new(m20240301_000007_create_order_status_history_table::Migration),
            Box::new(m20240315_000008_one_open_checkout_per_order::Migration),
        ]
    }
}

mod m20240301_000001_create_listing_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_listing_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ListingItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ListingItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ListingItems::MasterId).uuid().not_null())
                        .col(ColumnDef::new(ListingItems::ProviderId).uuid().not_null())
                        .col(ColumnDef::new(ListingItems::Kind).string_len(16).not_null())
                        .col(
                            ColumnDef::new(ListingItems::PricingModel)
                                .string_len(24)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ListingItems::Title).string().not_null())
                        .col(ColumnDef::new(ListingItems::ItemName).string().not_null())
                        .col(ColumnDef::new(ListingItems::ImageUrl).string().null())
                        .col(
                            ColumnDef::new(ListingItems::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ListingItems::UnitLabel).string().not_null())
                        .col(ColumnDef::new(ListingItems::DepositCents).big_integer().null())
                        .col(
                            ColumnDef::new(ListingItems::ServiceCallFeeCents)
                                .big_integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ListingItems::Serialized)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(ListingItems::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(ListingItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ListingItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_listing_items_provider_id")
                        .table(ListingItems::Table)
                        .col(ListingItems::ProviderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ListingItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ListingItems {
        Table,
        Id,
        MasterId,
        ProviderId,
        Kind,
        PricingModel,
        Title,
        ItemName,
        ImageUrl,
        UnitPriceCents,
        UnitLabel,
        DepositCents,
        ServiceCallFeeCents,
        Serialized,
        Currency,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ProviderId).uuid().not_null())
                        .col(ColumnDef::new(Orders::MasterId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ListingItemId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::ListingKind).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::PricingModel).string_len(24).not_null())
                        .col(ColumnDef::new(Orders::Units).integer().not_null().default(1))
                        .col(
                            ColumnDef::new(Orders::BaseAmountCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::PlatformFeeCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::TaxCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::ServiceCallFeeCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::DepositCents).big_integer().null())
                        .col(
                            ColumnDef::new(Orders::TotalCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Orders::DepositDeductionCents)
                                .big_integer()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::RentalStartDate).date().null())
                        .col(ColumnDef::new(Orders::RentalEndDate).date().null())
                        .col(ColumnDef::new(Orders::SnapshotTitle).string().not_null())
                        .col(ColumnDef::new(Orders::SnapshotItemName).string().not_null())
                        .col(ColumnDef::new(Orders::SnapshotImageUrl).string().null())
                        .col(
                            ColumnDef::new(Orders::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_buyer_id")
                        .table(Orders::Table)
                        .col(Orders::BuyerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_provider_id")
                        .table(Orders::Table)
                        .col(Orders::ProviderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        BuyerId,
        ProviderId,
        MasterId,
        ListingItemId,
        Status,
        ListingKind,
        PricingModel,
        Units,
        BaseAmountCents,
        DiscountCents,
        PlatformFeeCents,
        TaxCents,
        ServiceCallFeeCents,
        DepositCents,
        TotalCents,
        Currency,
        DepositDeductionCents,
        RentalStartDate,
        RentalEndDate,
        SnapshotTitle,
        SnapshotItemName,
        SnapshotImageUrl,
        PaidAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_inventory_items_table {
    use super::m20240301_000001_create_listing_items_table::ListingItems;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::ListingItemId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::SerialNumber).string().not_null())
                        .col(ColumnDef::new(InventoryItems::SecretCode).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::Status)
                                .string_len(16)
                                .not_null()
                                .default("available"),
                        )
                        .col(ColumnDef::new(InventoryItems::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryItems::SoldAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_listing_item")
                                .from(InventoryItems::Table, InventoryItems::ListingItemId)
                                .to(ListingItems::Table, ListingItems::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // A serial exists once per listing item.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_inventory_items_listing_serial")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::ListingItemId)
                        .col(InventoryItems::SerialNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // A unit is attached to at most one order and an order to at most one unit.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_inventory_items_order_id")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_items_listing_status")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::ListingItemId)
                        .col(InventoryItems::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        ListingItemId,
        SerialNumber,
        SecretCode,
        Status,
        OrderId,
        SoldAt,
        CreatedAt,
    }
}

mod m20240301_000004_create_coupon_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::ProviderId).uuid().not_null())
                        .col(ColumnDef::new(Coupons::Code).string_len(64).not_null())
                        .col(ColumnDef::new(Coupons::DiscountType).string_len(16).not_null())
                        .col(ColumnDef::new(Coupons::DiscountValue).big_integer().not_null())
                        .col(ColumnDef::new(Coupons::MaxUses).integer().null())
                        .col(
                            ColumnDef::new(Coupons::UsedCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidUntil)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Coupons::MinPurchaseCents).big_integer().null())
                        .col(ColumnDef::new(Coupons::PerUserLimit).integer().null())
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_coupons_provider_code")
                        .table(Coupons::Table)
                        .col(Coupons::ProviderId)
                        .col(Coupons::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponRedemptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponRedemptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponRedemptions::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponRedemptions::SessionRef).uuid().null())
                        .col(ColumnDef::new(CouponRedemptions::OrderId).uuid().null())
                        .col(ColumnDef::new(CouponRedemptions::RedeemerKey).string().null())
                        .col(
                            ColumnDef::new(CouponRedemptions::DiscountAppliedCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponRedemptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_redemptions_coupon")
                                .from(CouponRedemptions::Table, CouponRedemptions::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_redemptions_coupon_redeemer")
                        .table(CouponRedemptions::Table)
                        .col(CouponRedemptions::CouponId)
                        .col(CouponRedemptions::RedeemerKey)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponRedemptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        ProviderId,
        Code,
        DiscountType,
        DiscountValue,
        MaxUses,
        UsedCount,
        ValidUntil,
        MinPurchaseCents,
        PerUserLimit,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CouponRedemptions {
        Table,
        Id,
        CouponId,
        SessionRef,
        OrderId,
        RedeemerKey,
        DiscountAppliedCents,
        CreatedAt,
    }
}

mod m20240301_000005_create_checkout_sessions_table {
    use super::m20240301_000002_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_checkout_sessions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CheckoutSessions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutSessions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutSessions::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(CheckoutSessions::ExternalSessionId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::AmountCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::DepositCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(CheckoutSessions::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(CheckoutSessions::CouponId).uuid().null())
                        .col(ColumnDef::new(CheckoutSessions::CouponCode).string().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::DiscountCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(CheckoutSessions::RedemptionId).uuid().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::Status)
                                .string_len(16)
                                .not_null()
                                .default("open"),
                        )
                        .col(ColumnDef::new(CheckoutSessions::CheckoutUrl).string().not_null())
                        .col(ColumnDef::new(CheckoutSessions::RefundReference).string().null())
                        .col(ColumnDef::new(CheckoutSessions::FailureReason).string().null())
                        .col(
                            ColumnDef::new(CheckoutSessions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutSessions::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_checkout_sessions_order")
                                .from(CheckoutSessions::Table, CheckoutSessions::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_sessions_order_status")
                        .table(CheckoutSessions::Table)
                        .col(CheckoutSessions::OrderId)
                        .col(CheckoutSessions::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutSessions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CheckoutSessions {
        Table,
        Id,
        OrderId,
        ExternalSessionId,
        AmountCents,
        DepositCents,
        Currency,
        CouponId,
        CouponCode,
        DiscountCents,
        RedemptionId,
        Status,
        CheckoutUrl,
        RefundReference,
        FailureReason,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_restock_notifications_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_restock_notifications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(RestockNotifications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(RestockNotifications::ListingItemId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(RestockNotifications::LastNotifiedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(RestockNotifications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum RestockNotifications {
        Table,
        ListingItemId,
        LastNotifiedAt,
    }
}

mod m20240301_000007_create_order_status_history_table {
    use super::m20240301_000002_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_order_status_history_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderStatusHistory::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatusHistory::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::FromStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::ToStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatusHistory::Actor).string_len(16).not_null())
                        .col(
                            ColumnDef::new(OrderStatusHistory::Transition)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatusHistory::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_status_history_order")
                                .from(OrderStatusHistory::Table, OrderStatusHistory::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_status_history_order_id")
                        .table(OrderStatusHistory::Table)
                        .col(OrderStatusHistory::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStatusHistory::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderStatusHistory {
        #[sea_orm(iden = "order_status_history")]
        Table,
        Id,
        OrderId,
        FromStatus,
        ToStatus,
        Actor,
        Transition,
        CreatedAt,
    }
}

mod m20240315_000008_one_open_checkout_per_order {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240315_000008_one_open_checkout_per_order"
        }
    }

    // Partial indexes are written by hand; Postgres and SQLite share the syntax.
    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_checkout_sessions_open_order \
                     ON checkout_sessions (order_id) WHERE status = 'open'",
                )
                .await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared("DROP INDEX IF EXISTS uq_checkout_sessions_open_order")
                .await?;
            Ok(())
        }
    }
}
