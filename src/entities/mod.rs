pub mod checkout_session;
pub mod coupon;
pub mod coupon_redemption;
pub mod inventory_item;
pub mod listing_item;
pub mod order;
pub mod order_status_history;
pub mod restock_notification;
