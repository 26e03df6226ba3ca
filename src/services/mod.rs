// Money
pub mod pricing;
pub mod coupons;

// Stock
pub mod inventory_allocator;

// Order state machine and payments
pub mod checkout;
pub mod order_lifecycle;
pub mod payment_gateway;

pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use inventory_allocator::InventoryAllocator;
pub use order_lifecycle::OrderLifecycleService;
pub use pricing::PricingEngine;
