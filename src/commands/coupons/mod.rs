pub mod create_coupon_command;

pub use create_coupon_command::CreateCouponCommand;
