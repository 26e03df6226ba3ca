pub mod create_order_command;

pub use create_order_command::CreateOrderCommand;
