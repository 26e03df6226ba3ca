pub mod restock_inventory_command;

pub use restock_inventory_command::{NewUnit, RestockInventoryCommand, RestockResult};
