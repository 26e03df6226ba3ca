//! Prometheus counters for the settlement core, exposed at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref ORDERS_CREATED: IntCounterVec = IntCounterVec::new(
        Opts::new("orders_created_total", "Orders created, by initial status"),
        &["status"]
    )
    .expect("metric can be created");
    pub static ref INVENTORY_ALLOCATIONS: IntCounter = IntCounter::new(
        "inventory_allocations_total",
        "Serialized units allocated to paid orders"
    )
    .expect("metric can be created");
    pub static ref INVENTORY_OUT_OF_STOCK: IntCounter = IntCounter::new(
        "inventory_out_of_stock_total",
        "Allocations that found no available unit"
    )
    .expect("metric can be created");
    pub static ref INVENTORY_ALLOCATION_RETRIES: IntCounter = IntCounter::new(
        "inventory_allocation_retries_total",
        "Allocation attempts lost to a concurrent writer while stock remained"
    )
    .expect("metric can be created");
    pub static ref COUPON_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("coupon_redemptions_total", "Coupon validate-and-apply outcomes"),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref ORDER_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("order_transitions_total", "Committed order status transitions"),
        &["transition"]
    )
    .expect("metric can be created");
    pub static ref ORDER_TRANSITION_CONFLICTS: IntCounter = IntCounter::new(
        "order_transition_conflicts_total",
        "Transitions refused because the order was not in a source state"
    )
    .expect("metric can be created");
    pub static ref PAYMENT_COMPENSATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "payment_compensations_total",
            "Refunds issued after a post-capture failure"
        ),
        &["outcome"]
    )
    .expect("metric can be created");
}

/// Registers every counter with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(INVENTORY_ALLOCATIONS.clone()),
        Box::new(INVENTORY_OUT_OF_STOCK.clone()),
        Box::new(INVENTORY_ALLOCATION_RETRIES.clone()),
        Box::new(COUPON_OUTCOMES.clone()),
        Box::new(ORDER_TRANSITIONS.clone()),
        Box::new(ORDER_TRANSITION_CONFLICTS.clone()),
        Box::new(PAYMENT_COMPENSATIONS.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeat calls
        let _ = REGISTRY.register(collector);
    }
}

/// Renders the registry in the Prometheus text format.
pub fn gather_text() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_counters_appear_in_output() {
        register_metrics();
        register_metrics();
        ORDER_TRANSITIONS.with_label_values(&["accept"]).inc();

        let text = gather_text().unwrap();
        assert!(text.contains("order_transitions_total"));
    }
}
