//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    /// Total deliveries published
    pub static ref MESSAGE_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_publish_total",
        "Total deliveries published",
        &["transport", "status"]
    )
    .unwrap();

    /// Total deliveries received
    pub static ref MESSAGE_RECEIVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_receive_total",
        "Total deliveries received",
        &["transport", "status"]
    )
    .unwrap();

    /// Deliveries that a handler failed to process
    pub static ref MESSAGE_HANDLER_FAILURES: IntCounter = register_int_counter!(
        "message_bus_handler_failures_total",
        "Deliveries a handler failed to process"
    )
    .unwrap();
}
