//! Metric helpers for `apnwire`.
//!
//! This module defines metric names and thin wrappers around the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

use crate::frame::GatewayStatus;

/// Counter of notification frames written to the gateway.
pub const NOTIFICATIONS_SENT: &str = "apnwire_notifications_sent_total";
/// Counter of notifications replayed after a gateway error.
pub const NOTIFICATIONS_RESENT: &str = "apnwire_notifications_resent_total";
/// Counter of error frames received from the gateway.
pub const GATEWAY_ERRORS: &str = "apnwire_gateway_errors_total";
/// Counter of records decoded from the feedback service.
pub const FEEDBACK_RECORDS: &str = "apnwire_feedback_records_total";
/// Gauge of open secure streams.
pub const CONNECTIONS_ACTIVE: &str = "apnwire_connections_active";

/// Which service a connection talks to.
#[derive(Clone, Copy, Debug)]
pub enum Channel {
    /// The push gateway.
    Push,
    /// The feedback service.
    Feedback,
}

impl Channel {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Feedback => "feedback",
        }
    }
}

#[cfg(feature = "metrics")]
mod imp {
    use metrics::{counter, gauge};

    use super::*;

    pub fn inc_sent() { counter!(NOTIFICATIONS_SENT).increment(1); }

    pub fn add_resent(count: u64) { counter!(NOTIFICATIONS_RESENT).increment(count); }

    pub fn inc_gateway_errors(status: GatewayStatus) {
        counter!(GATEWAY_ERRORS, "status" => status.label()).increment(1);
    }

    pub fn inc_feedback_records() { counter!(FEEDBACK_RECORDS).increment(1); }

    pub fn inc_connections(channel: Channel) {
        gauge!(CONNECTIONS_ACTIVE, "channel" => channel.as_str()).increment(1.0);
    }

    pub fn dec_connections(channel: Channel) {
        gauge!(CONNECTIONS_ACTIVE, "channel" => channel.as_str()).decrement(1.0);
    }
}

#[cfg(not(feature = "metrics"))]
mod imp {
    use super::*;

    pub fn inc_sent() {}

    pub fn add_resent(_count: u64) {}

    pub fn inc_gateway_errors(_status: GatewayStatus) {}

    pub fn inc_feedback_records() {}

    pub fn inc_connections(_channel: Channel) {}

    pub fn dec_connections(_channel: Channel) {}
}

/// Record a notification frame written to the gateway.
pub fn inc_sent() { imp::inc_sent(); }

/// Record notifications replayed after a gateway error.
pub fn add_resent(count: u64) { imp::add_resent(count); }

/// Record an error frame received from the gateway.
pub fn inc_gateway_errors(status: GatewayStatus) { imp::inc_gateway_errors(status); }

/// Record a decoded feedback record.
pub fn inc_feedback_records() { imp::inc_feedback_records(); }

/// Increment the open stream gauge for `channel`.
pub fn inc_connections(channel: Channel) { imp::inc_connections(channel); }

/// Decrement the open stream gauge for `channel`.
pub fn dec_connections(channel: Channel) { imp::dec_connections(channel); }
