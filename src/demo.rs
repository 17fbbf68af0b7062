use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::broker::{Broker, BrokerError, MemoryBroker, StreamConfig};
use crate::config::Profile;

pub const DEMO_PROFILE: &str = "demo";

pub fn demo_profile() -> Profile {
    let mut profile = Profile::new(DEMO_PROFILE, "memory://demo");
    profile.description = "in-process demo broker".to_string();
    profile
}

/// Create the demo streams and fill them with a little traffic.
pub fn seed(broker: &Arc<MemoryBroker>) -> Result<(), BrokerError> {
    let mut orders = StreamConfig::new("orders", &["orders.>"]);
    orders.description = "order lifecycle".to_string();
    orders.max_age = Some(Duration::from_secs(24 * 3600));
    broker.add_stream(orders)?;

    let mut events = StreamConfig::new("events", &["events.*"]);
    events.description = "audit events".to_string();
    events.max_msgs = 1000;
    broker.add_stream(events)?;

    let traffic: &[(&str, &str)] = &[
        ("orders.received", r#"{"id":1001,"sku":"A-17","qty":2}"#),
        ("orders.received", r#"{"id":1002,"sku":"B-03","qty":1}"#),
        ("orders.paid", r#"{"id":1001,"amount":"39.90"}"#),
        ("orders.eu.shipped", r#"{"id":1001,"carrier":"DHL"}"#),
        ("orders.cancelled", r#"{"id":1002,"reason":"customer"}"#),
        ("events.login", "user=ada"),
        ("events.logout", "user=ada"),
        ("events.login", "user=grace"),
    ];
    for (subject, body) in traffic {
        broker.publish(subject, body.as_bytes())?;
    }
    info!(messages = traffic.len(), "demo broker seeded");
    Ok(())
}
