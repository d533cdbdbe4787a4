//! In-memory queue receiver example
//!
//! A receiver in manual acknowledgment mode drains an in-memory queue of
//! JSON orders. Orders with a zero quantity are rejected once and then
//! acknowledged on redelivery.
//!
//! Run with: RUST_LOG=debug cargo run --example queue_memory

use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use mom_receiver::backend::MemoryQueue;
use mom_receiver::{
    // ---
    handler_fn,
    Delivery,
    Headers,
    ReceiverBuilder,
    ReceiverConfig,
    ReceiverEvent,
    Result,
};

#[derive(Debug, Deserialize)]
struct Order {
    id: u32,
    quantity: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let queue = MemoryQueue::with_receive_wait("orders", Duration::from_millis(200));
    for (id, quantity) in [(1, 3), (2, 0), (3, 7)] {
        let mut headers = Headers::new();
        headers.insert("content-type", "application/json");
        queue.send(format!(r#"{{"id": {id}, "quantity": {quantity}}}"#), headers);
    }

    let config = ReceiverConfig::new("orders-worker")
        .with_auto_acknowledge(false)
        .with_max_batch_size(10);

    let receiver = ReceiverBuilder::new(queue.clone())
        .config(config)
        .handler(handler_fn(|delivery: Delivery| async move {
            // ---
            let order: Order = delivery.message().json()?;
            let first_sight = delivery.message().headers().get("receive-count") == Some("1");

            if order.quantity == 0 && first_sight {
                println!("order {} looks empty, sending it back", order.id);
                delivery.reject().await?;
            } else {
                println!("order {}: {} item(s)", order.id, order.quantity);
                delivery.acknowledge().await?;
            }
            Ok(())
        }))
        .build()?;

    let mut events = receiver.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ReceiverEvent::Connected => println!("-- connected"),
                ReceiverEvent::Disconnected { reason } => println!("-- disconnected: {reason}"),
                ReceiverEvent::Diagnostic(d) => println!("-- {}: {}", d.kind, d.detail),
                ReceiverEvent::MessageReceived(_) => {}
            }
        }
    });

    receiver.start(None).await?;

    while queue.acknowledged_count() < 3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    receiver.stop().await?;
    println!(
        "done: {} acknowledged, {} rejected",
        queue.acknowledged_count(),
        queue.rejected_count()
    );
    Ok(())
}
