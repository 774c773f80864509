//! Review command implementation.

use super::{open_dir, open_queues};
use boxoffice_core::{DataDir, RejectedPurchase};
use serde::Serialize;
use std::path::Path;

/// Purchases of one event waiting for an operator.
#[derive(Debug, Serialize)]
pub struct ReviewQueue {
    /// Event id.
    pub event_id: String,
    /// Purchases needing manual review.
    pub purchases: Vec<RejectedPurchase>,
}

/// Runs the review command.
pub fn run(path: &Path, event: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_dir(path)?;
    let queues = collect(&dir, event)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&queues)?),
        _ => print_text_output(&queues),
    }
    Ok(())
}

/// Gathers the review queue of every event in `dir`.
pub fn collect(
    dir: &DataDir,
    event: Option<&str>,
) -> Result<Vec<ReviewQueue>, Box<dyn std::error::Error>> {
    let mut queues = Vec::new();
    for queue in open_queues(dir, event)? {
        queues.push(ReviewQueue {
            event_id: queue.event_id().to_string(),
            purchases: queue.review_queue()?,
        });
    }
    Ok(queues)
}

fn print_text_output(queues: &[ReviewQueue]) {
    let total: usize = queues.iter().map(|q| q.purchases.len()).sum();
    if total == 0 {
        println!("✓ Nothing waiting for review.");
        return;
    }

    println!("{} purchase(s) waiting for review", total);
    for queue in queues.iter().filter(|q| !q.purchases.is_empty()) {
        println!();
        println!("Event {}:", queue.event_id);
        for purchase in &queue.purchases {
            print_purchase(purchase);
        }
    }
}

fn print_purchase(purchase: &RejectedPurchase) {
    println!(
        "  Purchase {} [{}] {}",
        purchase.purchase_id,
        purchase.error_code,
        purchase.describe()
    );
    println!("    Attempts: {}", purchase.retry_attempts);

    let sellers = purchase.invalid_sellers();
    if !sellers.is_empty() {
        let sellers: Vec<String> = sellers.iter().map(ToString::to_string).collect();
        println!("    Sellers to correct: {}", sellers.join(", "));
    }

    for item in &purchase.items {
        let marker = if item.is_primary_error() { "!" } else { " " };
        println!(
            "    {} {} seller {} price {}{}",
            marker,
            item.item.item_id,
            item.item.seller,
            item.item.price,
            if item.reason.is_empty() {
                String::new()
            } else {
                format!(" ({})", item.reason)
            }
        );
    }
}
