use std::collections::HashMap;
use std::sync::Arc;

use tandem::runtime::{Handle, Promise, WorkError};

#[tandem::task]
fn lookup_stock(inventory: Arc<HashMap<String, u64>>, product: String) -> Result<u64, WorkError> {
    inventory
        .get(&product)
        .copied()
        .ok_or_else(|| WorkError::msg(format!("unknown product `{product}`")))
}

/// Stock and pricing lookups for the demo's product pipeline. Each step runs
/// on the executor and hands back a promise.
pub struct ProductProcessor {
    executor: Handle,
    inventory: Arc<HashMap<String, u64>>,
    unit_price: f64,
}

impl ProductProcessor {
    pub fn new(executor: Handle) -> Self {
        let inventory = [("iPad", 25), ("iPhone", 140), ("MacBook", 0)]
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();

        Self {
            executor,
            inventory: Arc::new(inventory),
            unit_price: 499.99,
        }
    }

    pub fn products_stock(&self, product: &str) -> Promise<u64> {
        self.executor
            .submit(lookup_stock(self.inventory.clone(), product.to_string()))
    }

    /// Total value of the stock on hand.
    pub fn products_price(&self) -> impl FnOnce(u64) -> Promise<f64> + Send + 'static {
        let executor = self.executor.clone();
        let unit_price = self.unit_price;
        move |stock| executor.supply(move || stock as f64 * unit_price)
    }

    pub fn displayed_text(&self) -> impl FnOnce(f64) -> Promise<String> + Send + 'static {
        let executor = self.executor.clone();
        move |price| executor.supply(move || format!("The products are worth {price:.2} USD"))
    }
}
