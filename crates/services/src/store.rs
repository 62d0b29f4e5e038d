//! Product catalog and sale ledger traits, with an in-memory store implementing both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Currency, OrderId, ProductId};
use parking_lot::RwLock;
use resilience::{DEFAULT_OUTAGE, FaultInjector, NoFaults, OutageSimulator, ServiceError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::simulate::simulate_call;

/// Dependency name of product lookups.
pub const PRODUCT_LOOKUP: &str = "store.product";

/// Dependency name of sales.
pub const SALE: &str = "store.sell";

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price in `currency`.
    pub price: Decimal,
    pub currency: Currency,
}

impl Product {
    /// Creates a product.
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        price: Decimal,
        currency: impl Into<Currency>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            currency: currency.into(),
        }
    }
}

/// A recorded sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub exchange_rate: Decimal,
    /// `unit_price × quantity × exchange_rate`.
    pub final_price: Decimal,
}

/// Looks up catalog products.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the product, or [`ServiceError::NotFound`].
    async fn get(&self, product_id: ProductId) -> Result<Product, ServiceError>;
}

/// Executes sales against stock.
#[async_trait]
pub trait SaleLedger: Send + Sync {
    /// Sells `quantity` units at `rate` and returns the new order id.
    ///
    /// Fails with [`ServiceError::NotFound`] for an unknown product and
    /// [`ServiceError::InsufficientStock`] when stock is short.
    async fn sell(
        &self,
        product_id: ProductId,
        quantity: u32,
        rate: Decimal,
    ) -> Result<OrderId, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    products: HashMap<ProductId, (Product, u32)>,
    sales: Vec<Sale>,
    next_order_id: u64,
    fail_on_lookup: bool,
    fail_on_sell: bool,
    lookup_delay: Duration,
}

/// In-memory store for demos and tests.
///
/// Lookups pass through a fault injector after an optional simulated
/// database delay; sales are guarded by an [`OutageSimulator`].
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<InMemoryStoreState>>,
    lookup_faults: Arc<dyn FaultInjector>,
    sale_outage: Arc<OutageSimulator>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store without simulated faults.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryStoreState::default())),
            lookup_faults: Arc::new(NoFaults),
            sale_outage: Arc::new(OutageSimulator::new(
                SALE,
                DEFAULT_OUTAGE,
                Arc::new(NoFaults),
            )),
        }
    }

    /// Creates a store seeded with the sample catalog.
    ///
    /// | id | name | price (USD) | stock |
    /// |----|------|-------------|-------|
    /// | 1 | Laptop | 999.99 | 10 |
    /// | 2 | Smartphone | 499.99 | 20 |
    /// | 3 | Tablet | 299.99 | 15 |
    pub fn with_sample_products() -> Self {
        let store = Self::new();
        let catalog = [
            (1, "Laptop", Decimal::new(99999, 2), 10),
            (2, "Smartphone", Decimal::new(49999, 2), 20),
            (3, "Tablet", Decimal::new(29999, 2), 15),
        ];
        for (id, name, price, stock) in catalog {
            store.add_product(Product::new(ProductId::new(id), name, price, "USD"), stock);
        }
        store
    }

    /// Replaces the fault injector consulted on every lookup.
    pub fn with_lookup_faults(mut self, faults: Arc<dyn FaultInjector>) -> Self {
        self.lookup_faults = faults;
        self
    }

    /// Guards sales with outages of `outage` triggered by `faults`.
    pub fn with_sale_faults(mut self, faults: Arc<dyn FaultInjector>, outage: Duration) -> Self {
        self.sale_outage = Arc::new(OutageSimulator::new(SALE, outage, faults));
        self
    }

    /// Adds or replaces a product with the given stock.
    pub fn add_product(&self, product: Product, stock: u32) {
        self.state
            .write()
            .products
            .insert(product.id, (product, stock));
    }

    /// Configures every lookup to fail.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.state.write().fail_on_lookup = fail;
    }

    /// Configures every sale to fail.
    pub fn set_fail_on_sell(&self, fail: bool) {
        self.state.write().fail_on_sell = fail;
    }

    /// Sets the simulated database delay of lookups.
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.state.write().lookup_delay = delay;
    }

    /// Returns the remaining stock of a product.
    pub fn stock(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .read()
            .products
            .get(&product_id)
            .map(|(_, stock)| *stock)
    }

    /// Returns all recorded sales in order.
    pub fn sales(&self) -> Vec<Sale> {
        self.state.read().sales.clone()
    }

    /// Returns the number of recorded sales.
    pub fn sale_count(&self) -> usize {
        self.state.read().sales.len()
    }

    /// Returns the outage simulator guarding sales.
    pub fn sale_outage(&self) -> &OutageSimulator {
        &self.sale_outage
    }
}

#[async_trait]
impl ProductCatalog for InMemoryStore {
    async fn get(&self, product_id: ProductId) -> Result<Product, ServiceError> {
        let (delay, fail) = {
            let state = self.state.read();
            (state.lookup_delay, state.fail_on_lookup)
        };
        simulate_call(PRODUCT_LOOKUP, delay, self.lookup_faults.as_ref()).await?;
        if fail {
            return Err(ServiceError::unavailable(PRODUCT_LOOKUP, "lookup failure"));
        }

        self.state
            .read()
            .products
            .get(&product_id)
            .map(|(product, _)| product.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))
    }
}

#[async_trait]
impl SaleLedger for InMemoryStore {
    async fn sell(
        &self,
        product_id: ProductId,
        quantity: u32,
        rate: Decimal,
    ) -> Result<OrderId, ServiceError> {
        self.sale_outage.guard().await?;

        let mut state = self.state.write();
        if state.fail_on_sell {
            return Err(ServiceError::unavailable(SALE, "sale failure"));
        }

        let (unit_price, available) = match state.products.get(&product_id) {
            Some((product, stock)) => (product.price, *stock),
            None => return Err(ServiceError::NotFound(format!("product {product_id}"))),
        };
        if available < quantity {
            return Err(ServiceError::InsufficientStock {
                product: product_id.to_string(),
                requested: quantity,
                available,
            });
        }

        if let Some((_, stock)) = state.products.get_mut(&product_id) {
            *stock -= quantity;
        }
        state.next_order_id += 1;
        let order_id = OrderId::new(state.next_order_id);
        state.sales.push(Sale {
            order_id,
            product_id,
            quantity,
            unit_price,
            exchange_rate: rate,
            final_price: unit_price * Decimal::from(quantity) * rate,
        });

        tracing::debug!(%order_id, %product_id, quantity, "sale recorded");
        Ok(order_id)
    }
}
