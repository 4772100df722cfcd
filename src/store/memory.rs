use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use super::{OrderFilter, Store, StoreResult};
use crate::error::StoreError;
use crate::model::{
    Configuration, ConfigurationId, Customer, CustomerId, NewConfiguration, Order, OrderId, OrderItem,
};
use crate::state_machine::{OrderStatus, StateMachine};

#[derive(Debug, Clone, Default)]
struct Tables {
    configurations: BTreeMap<ConfigurationId, Configuration>,
    customers: BTreeMap<CustomerId, Customer>,
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<OrderId, Vec<OrderItem>>,
    last_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn order_mut(&mut self, id: OrderId) -> StoreResult<&mut Order> {
        self.orders.get_mut(&id).ok_or(StoreError::order(id))
    }

    fn is_active(&self, configuration_id: ConfigurationId) -> bool {
        self.configurations
            .get(&configuration_id)
            .is_some_and(|c| c.is_active)
    }
}

/// [`Store`] volátil, usado nos testes.
///
/// Cada escrita roda sobre uma cópia das tabelas e só é publicada se a
/// transação inteira der certo.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        Ok(f(&self.tables.lock()))
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.tables.lock();
        let mut draft = guard.clone();
        let value = f(&mut draft)?;
        *guard = draft;
        Ok(value)
    }
}

impl Store for MemoryStore {
    fn add_configuration(&self, new: NewConfiguration) -> StoreResult<Configuration> {
        self.transaction(|t| {
            let configuration = Configuration {
                id: t.next_id(),
                name: new.name,
                token: new.token,
                token_integrator: new.token_integrator,
                status: new.status,
                days: new.days,
                search_labels: new.search_labels,
                use_invoice_items: new.use_invoice_items,
                is_active: true,
            };
            t.configurations.insert(configuration.id, configuration.clone());
            Ok(configuration)
        })
    }

    fn configuration(&self, id: ConfigurationId) -> StoreResult<Configuration> {
        self.read(|t| t.configurations.get(&id).cloned())?
            .ok_or(StoreError::configuration(id))
    }

    fn configurations(&self) -> StoreResult<Vec<Configuration>> {
        self.read(|t| t.configurations.values().cloned().collect())
    }

    fn set_configuration_active(&self, id: ConfigurationId, active: bool) -> StoreResult<()> {
        self.transaction(|t| {
            let configuration = t
                .configurations
                .get_mut(&id)
                .ok_or(StoreError::configuration(id))?;
            configuration.is_active = active;
            Ok(())
        })
    }

    fn upsert_customer(&self, customer: Customer) -> StoreResult<Customer> {
        self.transaction(|t| {
            let existing = t
                .customers
                .values()
                .find(|c| c.cnpj_cpf == customer.cnpj_cpf && c.postal_code == customer.postal_code)
                .map(|c| c.id);
            let id = match existing {
                Some(id) => id,
                None => t.next_id(),
            };
            let customer = Customer { id, ..customer };
            t.customers.insert(id, customer.clone());
            Ok(customer)
        })
    }

    fn customer(&self, id: u64) -> StoreResult<Option<Customer>> {
        self.read(|t| t.customers.get(&id).cloned())
    }

    fn get_or_create_order(&self, candidate: Order) -> StoreResult<(Order, bool)> {
        self.transaction(|t| {
            let existing = t.orders.values().find(|o| {
                o.configuration_id == candidate.configuration_id
                    && o.number == candidate.number
                    && o.number_store == candidate.number_store
            });
            if let Some(order) = existing {
                return Ok((order.clone(), false));
            }

            let search_labels = t
                .configurations
                .get(&candidate.configuration_id)
                .ok_or(StoreError::configuration(candidate.configuration_id))?
                .search_labels;
            let now = Utc::now();
            let order = Order {
                id: t.next_id(),
                search_label: search_labels,
                running: false,
                processed: false,
                sent_label: false,
                created_at: now,
                updated_at: now,
                ..candidate
            };
            t.orders.insert(order.id, order.clone());
            Ok((order, true))
        })
    }

    fn order(&self, id: OrderId) -> StoreResult<Order> {
        self.read(|t| t.orders.get(&id).cloned())?.ok_or(StoreError::order(id))
    }

    fn save_order(&self, order: &mut Order) -> StoreResult<()> {
        let saved = self.transaction(|t| {
            let search_labels = t
                .configurations
                .get(&order.configuration_id)
                .ok_or(StoreError::configuration(order.configuration_id))?
                .search_labels;
            let stored = t.order_mut(order.id)?;
            let saved = Order {
                status: StateMachine::resolve(stored.status, order.status),
                search_label: search_labels,
                running: stored.running,
                processed: stored.processed,
                sent_label: stored.sent_label,
                created_at: stored.created_at,
                updated_at: Utc::now(),
                ..order.clone()
            };
            *stored = saved.clone();
            Ok(saved)
        })?;
        *order = saved;
        Ok(())
    }

    fn set_running(&self, id: OrderId, running: bool) -> StoreResult<()> {
        self.transaction(|t| {
            t.order_mut(id)?.running = running;
            Ok(())
        })
    }

    fn set_processed(&self, id: OrderId) -> StoreResult<()> {
        self.transaction(|t| {
            t.order_mut(id)?.processed = true;
            Ok(())
        })
    }

    fn set_sent_label(&self, id: OrderId, sent: bool) -> StoreResult<()> {
        self.transaction(|t| {
            t.order_mut(id)?.sent_label = sent;
            Ok(())
        })
    }

    fn set_integrator_id(&self, id: OrderId, integrator_id: i64) -> StoreResult<()> {
        self.transaction(|t| {
            let order = t.order_mut(id)?;
            order.integrator_id = Some(integrator_id);
            order.updated_at = Utc::now();
            Ok(())
        })
    }

    fn update_status(&self, ids: &[OrderId], status: OrderStatus) -> StoreResult<usize> {
        self.transaction(|t| {
            let mut changed = 0;
            for id in ids {
                if let Some(order) = t.orders.get_mut(id) {
                    let resolved = StateMachine::resolve(order.status, status);
                    if resolved != order.status {
                        order.status = resolved;
                        order.updated_at = Utc::now();
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        })
    }

    fn replace_items(&self, order_id: OrderId, items: Vec<OrderItem>) -> StoreResult<()> {
        self.transaction(|t| {
            t.order_mut(order_id)?;
            t.items.insert(order_id, items);
            Ok(())
        })
    }

    fn items(&self, order_id: OrderId) -> StoreResult<Vec<OrderItem>> {
        self.read(|t| t.items.get(&order_id).cloned().unwrap_or_default())
    }

    fn claim_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderId>> {
        let claimed = self.transaction(|t| {
            let ids: Vec<OrderId> = t
                .orders
                .values()
                .filter(|o| filter.matches(o) && t.is_active(o.configuration_id))
                .map(|o| o.id)
                .collect();
            for id in &ids {
                t.order_mut(*id)?.running = true;
            }
            Ok(ids)
        })?;
        debug!(?filter, count = claimed.len(), "orders claimed");
        Ok(claimed)
    }

    fn reset_running(&self) -> StoreResult<usize> {
        self.transaction(|t| {
            let mut reset = 0;
            for order in t.orders.values_mut().filter(|o| o.running) {
                order.running = false;
                reset += 1;
            }
            Ok(reset)
        })
    }

    fn orders_by_identifiers(
        &self,
        configuration_id: ConfigurationId,
        identifiers: &[i64],
    ) -> StoreResult<Vec<Order>> {
        self.read(|t| {
            t.orders
                .values()
                .filter(|o| o.configuration_id == configuration_id && identifiers.contains(&o.identifier))
                .cloned()
                .collect()
        })
    }

    fn find_by_integrator(
        &self,
        number: i64,
        integrator_id: i64,
        configuration_id: Option<ConfigurationId>,
    ) -> StoreResult<Option<Order>> {
        self.read(|t| {
            t.orders
                .values()
                .find(|o| {
                    o.number == Some(number)
                        && o.integrator_id == Some(integrator_id)
                        && configuration_id.is_none_or(|id| o.configuration_id == id)
                })
                .cloned()
        })
    }

    fn delete_order(&self, id: OrderId) -> StoreResult<Order> {
        self.transaction(|t| {
            let order = t.orders.remove(&id).ok_or(StoreError::order(id))?;
            t.items.remove(&id);
            Ok(order)
        })
    }
}
