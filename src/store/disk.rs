//! [`Store`] persistido em arquivo com redb.
//!
//! # Tabelas
//!
//! | Tabela | Chave | Valor |
//! |--------|-------|-------|
//! | `configurations` | id | `Configuration` (JSON) |
//! | `customers` | id | `Customer` (JSON) |
//! | `customer_keys` | (documento, CEP) | id do cliente |
//! | `orders` | id | `Order` (JSON) |
//! | `order_keys` | (configuração, número, número da loja) | id do pedido |
//! | `items` | id do pedido | `Vec<OrderItem>` (JSON) |
//! | `sequence` | `"id"` | último id gerado |
//!
//! Cada operação do [`Store`] é uma única transação de escrita do redb,
//! confirmada em disco antes de retornar. O arquivo é exclusivo de um
//! processo: uma segunda abertura falha com [`StoreError::Locked`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{OrderFilter, Store, StoreResult};
use crate::error::StoreError;
use crate::model::{
    Configuration, ConfigurationId, Customer, NewConfiguration, Order, OrderId, OrderItem,
};
use crate::state_machine::{OrderStatus, StateMachine};

const CONFIGURATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("configurations");
const CUSTOMERS: TableDefinition<u64, &[u8]> = TableDefinition::new("customers");
const CUSTOMER_KEYS: TableDefinition<&str, u64> = TableDefinition::new("customer_keys");
const ORDERS: TableDefinition<u64, &[u8]> = TableDefinition::new("orders");
const ORDER_KEYS: TableDefinition<&str, u64> = TableDefinition::new("order_keys");
const ITEMS: TableDefinition<u64, &[u8]> = TableDefinition::new("items");
const SEQUENCE: TableDefinition<&str, u64> = TableDefinition::new("sequence");

const ID_KEY: &str = "id";

type Rows<'txn> = Table<'txn, u64, &'static [u8]>;

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn get<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> StoreResult<Option<T>> {
    match table.get(id)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

fn all<T: DeserializeOwned>(table: &impl ReadableTable<u64, &'static [u8]>) -> StoreResult<Vec<T>> {
    let mut rows = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        rows.push(decode(value.value())?);
    }
    Ok(rows)
}

fn put<T: Serialize>(table: &mut Rows<'_>, id: u64, row: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(row)?;
    table.insert(id, bytes.as_slice())?;
    Ok(())
}

fn next_id(txn: &WriteTransaction) -> StoreResult<u64> {
    let mut sequence = txn.open_table(SEQUENCE)?;
    let current = sequence.get(ID_KEY)?.map(|g| g.value()).unwrap_or(0);
    let next = current + 1;
    sequence.insert(ID_KEY, next)?;
    Ok(next)
}

fn order_key(order: &Order) -> StoreResult<String> {
    Ok(serde_json::to_string(&(
        order.configuration_id,
        order.number,
        order.number_store.as_deref(),
    ))?)
}

fn customer_key(customer: &Customer) -> StoreResult<String> {
    Ok(serde_json::to_string(&(customer.cnpj_cpf.as_str(), customer.postal_code.as_str()))?)
}

fn search_labels(txn: &WriteTransaction, configuration_id: ConfigurationId) -> StoreResult<bool> {
    let configurations = txn.open_table(CONFIGURATIONS)?;
    let configuration: Configuration =
        get(&configurations, configuration_id)?.ok_or(StoreError::configuration(configuration_id))?;
    Ok(configuration.search_labels)
}

/// Lê o pedido, aplica `f` e grava de volta.
fn update_order(txn: &WriteTransaction, id: OrderId, f: impl FnOnce(&mut Order)) -> StoreResult<()> {
    let mut orders = txn.open_table(ORDERS)?;
    let mut order: Order = get(&orders, id)?.ok_or(StoreError::order(id))?;
    f(&mut order);
    put(&mut orders, id, &order)
}

/// Pedidos, clientes e configurações num arquivo redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Abre (ou cria) o banco em `path`, criando as tabelas que faltarem.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = match Database::create(path) {
            Ok(db) => db,
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                return Err(StoreError::Locked(PathBuf::from(path)));
            }
            Err(e) => return Err(e.into()),
        };

        let txn = db.begin_write()?;
        {
            txn.open_table(CONFIGURATIONS)?;
            txn.open_table(CUSTOMERS)?;
            txn.open_table(CUSTOMER_KEYS)?;
            txn.open_table(ORDERS)?;
            txn.open_table(ORDER_KEYS)?;
            txn.open_table(ITEMS)?;
            txn.open_table(SEQUENCE)?;
        }
        txn.commit()?;

        info!(path = %path.display(), "store opened");
        Ok(Self { db: Arc::new(db) })
    }

    fn read<T>(&self, f: impl FnOnce(&ReadTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_read()?;
        f(&txn)
    }

    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_write()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    fn orders_where(&self, mut keep: impl FnMut(&Order) -> bool) -> StoreResult<Vec<Order>> {
        self.read(|txn| {
            let orders: Vec<Order> = all(&txn.open_table(ORDERS)?)?;
            Ok(orders.into_iter().filter(|o| keep(o)).collect())
        })
    }
}

impl Store for RedbStore {
    fn add_configuration(&self, new: NewConfiguration) -> StoreResult<Configuration> {
        self.write(|txn| {
            let configuration = Configuration {
                id: next_id(txn)?,
                name: new.name,
                token: new.token,
                token_integrator: new.token_integrator,
                status: new.status,
                days: new.days,
                search_labels: new.search_labels,
                use_invoice_items: new.use_invoice_items,
                is_active: true,
            };
            put(&mut txn.open_table(CONFIGURATIONS)?, configuration.id, &configuration)?;
            Ok(configuration)
        })
    }

    fn configuration(&self, id: ConfigurationId) -> StoreResult<Configuration> {
        self.read(|txn| get(&txn.open_table(CONFIGURATIONS)?, id))?
            .ok_or(StoreError::configuration(id))
    }

    fn configurations(&self) -> StoreResult<Vec<Configuration>> {
        self.read(|txn| all(&txn.open_table(CONFIGURATIONS)?))
    }

    fn set_configuration_active(&self, id: ConfigurationId, active: bool) -> StoreResult<()> {
        self.write(|txn| {
            let mut configurations = txn.open_table(CONFIGURATIONS)?;
            let mut configuration: Configuration =
                get(&configurations, id)?.ok_or(StoreError::configuration(id))?;
            configuration.is_active = active;
            put(&mut configurations, id, &configuration)
        })
    }

    fn upsert_customer(&self, customer: Customer) -> StoreResult<Customer> {
        self.write(|txn| {
            let key = customer_key(&customer)?;
            let existing = txn.open_table(CUSTOMER_KEYS)?.get(key.as_str())?.map(|g| g.value());
            let id = match existing {
                Some(id) => id,
                None => {
                    let id = next_id(txn)?;
                    txn.open_table(CUSTOMER_KEYS)?.insert(key.as_str(), id)?;
                    id
                }
            };
            let customer = Customer { id, ..customer };
            put(&mut txn.open_table(CUSTOMERS)?, id, &customer)?;
            Ok(customer)
        })
    }

    fn customer(&self, id: u64) -> StoreResult<Option<Customer>> {
        self.read(|txn| get(&txn.open_table(CUSTOMERS)?, id))
    }

    fn get_or_create_order(&self, candidate: Order) -> StoreResult<(Order, bool)> {
        self.write(|txn| {
            let key = order_key(&candidate)?;
            let existing = txn.open_table(ORDER_KEYS)?.get(key.as_str())?.map(|g| g.value());
            if let Some(id) = existing {
                let order = get(&txn.open_table(ORDERS)?, id)?.ok_or(StoreError::order(id))?;
                return Ok((order, false));
            }

            let search_label = search_labels(txn, candidate.configuration_id)?;
            let now = Utc::now();
            let order = Order {
                id: next_id(txn)?,
                search_label,
                running: false,
                processed: false,
                sent_label: false,
                created_at: now,
                updated_at: now,
                ..candidate
            };
            txn.open_table(ORDER_KEYS)?.insert(key.as_str(), order.id)?;
            put(&mut txn.open_table(ORDERS)?, order.id, &order)?;
            Ok((order, true))
        })
    }

    fn order(&self, id: OrderId) -> StoreResult<Order> {
        self.read(|txn| get(&txn.open_table(ORDERS)?, id))?
            .ok_or(StoreError::order(id))
    }

    fn save_order(&self, order: &mut Order) -> StoreResult<()> {
        let saved = self.write(|txn| {
            let search_label = search_labels(txn, order.configuration_id)?;
            let mut orders = txn.open_table(ORDERS)?;
            let stored: Order = get(&orders, order.id)?.ok_or(StoreError::order(order.id))?;
            let saved = Order {
                status: StateMachine::resolve(stored.status, order.status),
                search_label,
                running: stored.running,
                processed: stored.processed,
                sent_label: stored.sent_label,
                created_at: stored.created_at,
                updated_at: Utc::now(),
                ..order.clone()
            };
            put(&mut orders, saved.id, &saved)?;

            let (old_key, new_key) = (order_key(&stored)?, order_key(&saved)?);
            if old_key != new_key {
                let mut keys = txn.open_table(ORDER_KEYS)?;
                keys.remove(old_key.as_str())?;
                keys.insert(new_key.as_str(), saved.id)?;
            }
            Ok(saved)
        })?;
        *order = saved;
        Ok(())
    }

    fn set_running(&self, id: OrderId, running: bool) -> StoreResult<()> {
        self.write(|txn| update_order(txn, id, |o| o.running = running))
    }

    fn set_processed(&self, id: OrderId) -> StoreResult<()> {
        self.write(|txn| update_order(txn, id, |o| o.processed = true))
    }

    fn set_sent_label(&self, id: OrderId, sent: bool) -> StoreResult<()> {
        self.write(|txn| update_order(txn, id, |o| o.sent_label = sent))
    }

    fn set_integrator_id(&self, id: OrderId, integrator_id: i64) -> StoreResult<()> {
        self.write(|txn| {
            update_order(txn, id, |o| {
                o.integrator_id = Some(integrator_id);
                o.updated_at = Utc::now();
            })
        })
    }

    fn update_status(&self, ids: &[OrderId], status: OrderStatus) -> StoreResult<usize> {
        self.write(|txn| {
            let mut orders = txn.open_table(ORDERS)?;
            let mut changed = 0;
            for &id in ids {
                let Some(mut order) = get::<Order>(&orders, id)? else {
                    continue;
                };
                let resolved = StateMachine::resolve(order.status, status);
                if resolved != order.status {
                    order.status = resolved;
                    order.updated_at = Utc::now();
                    put(&mut orders, id, &order)?;
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn replace_items(&self, order_id: OrderId, items: Vec<OrderItem>) -> StoreResult<()> {
        self.write(|txn| {
            if get::<Order>(&txn.open_table(ORDERS)?, order_id)?.is_none() {
                return Err(StoreError::order(order_id));
            }
            put(&mut txn.open_table(ITEMS)?, order_id, &items)
        })
    }

    fn items(&self, order_id: OrderId) -> StoreResult<Vec<OrderItem>> {
        self.read(|txn| get(&txn.open_table(ITEMS)?, order_id))
            .map(Option::unwrap_or_default)
    }

    fn claim_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderId>> {
        let claimed = self.write(|txn| {
            let active: Vec<ConfigurationId> = all::<Configuration>(&txn.open_table(CONFIGURATIONS)?)?
                .into_iter()
                .filter(|c| c.is_active)
                .map(|c| c.id)
                .collect();

            let mut orders = txn.open_table(ORDERS)?;
            let mut candidates: Vec<Order> = all::<Order>(&orders)?
                .into_iter()
                .filter(|o| filter.matches(o) && active.contains(&o.configuration_id))
                .collect();
            for order in &mut candidates {
                order.running = true;
                put(&mut orders, order.id, &*order)?;
            }
            Ok(candidates.into_iter().map(|o| o.id).collect::<Vec<_>>())
        })?;
        debug!(?filter, count = claimed.len(), "orders claimed");
        Ok(claimed)
    }

    fn reset_running(&self) -> StoreResult<usize> {
        self.write(|txn| {
            let mut orders = txn.open_table(ORDERS)?;
            let mut running: Vec<Order> = all::<Order>(&orders)?.into_iter().filter(|o| o.running).collect();
            for order in &mut running {
                order.running = false;
                put(&mut orders, order.id, &*order)?;
            }
            Ok(running.len())
        })
    }

    fn orders_by_identifiers(
        &self,
        configuration_id: ConfigurationId,
        identifiers: &[i64],
    ) -> StoreResult<Vec<Order>> {
        self.orders_where(|o| o.configuration_id == configuration_id && identifiers.contains(&o.identifier))
    }

    fn find_by_integrator(
        &self,
        number: i64,
        integrator_id: i64,
        configuration_id: Option<ConfigurationId>,
    ) -> StoreResult<Option<Order>> {
        let mut found = self.orders_where(|o| {
            o.number == Some(number)
                && o.integrator_id == Some(integrator_id)
                && configuration_id.is_none_or(|id| o.configuration_id == id)
        })?;
        Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
    }

    fn delete_order(&self, id: OrderId) -> StoreResult<Order> {
        self.write(|txn| {
            let order: Order = txn
                .open_table(ORDERS)?
                .remove(id)?
                .map(|g| decode(g.value()))
                .transpose()?
                .ok_or(StoreError::order(id))?;
            txn.open_table(ORDER_KEYS)?.remove(order_key(&order)?.as_str())?;
            txn.open_table(ITEMS)?.remove(id)?;
            Ok(order)
        })
    }
}
