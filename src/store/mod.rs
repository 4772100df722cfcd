//! Persistência: pedidos, clientes e configurações ([`Store`]) e arquivos
//! de nota e etiqueta ([`BlobStore`]).

pub mod blob;
pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    Configuration, ConfigurationId, Customer, NewConfiguration, Order, OrderId, OrderItem,
};
use crate::state_machine::OrderStatus;

pub use blob::{FsBlobStore, MemoryBlobStore, blob_path, file_name};
pub use disk::RedbStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Conjuntos de trabalho dos drivers de sincronização.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    /// Pedidos importados aguardando expedição e etiqueta.
    SearchExpedition,
    /// Pedidos ainda sem XML, aguardando arquivos.
    SearchUpdateOrders,
    /// Etiquetas baixadas e ainda não enviadas ao integrador.
    PendingSendLabels,
    /// Pedidos com XML salvo que ainda não chegaram ao integrador.
    AwaitingIntegration,
}

impl OrderFilter {
    /// Critério sobre o próprio pedido. Pedidos em execução nunca casam;
    /// a exigência de configuração ativa fica a cargo do [`Store`].
    pub fn matches(self, order: &Order) -> bool {
        if order.running {
            return false;
        }
        match self {
            OrderFilter::SearchExpedition => {
                order.label.is_none()
                    && order.status == OrderStatus::Imported
                    && order.search_label
                    && !order.processed
            }
            OrderFilter::SearchUpdateOrders => {
                order.xml.is_none() && order.status == OrderStatus::AwaitingFiles && !order.processed
            }
            OrderFilter::PendingSendLabels => {
                order.search_label
                    && !order.sent_label
                    && order.label.is_some()
                    && !order.processed
                    && order.status != OrderStatus::Cancelled
            }
            OrderFilter::AwaitingIntegration => order.status == OrderStatus::AwaitingIntegration,
        }
    }
}

/// Armazenamento relacional dos pedidos.
///
/// Toda escrita é uma transação: ou aplica por inteiro, ou não aplica.
pub trait Store: Send + Sync {
    fn add_configuration(&self, new: NewConfiguration) -> StoreResult<Configuration>;
    fn configuration(&self, id: ConfigurationId) -> StoreResult<Configuration>;
    fn configurations(&self) -> StoreResult<Vec<Configuration>>;
    fn set_configuration_active(&self, id: ConfigurationId, active: bool) -> StoreResult<()>;

    /// Configurações ativas; com `only`, apenas aquela (se ativa).
    fn active_configurations(&self, only: Option<ConfigurationId>) -> StoreResult<Vec<Configuration>> {
        Ok(self
            .configurations()?
            .into_iter()
            .filter(|c| c.is_active && only.is_none_or(|id| c.id == id))
            .collect())
    }

    /// Insere ou atualiza o cliente identificado por (documento, CEP).
    fn upsert_customer(&self, customer: Customer) -> StoreResult<Customer>;
    fn customer(&self, id: u64) -> StoreResult<Option<Customer>>;

    /// Busca o pedido por (número, número da loja, configuração) ou cria
    /// `candidate`. Um pedido existente nunca é sobrescrito.
    fn get_or_create_order(&self, candidate: Order) -> StoreResult<(Order, bool)>;
    fn order(&self, id: OrderId) -> StoreResult<Order>;

    /// Grava a linha do pedido, exceto `running`, `processed` e `sent_label`,
    /// que têm setters próprios. Rederiva `search_label` da configuração e
    /// mantém CANCELLED se já estiver gravado; `order` recebe o resultado.
    fn save_order(&self, order: &mut Order) -> StoreResult<()>;
    fn set_running(&self, id: OrderId, running: bool) -> StoreResult<()>;
    fn set_processed(&self, id: OrderId) -> StoreResult<()>;
    fn set_sent_label(&self, id: OrderId, sent: bool) -> StoreResult<()>;
    fn set_integrator_id(&self, id: OrderId, integrator_id: i64) -> StoreResult<()>;

    /// Atualização de status em lote, respeitando CANCELLED.
    fn update_status(&self, ids: &[OrderId], status: OrderStatus) -> StoreResult<usize>;

    /// Substitui todos os itens do pedido.
    fn replace_items(&self, order_id: OrderId, items: Vec<OrderItem>) -> StoreResult<()>;
    fn items(&self, order_id: OrderId) -> StoreResult<Vec<OrderItem>>;

    /// Seleciona e marca `running=true` numa única transação.
    fn claim_orders(&self, filter: OrderFilter) -> StoreResult<Vec<OrderId>>;

    /// Varredura de recuperação: zera `running` de todos os pedidos.
    fn reset_running(&self) -> StoreResult<usize>;

    /// Pedidos da configuração cujos identificadores do Tiny estão na lista.
    fn orders_by_identifiers(
        &self,
        configuration_id: ConfigurationId,
        identifiers: &[i64],
    ) -> StoreResult<Vec<Order>>;

    /// Pedido por (número, id no integrador), opcionalmente restrito à configuração.
    fn find_by_integrator(
        &self,
        number: i64,
        integrator_id: i64,
        configuration_id: Option<ConfigurationId>,
    ) -> StoreResult<Option<Order>>;

    /// Remove o pedido e seus itens, devolvendo a linha removida.
    fn delete_order(&self, id: OrderId) -> StoreResult<Order>;
}

/// Arquivos de nota e etiqueta, endereçados por caminho relativo.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Grava sobrescrevendo o conteúdo anterior.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> StoreResult<()>;
    async fn get(&self, path: &str) -> StoreResult<Vec<u8>>;
    /// Remove o arquivo; ausência não é erro.
    async fn delete(&self, path: &str) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Configuration;

    fn order() -> Order {
        let configuration = Configuration {
            id: 1,
            name: "loja".into(),
            token: "t".into(),
            token_integrator: "i".into(),
            status: None,
            days: 3,
            search_labels: true,
            use_invoice_items: false,
            is_active: true,
        };
        Order::new(&configuration, 10)
    }

    #[test]
    fn running_orders_never_match() {
        let mut order = order();
        assert!(OrderFilter::SearchUpdateOrders.matches(&order));
        order.running = true;
        assert!(!OrderFilter::SearchUpdateOrders.matches(&order));
    }

    #[test]
    fn search_expedition_requires_imported_without_label() {
        let mut order = order();
        assert!(!OrderFilter::SearchExpedition.matches(&order));
        order.status = OrderStatus::Imported;
        assert!(OrderFilter::SearchExpedition.matches(&order));
        order.label = Some("loja/1.pdf".into());
        assert!(!OrderFilter::SearchExpedition.matches(&order));
    }

    #[test]
    fn pending_labels_skip_cancelled_and_sent() {
        let mut order = order();
        order.label = Some("loja/1.zpl".into());
        order.status = OrderStatus::Imported;
        assert!(OrderFilter::PendingSendLabels.matches(&order));

        order.sent_label = true;
        assert!(!OrderFilter::PendingSendLabels.matches(&order));

        order.sent_label = false;
        order.status = OrderStatus::Cancelled;
        assert!(!OrderFilter::PendingSendLabels.matches(&order));
    }

    #[test]
    fn processed_orders_are_not_updated() {
        let mut order = order();
        order.processed = true;
        assert!(!OrderFilter::SearchUpdateOrders.matches(&order));
    }
}
