//! Entidades persistidas: configurações, clientes, pedidos e itens.

use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::state_machine::{InvoiceStatus, OrderStatus, StateMachine, Transition};

pub type ConfigurationId = u64;
pub type CustomerId = u64;
pub type OrderId = u64;

/// Filtro de situação aplicado na pesquisa de pedidos do Tiny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    Aberto,
    Aprovado,
    PreparandoEnvio,
    Faturado,
    ProntoEnvio,
    Enviado,
    Entregue,
    Cancelado,
}

impl StatusFilter {
    /// Valor do parâmetro `situacao` na API do Tiny.
    pub fn as_param(self) -> &'static str {
        match self {
            StatusFilter::Aberto => "aberto",
            StatusFilter::Aprovado => "aprovado",
            StatusFilter::PreparandoEnvio => "preparando_envio",
            StatusFilter::Faturado => "faturado",
            StatusFilter::ProntoEnvio => "pronto_envio",
            StatusFilter::Enviado => "enviado",
            StatusFilter::Entregue => "entregue",
            StatusFilter::Cancelado => "cancelado",
        }
    }
}

/// Uma loja/tenant integrada. Criada apenas por provisionamento administrativo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: ConfigurationId,
    pub name: String,
    /// Token da API do Tiny.
    pub token: String,
    pub token_integrator: String,
    pub status: Option<StatusFilter>,
    /// Janela de busca retroativa, em dias.
    pub days: u32,
    pub search_labels: bool,
    pub use_invoice_items: bool,
    pub is_active: bool,
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration {}", self.name)
    }
}

/// Dados para provisionar uma nova configuração.
#[derive(Debug, Clone, Default)]
pub struct NewConfiguration {
    pub name: String,
    pub token: String,
    pub token_integrator: String,
    pub status: Option<StatusFilter>,
    pub days: u32,
    pub search_labels: bool,
    pub use_invoice_items: bool,
}

/// Cliente compartilhado entre pedidos, único por (documento, CEP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Customer {
    pub id: CustomerId,
    pub name: Option<String>,
    pub fantasy_name: Option<String>,
    pub address: Option<String>,
    pub complement: Option<String>,
    pub neighbourhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: String,
    pub cnpj_cpf: String,
    pub number: Option<String>,
}

/// Item de pedido; reconstruído integralmente a cada atualização.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub idseq: u32,
    pub product: Option<String>,
    pub description: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// O pedido, entidade central da sincronização.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Identificador do pedido no Tiny.
    pub identifier: i64,
    pub number: Option<i64>,
    pub number_store: Option<String>,
    pub observation: Option<String>,
    pub customer_id: Option<CustomerId>,
    pub cnpj_transport: Option<String>,
    pub invoice_id: Option<i64>,
    pub invoice: Option<i64>,
    pub sequence: Option<i64>,
    pub access_key: Option<String>,
    /// Caminho do XML da nota no armazenamento de arquivos.
    pub xml: Option<String>,
    /// Caminho da etiqueta no armazenamento de arquivos.
    pub label: Option<String>,
    pub configuration_id: ConfigurationId,
    pub integrator_id: Option<i64>,
    pub expedition_id: Option<i64>,
    pub group_expedition_id: Option<i64>,
    pub status: OrderStatus,
    pub invoice_status: InvoiceStatus,
    pub products: u32,
    pub search_label: bool,
    pub sent_label: bool,
    pub running: bool,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(configuration: &Configuration, identifier: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            identifier,
            number: None,
            number_store: None,
            observation: None,
            customer_id: None,
            cnpj_transport: None,
            invoice_id: None,
            invoice: None,
            sequence: None,
            access_key: None,
            xml: None,
            label: None,
            configuration_id: configuration.id,
            integrator_id: None,
            expedition_id: None,
            group_expedition_id: None,
            status: OrderStatus::AwaitingFiles,
            invoice_status: InvoiceStatus::Pending,
            products: 0,
            search_label: configuration.search_labels,
            sent_label: false,
            running: false,
            processed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A nota está final o bastante para exportar o XML?
    pub fn is_save_xml(&self) -> bool {
        self.invoice_status.is_available()
            && self.access_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// Aplica uma mudança de status respeitando a máquina de estados.
    pub fn update_status(&mut self, status: OrderStatus) -> Transition {
        let transition = StateMachine::next(self.status, status);
        self.status = transition.status();
        transition
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "{number}"),
            None => write!(f, "#{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration() -> Configuration {
        Configuration {
            id: 1,
            name: "loja".into(),
            token: "t".into(),
            token_integrator: "i".into(),
            status: None,
            days: 3,
            search_labels: true,
            use_invoice_items: false,
            is_active: true,
        }
    }

    #[test]
    fn new_order_defaults() {
        let order = Order::new(&configuration(), 99);
        assert_eq!(order.status, OrderStatus::AwaitingFiles);
        assert_eq!(order.invoice_status, InvoiceStatus::Pending);
        assert!(order.search_label);
        assert!(!order.running);
        assert_eq!(order.to_string(), "#0");
    }

    #[test]
    fn save_xml_requires_available_status_and_key() {
        let mut order = Order::new(&configuration(), 1);
        order.invoice_status = InvoiceStatus::Rejected;
        order.access_key = Some("3524".into());
        assert!(!order.is_save_xml());

        order.invoice_status = InvoiceStatus::Authorized;
        assert!(order.is_save_xml());

        order.access_key = Some("  ".into());
        assert!(!order.is_save_xml());
    }

    #[test]
    fn cancelled_order_keeps_status() {
        let mut order = Order::new(&configuration(), 1);
        order.update_status(OrderStatus::Cancelled);
        let t = order.update_status(OrderStatus::AwaitingFiles);
        assert!(t.is_ignored());
        assert!(order.is_cancelled());
    }

    #[test]
    fn status_filter_param() {
        assert_eq!(StatusFilter::PreparandoEnvio.as_param(), "preparando_envio");
    }
}
