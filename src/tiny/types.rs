//! Registros tipados extraídos das respostas da API do Tiny.
//!
//! Cada registro é construído de forma defensiva a partir de um
//! [`serde_json::Value`]: chaves ausentes ou com tipo inesperado viram o
//! valor neutro (`None`, zero, lista vazia), nunca um erro.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::format;
use crate::state_machine::InvoiceStatus;

// Texto de um campo; números são convertidos para string.
pub(crate) fn field_str(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// Inteiro de um campo que pode vir como número ou string numérica.
pub(crate) fn field_i64(data: &Value, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_decimal(data: &Value, key: &str) -> Decimal {
    field_str(data, key)
        .map(|raw| format::parse_decimal(&raw))
        .unwrap_or(Decimal::ZERO)
}

fn items_from(data: &Value) -> Vec<OrderItemData> {
    data.get("itens")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|entry| OrderItemData::from_value(entry.get("item").unwrap_or(&Value::Null)))
                .collect()
        })
        .unwrap_or_default()
}

/// Dados do cliente (`cliente`) normalizados.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct CustomerData {
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

impl CustomerData {
    pub fn from_value(data: &Value) -> Self {
        let text = |key| field_str(data, key).and_then(|v| format::normalize_text(&v));
        let name = |key| field_str(data, key).and_then(|v| format::normalize_name(&v));

        Self {
            name: name("nome"),
            fantasy_name: name("nome_fantasia"),
            address: text("endereco"),
            complement: text("complemento"),
            neighbourhood: text("bairro"),
            city: text("cidade"),
            state: text("uf"),
            postal_code: field_str(data, "cep")
                .map(|cep| format::format_zip_code(&cep))
                .unwrap_or_default(),
            cnpj_cpf: field_str(data, "cpf_cnpj")
                .and_then(|doc| format::format_document(&doc))
                .unwrap_or_default(),
            number: field_str(data, "numero").map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        }
    }
}

/// Item de pedido ou de nota fiscal (`itens[].item`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemData {
    pub product: Option<String>,
    pub description: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl OrderItemData {
    pub fn from_value(data: &Value) -> Self {
        Self {
            product: field_str(data, "codigo"),
            description: field_str(data, "descricao"),
            unit_of_measurement: field_str(data, "unidade"),
            quantity: field_decimal(data, "quantidade"),
            unit_price: field_decimal(data, "valor_unitario"),
        }
    }

    /// Quantidade vezes preço unitário; zero se o produto estourar.
    pub fn total_price(&self) -> Decimal {
        match self.quantity.checked_mul(self.unit_price) {
            Some(total) => format::round_money(total),
            None => {
                warn!(
                    product = self.product.as_deref().unwrap_or_default(),
                    quantity = %self.quantity,
                    unit_price = %self.unit_price,
                    "item total overflows, using zero"
                );
                Decimal::ZERO
            }
        }
    }
}

/// Resumo de pedido retornado pela pesquisa (`pedidos[].pedido`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub identifier: Option<i64>,
    pub number: Option<i64>,
    pub number_store: Option<String>,
}

impl OrderSummary {
    pub fn from_value(data: &Value) -> Self {
        Self {
            identifier: field_i64(data, "id"),
            number: field_i64(data, "numero"),
            number_store: field_str(data, "numero_ecommerce").filter(|n| !n.trim().is_empty()),
        }
    }
}

/// Pedido completo (`pedido`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    pub number: Option<i64>,
    pub number_store: Option<String>,
    pub observation: Option<String>,
    pub customer: CustomerData,
    pub items: Vec<OrderItemData>,
    pub invoice_id: Option<i64>,
}

impl OrderDetail {
    pub fn from_value(data: &Value) -> Self {
        Self {
            number: field_i64(data, "numero"),
            number_store: field_str(data, "numero_ecommerce").filter(|n| !n.trim().is_empty()),
            observation: field_str(data, "obs").and_then(|obs| format::clean_observation(&obs)),
            customer: CustomerData::from_value(data.get("cliente").unwrap_or(&Value::Null)),
            items: items_from(data),
            invoice_id: field_i64(data, "id_nota_fiscal").filter(|id| *id > 0),
        }
    }
}

/// Nota fiscal (`nota_fiscal`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceDetail {
    pub sequence: Option<i64>,
    pub access_key: Option<String>,
    pub invoice: Option<i64>,
    pub invoice_status: InvoiceStatus,
    pub cnpj_transport: Option<String>,
    pub items: Vec<OrderItemData>,
}

impl InvoiceDetail {
    pub fn from_value(data: &Value) -> Self {
        let transport = data
            .get("transportador")
            .or_else(|| data.get("transport"))
            .unwrap_or(&Value::Null);

        Self {
            sequence: field_i64(data, "serie"),
            access_key: field_str(data, "chave_acesso")
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            invoice: field_i64(data, "numero"),
            invoice_status: field_i64(data, "situacao")
                .and_then(InvoiceStatus::from_code)
                .unwrap_or_default(),
            cnpj_transport: field_str(transport, "cpf_cnpj").and_then(|doc| format::format_document(&doc)),
            items: items_from(data),
        }
    }
}

/// Expedição vinculada a uma nota (`expedicao`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ExpeditionInfo {
    pub expedition_id: Option<i64>,
    pub group_expedition_id: Option<i64>,
}

impl ExpeditionInfo {
    pub fn from_value(data: &Value) -> Self {
        Self {
            expedition_id: field_i64(data, "id"),
            group_expedition_id: field_i64(data, "idAgrupamento"),
        }
    }
}
