use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::model::{Customer, Order, OrderItem};

/// Corpo de `POST orders/simple`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPayload {
    pub order_number: Option<i64>,
    pub observation: Option<String>,
    pub cnpj_transport: Option<String>,
    pub customer: Option<CustomerPayload>,
    pub items: Vec<ItemPayload>,
}

impl OrderPayload {
    pub fn new(order: &Order, customer: Option<&Customer>, items: &[OrderItem]) -> Self {
        Self {
            order_number: order.number,
            observation: order.observation.clone(),
            cnpj_transport: order.cnpj_transport.clone(),
            customer: customer.map(CustomerPayload::from),
            items: items.iter().map(ItemPayload::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerPayload {
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

impl From<&Customer> for CustomerPayload {
    fn from(customer: &Customer) -> Self {
        Self {
            name: customer.name.clone(),
            fantasy_name: customer.fantasy_name.clone(),
            address: customer.address.clone(),
            complement: customer.complement.clone(),
            neighbourhood: customer.neighbourhood.clone(),
            city: customer.city.clone(),
            state: customer.state.clone(),
            postal_code: customer.postal_code.clone(),
            cnpj_cpf: customer.cnpj_cpf.clone(),
            number: customer.number.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPayload {
    pub idseq: u32,
    pub product: Option<String>,
    pub description: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl From<&OrderItem> for ItemPayload {
    fn from(item: &OrderItem) -> Self {
        Self {
            idseq: item.idseq,
            product: item.product.clone(),
            description: item.description.clone(),
            unit_of_measurement: item.unit_of_measurement.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
        }
    }
}

/// Pedido como listado pelo integrador (`results[]`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IntegratorOrder {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub order_number: Option<i64>,
}

/// Página de `GET orders`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IntegratorPage {
    #[serde(default)]
    pub results: Vec<IntegratorOrder>,
    #[serde(default = "default_total_pages")]
    pub total_pages: u32,
}

fn default_total_pages() -> u32 {
    1
}

// Aceita número ou string numérica; qualquer outra coisa vira `None`.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_accepts_string_ids() {
        let page: IntegratorPage = serde_json::from_value(json!({
            "results": [{"id": 5, "order_number": "1001"}, {"id": "6", "order_number": null}],
            "total_pages": 3
        }))
        .unwrap();
        assert_eq!(page.results[0].order_number, Some(1001));
        assert_eq!(page.results[1].id, Some(6));
        assert_eq!(page.results[1].order_number, None);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn page_defaults() {
        let page: IntegratorPage = serde_json::from_value(json!({})).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.total_pages, 1);
    }
}
