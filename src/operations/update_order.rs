use serde_json::Value;
use tracing::info;

use super::{Context, Step, Successor, hold, release, request, trigger_logged};
use crate::error::Result;
use crate::model::{Configuration, Customer, Order, OrderId, OrderItem};
use crate::state_machine::OrderStatus;
use crate::tiny::{CustomerData, OrderDetail, OrderItemData};

/// Recarrega o pedido completo do Tiny e segue para a nota fiscal.
///
/// O pedido fica marcado como em execução durante toda a operação, inclusive
/// nas etapas encadeadas, e é liberado em qualquer desfecho.
pub async fn update_order(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    hold(ctx, order)?;
    let outcome = refresh(ctx, next, configuration, order).await;
    release(ctx, order, outcome)
}

async fn refresh(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let response = request(
        ctx,
        configuration,
        "pedido.obter.php",
        vec![("id", order.identifier.to_string())],
    )
    .await?;

    info!(order = %order, configuration = %configuration.name, "Update order");
    let detail = response
        .order()
        .unwrap_or_else(|| OrderDetail::from_value(&Value::Null));

    let customer = ctx.store.upsert_customer(customer_from(detail.customer))?;
    order.customer_id = Some(customer.id);
    if detail.number.is_some() {
        order.number = detail.number;
    }
    order.number_store = detail.number_store;
    order.observation = detail.observation;
    order.invoice_id = detail.invoice_id;

    if !configuration.use_invoice_items {
        order.products = save_items(ctx, order.id, &detail.items)?;
    }

    if order.is_cancelled() {
        ctx.store.save_order(order)?;
        info!(order = %order, "order is cancelled, chain stops after refresh");
        return Ok(());
    }

    order.update_status(OrderStatus::AwaitingFiles);
    ctx.store.save_order(order)?;

    trigger_logged(next, Step::SaveInvoice, configuration, order).await
}

fn customer_from(data: CustomerData) -> Customer {
    Customer {
        id: 0,
        name: data.name,
        fantasy_name: data.fantasy_name,
        address: data.address,
        complement: data.complement,
        neighbourhood: data.neighbourhood,
        city: data.city,
        state: data.state,
        postal_code: data.postal_code,
        cnpj_cpf: data.cnpj_cpf,
        number: data.number,
    }
}

/// Substitui os itens do pedido, numerando-os a partir de 1. Devolve a quantidade.
pub(crate) fn save_items(ctx: &Context, order_id: OrderId, items: &[OrderItemData]) -> Result<u32> {
    let items: Vec<OrderItem> = items
        .iter()
        .zip(1..)
        .map(|(item, idseq)| OrderItem {
            order_id,
            idseq,
            product: item.product.clone(),
            description: item.description.clone(),
            unit_of_measurement: item.unit_of_measurement.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price(),
        })
        .collect();
    let count = u32::try_from(items.len()).unwrap_or(u32::MAX);
    ctx.store.replace_items(order_id, items)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::store::Store;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn order_response() -> Value {
        json!({
            "retorno": {
                "status": "OK",
                "pedido": {
                    "numero": "1001",
                    "numero_ecommerce": "LJ-1",
                    "obs": "entregar\r\nna portaria",
                    "id_nota_fiscal": "555",
                    "cliente": {
                        "nome": "maria  souza",
                        "cpf_cnpj": "12345678901",
                        "cep": "01310-100",
                        "cidade": "são paulo"
                    },
                    "itens": [
                        {"item": {"codigo": "A", "quantidade": "2", "valor_unitario": "1,50"}},
                        {"item": {"codigo": "B", "quantidade": "1", "valor_unitario": "10"}}
                    ]
                }
            }
        })
    }

    #[tokio::test]
    async fn refresh_saves_customer_items_and_chains_invoice() {
        let h = Harness::new();
        h.source.respond("pedido.obter.php", order_response());
        let mut order = h.order(1001);
        let spy = Spy::default();

        update_order(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();

        assert_eq!(spy.steps(), vec![Step::SaveInvoice]);
        assert_eq!(h.source.param("pedido.obter.php", "id").as_deref(), Some("10010"));

        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.invoice_id, Some(555));
        assert_eq!(stored.number_store.as_deref(), Some("LJ-1"));
        assert_eq!(stored.observation.as_deref(), Some("entregar  na portaria"));
        assert_eq!(stored.products, 2);
        assert!(!stored.running);

        let customer = h.store.customer(stored.customer_id.unwrap()).unwrap().unwrap();
        assert_eq!(customer.name.as_deref(), Some("MARIA SOUZA"));
        assert_eq!(customer.cnpj_cpf, "123.456.789-01");

        let items = h.store.items(order.id).unwrap();
        assert_eq!(items[0].idseq, 1);
        assert_eq!(items[0].total_price, Decimal::new(300, 2));
        assert_eq!(items[1].idseq, 2);
    }

    #[tokio::test]
    async fn invoice_items_mode_keeps_order_items() {
        let mut h = Harness::new();
        h.configuration.use_invoice_items = true;
        h.source.respond("pedido.obter.php", order_response());
        let mut order = h.order(1001);

        update_order(&h.ctx, &Spy::default(), &h.configuration, &mut order)
            .await
            .unwrap();
        assert!(h.store.items(order.id).unwrap().is_empty());
        assert_eq!(h.store.order(order.id).unwrap().products, 0);
    }

    #[tokio::test]
    async fn running_flag_released_after_success() {
        let h = Harness::new();
        h.source.respond("pedido.obter.php", order_response());
        let mut order = h.order(1001);
        h.store.set_running(order.id, true).unwrap();
        order.running = true;

        update_order(&h.ctx, &Spy::default(), &h.configuration, &mut order)
            .await
            .unwrap();
        assert!(!h.store.order(order.id).unwrap().running);
    }

    #[tokio::test]
    async fn running_flag_released_after_error() {
        let h = Harness::new();
        h.source.respond(
            "pedido.obter.php",
            json!({"retorno": {"status": "Erro", "erros": [{"erro": "Pedido não localizado"}]}}),
        );
        let mut order = h.order(1001);

        let err = update_order(&h.ctx, &Spy::default(), &h.configuration, &mut order)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Pedido não localizado");
        assert!(!h.store.order(order.id).unwrap().running);
    }

    #[tokio::test]
    async fn invoice_failures_are_logged_not_raised() {
        let h = Harness::new();
        h.source.respond("pedido.obter.php", order_response());
        let mut order = h.order(1001);
        let spy = Spy::failing("Nota fiscal não encontrada");

        update_order(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();
        assert_eq!(spy.steps(), vec![Step::SaveInvoice]);
    }

    #[tokio::test]
    async fn cancelled_order_is_refreshed_but_not_chained() {
        let h = Harness::new();
        h.source.respond("pedido.obter.php", order_response());
        let mut order = h.order(1001);
        h.store.update_status(&[order.id], OrderStatus::Cancelled).unwrap();
        order = h.store.order(order.id).unwrap();
        let spy = Spy::default();

        update_order(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();
        assert!(spy.steps().is_empty());
        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.invoice_id, Some(555));
    }
}
