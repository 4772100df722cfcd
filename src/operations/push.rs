//! Envios ao integrador: pedido, faturamento, etiqueta e cancelamento.

use tracing::{debug, info, warn};

use super::{Context, Step, Successor, trigger_logged};
use crate::error::Result;
use crate::integrator::OrderPayload;
use crate::model::{Configuration, Order};
use crate::state_machine::OrderStatus;
use crate::store::file_name;

/// Cria o pedido no integrador. Com o id devolvido o pedido passa a
/// IMPORTED; a linha é gravada em qualquer caso antes do faturamento.
pub async fn send_order(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let customer = match order.customer_id {
        Some(id) => ctx.store.customer(id)?,
        None => None,
    };
    let items = ctx.store.items(order.id)?;
    let payload = OrderPayload::new(order, customer.as_ref(), &items);

    let created = ctx
        .integrator
        .push_order(&configuration.token_integrator, &payload)
        .await?;

    match created {
        Some(integrator_id) => {
            info!(order = %order, integrator_id, "order imported by integrator");
            order.integrator_id = Some(integrator_id);
            order.update_status(OrderStatus::Imported);
        }
        None => warn!(order = %order, "integrator returned no id"),
    }
    ctx.store.save_order(order)?;

    next.trigger(Step::SendBilling, configuration, order).await
}

/// Envia o XML da nota. Sem id no integrador não faz nada; com busca de
/// etiquetas ativa segue para a expedição.
pub async fn send_billing(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let Some(integrator_id) = order.integrator_id else {
        debug!(order = %order, "billing skipped, order not in integrator");
        return Ok(());
    };

    match &order.xml {
        Some(path) => {
            let xml = ctx.blobs.get(path).await?;
            let accepted = ctx
                .integrator
                .push_billing(&configuration.token_integrator, integrator_id, file_name(path), xml)
                .await?;
            if !accepted {
                warn!(order = %order, integrator_id, "billing rejected by integrator");
            }
        }
        None => debug!(order = %order, "billing skipped, order has no XML"),
    }

    if order.search_label {
        trigger_logged(next, Step::SaveExpedition, configuration, order).await?;
    }
    Ok(())
}

/// Envia a etiqueta gravada e marca `sent_label` quando aceita.
pub async fn send_label(ctx: &Context, configuration: &Configuration, order: &mut Order) -> Result<()> {
    let (Some(integrator_id), Some(path)) = (order.integrator_id, order.label.clone()) else {
        debug!(order = %order, "label upload skipped");
        return Ok(());
    };

    let label = ctx.blobs.get(&path).await?;
    let accepted = ctx
        .integrator
        .push_label(&configuration.token_integrator, integrator_id, file_name(&path), label)
        .await?;

    if accepted {
        ctx.store.set_sent_label(order.id, true)?;
        order.sent_label = true;
        info!(order = %order, "label sent to integrator");
    } else {
        warn!(order = %order, integrator_id, "label rejected by integrator");
    }
    Ok(())
}

/// Pede o cancelamento no integrador. Só age sobre pedidos com id no
/// integrador e já cancelados localmente.
pub async fn send_cancelation(ctx: &Context, configuration: &Configuration, order: &Order) -> Result<()> {
    let Some(integrator_id) = order.integrator_id else {
        debug!(order = %order, "cancelation skipped, order not in integrator");
        return Ok(());
    };
    if !order.is_cancelled() {
        debug!(order = %order, status = %order.status, "cancelation skipped, order not cancelled");
        return Ok(());
    }

    let accepted = ctx
        .integrator
        .push_cancelation(&configuration.token_integrator, integrator_id)
        .await?;
    if accepted {
        info!(order = %order, integrator_id, "cancelation sent to integrator");
    } else {
        warn!(order = %order, integrator_id, "cancelation rejected by integrator");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::model::Customer;
    use crate::store::{BlobStore, Store};

    fn awaiting_order(h: &Harness) -> Order {
        let mut order = h.order(1001);
        let customer = h
            .store
            .upsert_customer(Customer {
                name: Some("MARIA".into()),
                cnpj_cpf: "123.456.789-01".into(),
                postal_code: "01310-100".into(),
                ..Default::default()
            })
            .unwrap();
        order.customer_id = Some(customer.id);
        order.xml = Some("loja/1001.xml".into());
        order.status = OrderStatus::AwaitingIntegration;
        h.save(&mut order);
        order
    }

    #[tokio::test]
    async fn send_order_imports_and_chains_billing() {
        let h = Harness::new();
        let mut order = awaiting_order(&h);
        let spy = Spy::default();

        send_order(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();

        assert_eq!(spy.steps(), vec![Step::SendBilling]);
        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.integrator_id, Some(500));
        assert_eq!(stored.status, OrderStatus::Imported);

        let payloads = h.integrator.payloads.lock().clone();
        assert_eq!(payloads[0].order_number, Some(1001));
        assert_eq!(payloads[0].customer.as_ref().unwrap().cnpj_cpf, "123.456.789-01");
    }

    #[tokio::test]
    async fn send_order_without_id_still_persists_and_chains() {
        let h = Harness::with_integrator(FakeIntegrator {
            created_id: None,
            ..Default::default()
        });
        let mut order = awaiting_order(&h);
        let spy = Spy::default();

        send_order(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();
        assert_eq!(spy.steps(), vec![Step::SendBilling]);
        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.integrator_id, None);
        assert_eq!(stored.status, OrderStatus::AwaitingIntegration);
    }

    #[tokio::test]
    async fn no_integrator_id_means_no_outbound_calls() {
        let h = Harness::new();
        let mut order = awaiting_order(&h);
        order.label = Some("loja/1001.pdf".into());
        order.status = OrderStatus::Cancelled;
        let spy = Spy::default();

        send_billing(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();
        send_label(&h.ctx, &h.configuration, &mut order).await.unwrap();
        send_cancelation(&h.ctx, &h.configuration, &order).await.unwrap();

        assert!(h.integrator.calls().is_empty());
        assert!(spy.steps().is_empty());
    }

    #[tokio::test]
    async fn billing_uploads_xml_and_searches_expedition() {
        let h = Harness::new();
        h.blobs.put("loja/1001.xml", b"<nfe/>".to_vec()).await.unwrap();
        let mut order = awaiting_order(&h);
        order.integrator_id = Some(9);
        let spy = Spy::failing("Expedição não encontrada");

        send_billing(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();

        assert_eq!(h.integrator.calls(), vec!["orders/9/billing 1001.xml"]);
        assert_eq!(spy.steps(), vec![Step::SaveExpedition]);
    }

    #[tokio::test]
    async fn billing_without_label_search_stops() {
        let h = Harness::new();
        h.blobs.put("loja/1001.xml", b"<nfe/>".to_vec()).await.unwrap();
        let mut order = awaiting_order(&h);
        order.integrator_id = Some(9);
        order.search_label = false;
        let spy = Spy::default();

        send_billing(&h.ctx, &spy, &h.configuration, &mut order).await.unwrap();
        assert!(spy.steps().is_empty());
    }

    #[tokio::test]
    async fn label_sent_sets_flag() {
        let h = Harness::new();
        h.blobs.put("loja/1001.zpl", b"^XA^XZ".to_vec()).await.unwrap();
        let mut order = awaiting_order(&h);
        order.integrator_id = Some(9);
        order.label = Some("loja/1001.zpl".into());

        send_label(&h.ctx, &h.configuration, &mut order).await.unwrap();
        assert_eq!(h.integrator.calls(), vec!["orders/9/attachment 1001.zpl"]);
        assert!(h.store.order(order.id).unwrap().sent_label);
    }

    #[tokio::test]
    async fn rejected_label_keeps_flag_clear() {
        let h = Harness::with_integrator(FakeIntegrator {
            accept: false,
            ..Default::default()
        });
        h.blobs.put("loja/1001.zpl", b"^XA^XZ".to_vec()).await.unwrap();
        let mut order = awaiting_order(&h);
        order.integrator_id = Some(9);
        order.label = Some("loja/1001.zpl".into());

        send_label(&h.ctx, &h.configuration, &mut order).await.unwrap();
        assert!(!h.store.order(order.id).unwrap().sent_label);
    }

    #[tokio::test]
    async fn cancelation_requires_local_cancellation() {
        let h = Harness::new();
        let mut order = awaiting_order(&h);
        order.integrator_id = Some(9);

        send_cancelation(&h.ctx, &h.configuration, &order).await.unwrap();
        assert!(h.integrator.calls().is_empty());

        order.status = OrderStatus::Cancelled;
        send_cancelation(&h.ctx, &h.configuration, &order).await.unwrap();
        assert_eq!(h.integrator.calls(), vec!["orders/9/cancelation"]);
    }
}
