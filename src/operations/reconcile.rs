//! Conciliação com o estado do integrador.

use tracing::{debug, info};

use super::Context;
use crate::error::Result;
use crate::model::{Configuration, Order};
use crate::state_machine::OrderStatus;

const PROCESSED: &str = "processed";

/// Procura o pedido no integrador pelo número. Sem resultados o pedido é
/// cancelado; com resultados adota o primeiro id. Falha HTTP não altera nada.
pub async fn get_order_in_integrator(ctx: &Context, configuration: &Configuration, order: &mut Order) -> Result<()> {
    let Some(number) = order.number else {
        debug!(order = %order, "order without number cannot be looked up");
        return Ok(());
    };

    let Some(results) = ctx
        .integrator
        .find_orders(&configuration.token_integrator, number)
        .await?
    else {
        return Ok(());
    };

    match results.first() {
        None => {
            ctx.store.update_status(&[order.id], OrderStatus::Cancelled)?;
            order.update_status(OrderStatus::Cancelled);
            info!(order = %order, "order missing in integrator, cancelled");
        }
        Some(found) => match found.id {
            Some(integrator_id) => {
                ctx.store.set_integrator_id(order.id, integrator_id)?;
                order.integrator_id = Some(integrator_id);
                info!(order = %order, integrator_id, "integrator id adopted");
            }
            None => debug!(order = %order, "integrator result without id"),
        },
    }
    Ok(())
}

/// Marca como processados os pedidos que o integrador lista como
/// `processed`, página a página. Devolve quantos foram marcados.
pub async fn get_processed_orders(ctx: &Context, configuration: &Configuration) -> Result<usize> {
    let mut marked = 0;
    let mut page = 1;
    loop {
        let Some(listing) = ctx
            .integrator
            .list_orders(&configuration.token_integrator, PROCESSED, page)
            .await?
        else {
            break;
        };

        for result in &listing.results {
            let (Some(integrator_id), Some(number)) = (result.id, result.order_number) else {
                continue;
            };
            match ctx.store.find_by_integrator(number, integrator_id, Some(configuration.id))? {
                Some(order) if !order.processed => {
                    ctx.store.set_processed(order.id)?;
                    marked += 1;
                }
                Some(_) => {}
                None => debug!(number, integrator_id, "processed order not found locally"),
            }
        }

        if page >= listing.total_pages {
            break;
        }
        page += 1;
    }

    info!(configuration = %configuration.name, marked, "processed orders synced");
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::integrator::{IntegratorOrder, IntegratorPage};
    use crate::store::Store;

    #[tokio::test]
    async fn zero_results_cancel_order() {
        let h = Harness::new();
        let mut order = h.order(1001);

        get_order_in_integrator(&h.ctx, &h.configuration, &mut order).await.unwrap();

        assert!(order.is_cancelled());
        assert!(h.store.order(order.id).unwrap().is_cancelled());
        assert_eq!(h.integrator.calls(), vec!["orders?order_number=1001"]);
    }

    #[tokio::test]
    async fn zero_results_cancel_imported_order() {
        let h = Harness::new();
        let mut order = h.order(1002);
        order.status = OrderStatus::Imported;
        order.integrator_id = Some(55);
        h.save(&mut order);

        get_order_in_integrator(&h.ctx, &h.configuration, &mut order).await.unwrap();

        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.integrator_id, Some(55));
        assert!(order.is_cancelled());
    }

    #[tokio::test]
    async fn first_result_id_is_adopted() {
        let h = Harness::with_integrator(FakeIntegrator {
            lookup: Some(vec![
                IntegratorOrder { id: Some(31), order_number: Some(1001) },
                IntegratorOrder { id: Some(32), order_number: Some(1001) },
            ]),
            ..Default::default()
        });
        let mut order = h.order(1001);

        get_order_in_integrator(&h.ctx, &h.configuration, &mut order).await.unwrap();
        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.integrator_id, Some(31));
        assert!(!stored.is_cancelled());
    }

    #[tokio::test]
    async fn failed_lookup_is_noop() {
        let h = Harness::with_integrator(FakeIntegrator {
            lookup: None,
            ..Default::default()
        });
        let mut order = h.order(1001);

        get_order_in_integrator(&h.ctx, &h.configuration, &mut order).await.unwrap();
        let stored = h.store.order(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::AwaitingFiles);
        assert_eq!(stored.integrator_id, None);
    }

    #[tokio::test]
    async fn processed_pages_are_followed() {
        let h = Harness::with_integrator(FakeIntegrator {
            pages: vec![
                IntegratorPage {
                    results: vec![IntegratorOrder { id: Some(31), order_number: Some(1001) }],
                    total_pages: 2,
                },
                IntegratorPage {
                    results: vec![
                        IntegratorOrder { id: Some(32), order_number: Some(1002) },
                        IntegratorOrder { id: Some(99), order_number: Some(4242) },
                    ],
                    total_pages: 2,
                },
            ],
            ..Default::default()
        });
        let mut first = h.order(1001);
        first.integrator_id = Some(31);
        h.save(&mut first);
        let mut second = h.order(1002);
        second.integrator_id = Some(32);
        h.save(&mut second);
        let mut mismatched = h.order(1003);
        mismatched.integrator_id = Some(99);
        h.save(&mut mismatched);

        let marked = get_processed_orders(&h.ctx, &h.configuration).await.unwrap();

        assert_eq!(marked, 2);
        assert!(h.store.order(first.id).unwrap().processed);
        assert!(h.store.order(second.id).unwrap().processed);
        assert!(!h.store.order(mismatched.id).unwrap().processed);
        assert_eq!(
            h.integrator.calls(),
            vec!["orders?status__in=processed&page=1", "orders?status__in=processed&page=2"]
        );
    }
}
