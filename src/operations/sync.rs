//! Pesquisa de pedidos no Tiny: novos pedidos e pedidos cancelados.

use chrono::{Duration, Local, NaiveDate};
use tracing::{debug, info};

use super::{Context, push, request};
use crate::error::Result;
use crate::format;
use crate::model::{Configuration, Order, OrderId};
use crate::state_machine::OrderStatus;
use crate::tiny::OrderSummary;

const SEARCH_RESOURCE: &str = "pedidos.pesquisa.php";

/// Resultado de uma sincronização de pedidos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub seen: usize,
    pub created: usize,
}

/// Janela `dataInicialOcorrencia`/`dataFinalOcorrencia` de `days` dias até `today`.
fn lookback_params(days: u32, today: NaiveDate) -> Vec<(&'static str, String)> {
    let start = today - Duration::days(i64::from(days));
    vec![
        ("dataInicialOcorrencia", format::tiny_date(start)),
        ("dataFinalOcorrencia", format::tiny_date(today)),
        ("sort", "DESC".to_string()),
    ]
}

/// Percorre todas as páginas da pesquisa de pedidos.
async fn search_orders(
    ctx: &Context,
    configuration: &Configuration,
    situacao: Option<&str>,
) -> Result<Vec<OrderSummary>> {
    let today = Local::now().date_naive();
    let mut orders = Vec::new();
    let mut page = 1;
    loop {
        let mut params = lookback_params(configuration.days, today);
        if let Some(situacao) = situacao {
            params.push(("situacao", situacao.to_string()));
        }
        params.push(("pagina", page.to_string()));

        let response = request(ctx, configuration, SEARCH_RESOURCE, params).await?;
        orders.extend(response.orders());

        if page >= response.page_count() {
            break;
        }
        page += 1;
    }
    Ok(orders)
}

/// Cria localmente os pedidos recentes da configuração. Pedidos já
/// conhecidos por (número, número da loja) ficam intactos.
pub async fn sync_orders(ctx: &Context, configuration: &Configuration) -> Result<SyncReport> {
    info!(configuration = %configuration.name, "Starting an order sync...");

    let situacao = configuration.status.map(|status| status.as_param());
    let summaries = search_orders(ctx, configuration, situacao).await?;

    let mut report = SyncReport::default();
    for summary in summaries {
        let Some(identifier) = summary.identifier else {
            debug!(?summary, "order without identifier skipped");
            continue;
        };
        report.seen += 1;

        let mut candidate = Order::new(configuration, identifier);
        candidate.number = summary.number;
        candidate.number_store = summary.number_store;
        let (_, created) = ctx.store.get_or_create_order(candidate)?;
        if created {
            report.created += 1;
        }
    }

    info!(
        configuration = %configuration.name,
        seen = report.seen,
        created = report.created,
        "Sync finished"
    );
    Ok(report)
}

/// Marca como cancelados os pedidos que o Tiny lista como `cancelado`.
///
/// Cada pedido passa antes pelo envio de cancelamento ao integrador, que só
/// age sobre pedidos já cancelados localmente.
pub async fn get_cancelled_orders(ctx: &Context, configuration: &Configuration) -> Result<usize> {
    info!(configuration = %configuration.name, "Starting the search for canceled orders...");

    let identifiers: Vec<i64> = search_orders(ctx, configuration, Some("cancelado"))
        .await?
        .into_iter()
        .filter_map(|summary| summary.identifier)
        .collect();

    let orders: Vec<Order> = ctx
        .store
        .orders_by_identifiers(configuration.id, &identifiers)?
        .into_iter()
        .filter(|order| !order.is_cancelled())
        .collect();

    for order in &orders {
        push::send_cancelation(ctx, configuration, order).await?;
    }

    let ids: Vec<OrderId> = orders.iter().map(|order| order.id).collect();
    let cancelled = ctx.store.update_status(&ids, OrderStatus::Cancelled)?;
    if cancelled > 0 {
        info!(configuration = %configuration.name, cancelled, "Orders canceled");
    }
    info!(configuration = %configuration.name, "End of search for canceled orders");
    Ok(cancelled)
}
