use serde_json::Value;
use tracing::{debug, info};

use super::update_order::save_items;
use super::{Context, Step, Successor, file_stem, request};
use crate::error::{OperationError, Result};
use crate::model::{Configuration, Order};
use crate::state_machine::OrderStatus;
use crate::store::blob_path;
use crate::tiny::InvoiceDetail;

/// Grava os dados da nota fiscal do pedido. Exporta o XML só quando a nota
/// está autorizada (ou com DANFE emitida) e tem chave de acesso.
pub async fn save_invoice(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let Some(invoice_id) = order.invoice_id else {
        debug!(order = %order, "order has no invoice yet");
        return Ok(());
    };

    let response = request(
        ctx,
        configuration,
        "nota.fiscal.obter.php",
        vec![("id", invoice_id.to_string())],
    )
    .await?;

    info!(order = %order, "Save invoice");
    let invoice = response
        .invoice()
        .unwrap_or_else(|| InvoiceDetail::from_value(&Value::Null));

    order.sequence = invoice.sequence;
    order.access_key = invoice.access_key;
    order.invoice = invoice.invoice;
    order.invoice_status = invoice.invoice_status;
    order.cnpj_transport = invoice.cnpj_transport;

    if configuration.use_invoice_items {
        order.products = save_items(ctx, order.id, &invoice.items)?;
    }
    ctx.store.save_order(order)?;

    if order.is_save_xml() {
        next.trigger(Step::SaveInvoiceFile, configuration, order).await?;
    } else {
        debug!(order = %order, status = order.invoice_status.label(), "invoice not ready for XML export");
    }
    Ok(())
}

/// Baixa o XML da nota, grava em `{configuração}/{número}.xml` e passa o
/// pedido para AWAITING_INTEGRATION.
pub async fn save_invoice_file(
    ctx: &Context,
    next: &dyn Successor,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    let invoice_id = order.invoice_id.unwrap_or_default();
    let response = request(
        ctx,
        configuration,
        "nota.fiscal.obter.xml.php",
        vec![("id", invoice_id.to_string())],
    )
    .await?;

    let xml = response
        .invoice_xml()?
        .ok_or_else(|| OperationError::Remote(format!("invoice {invoice_id} has no XML")))?;

    info!(order = %order, "Create xml file");
    let path = blob_path(&configuration.name, file_stem(order), "xml");
    ctx.blobs.put(&path, xml.into_bytes()).await?;
    order.xml = Some(path);

    order.update_status(OrderStatus::AwaitingIntegration);
    ctx.store.save_order(order)?;

    next.trigger(Step::SendOrder, configuration, order).await
}
