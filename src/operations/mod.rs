//! Cadeia de operações da sincronização.
//!
//! Cada operação monta os parâmetros (`formato=json`, `token` e os do
//! recurso), consulta o Tiny, aborta com [`OperationError::Remote`] se a
//! resposta trouxer erro, persiste o resultado e aciona a próxima etapa por
//! meio de um [`Successor`]. Em produção o sucessor é a própria [`Chain`];
//! os testes injetam um espião.

pub mod expedition;
pub mod invoice;
pub mod push;
pub mod reconcile;
pub mod sync;
pub mod update_order;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{OperationError, Result, SyncError};
use crate::integrator::Integrator;
use crate::model::{Configuration, Order};
use crate::store::{BlobStore, Store};
use crate::tiny::{OrderSource, TinyResponse};

/// Colaboradores externos compartilhados por todas as operações.
#[derive(Clone)]
pub struct Context {
    pub source: Arc<dyn OrderSource>,
    pub integrator: Arc<dyn Integrator>,
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Etapas encadeáveis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SaveInvoice,
    SaveInvoiceFile,
    SendOrder,
    SendBilling,
    SaveExpedition,
    SaveLabels,
    SendLabel,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::SaveInvoice => "Save Invoice",
            Step::SaveInvoiceFile => "Save Invoice File",
            Step::SendOrder => "Send Order",
            Step::SendBilling => "Send Billing",
            Step::SaveExpedition => "Save Expedition",
            Step::SaveLabels => "Save Labels",
            Step::SendLabel => "Send Label",
        };
        f.write_str(name)
    }
}

/// Próxima etapa de uma operação.
#[async_trait]
pub trait Successor: Send + Sync {
    async fn trigger(&self, step: Step, configuration: &Configuration, order: &mut Order) -> Result<()>;
}

/// Encadeamento real entre as operações.
pub struct Chain {
    ctx: Context,
}

impl Chain {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

#[async_trait]
impl Successor for Chain {
    async fn trigger(&self, step: Step, configuration: &Configuration, order: &mut Order) -> Result<()> {
        let ctx = &self.ctx;
        match step {
            Step::SaveInvoice => invoice::save_invoice(ctx, self, configuration, order).await,
            Step::SaveInvoiceFile => invoice::save_invoice_file(ctx, self, configuration, order).await,
            Step::SendOrder => push::send_order(ctx, self, configuration, order).await,
            Step::SendBilling => push::send_billing(ctx, self, configuration, order).await,
            Step::SaveExpedition => expedition::save_expedition_info(ctx, self, configuration, order).await,
            Step::SaveLabels => expedition::save_labels(ctx, self, configuration, order).await,
            Step::SendLabel => push::send_label(ctx, configuration, order).await,
        }
    }
}

/// GET num recurso do Tiny com os parâmetros base, falhando em erro de negócio.
pub(crate) async fn request(
    ctx: &Context,
    configuration: &Configuration,
    resource: &str,
    params: Vec<(&'static str, String)>,
) -> Result<TinyResponse> {
    let mut query = vec![
        ("formato", "json".to_string()),
        ("token", configuration.token.clone()),
    ];
    query.extend(params);

    let response = ctx.source.get(resource, &query).await?;
    if response.has_error() {
        let message = response
            .error_message()
            .unwrap_or_else(|| format!("{resource} returned an error"));
        return Err(OperationError::Remote(message).into());
    }
    Ok(response)
}

/// Aciona a próxima etapa registrando, sem propagar, erros de operação.
pub(crate) async fn trigger_logged(
    next: &dyn Successor,
    step: Step,
    configuration: &Configuration,
    order: &mut Order,
) -> Result<()> {
    match next.trigger(step, configuration, order).await {
        Err(SyncError::Operation(error)) => {
            warn!(order = %order, configuration = %configuration.name, "[{step}] {error}");
            Ok(())
        }
        other => other,
    }
}

/// Marca o pedido como em execução.
pub(crate) fn hold(ctx: &Context, order: &mut Order) -> Result<()> {
    if !order.running {
        ctx.store.set_running(order.id, true)?;
        order.running = true;
    }
    Ok(())
}

/// Libera o pedido em qualquer desfecho, preservando o erro original.
pub(crate) fn release<T>(ctx: &Context, order: &mut Order, outcome: Result<T>) -> Result<T> {
    let released = ctx.store.set_running(order.id, false);
    order.running = false;
    let value = outcome?;
    released?;
    Ok(value)
}

/// Nome base dos arquivos do pedido: o número, ou o identificador do Tiny.
pub(crate) fn file_stem(order: &Order) -> String {
    order
        .number
        .map_or_else(|| order.identifier.to_string(), |number| number.to_string())
}
