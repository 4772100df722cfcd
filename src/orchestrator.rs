use tracing::{debug, info, warn};

use crate::error::{Result, StoreError, SyncError};
use crate::model::{Configuration, ConfigurationId, Order, OrderId};
use crate::operations::{Chain, Context, expedition, push, reconcile, sync, update_order};
use crate::state_machine::Task;
use crate::store::OrderFilter;

/// Executa as tarefas de sincronização sobre a cadeia de operações.
///
/// Tarefas de lote reivindicam seus pedidos e devolvem as tarefas individuais
/// a despachar; como a reivindicação já foi gravada quando elas retornam, o
/// despacho sempre acontece depois do commit.
pub struct SyncOrchestrator {
    chain: Chain,
}

/// Registra um erro de operação e segue; os demais erros sobem.
fn absorb(task: &Task, outcome: Result<()>) -> Result<()> {
    match outcome {
        Err(SyncError::Operation(error)) => {
            warn!(%task, "{error}");
            Ok(())
        }
        other => other,
    }
}

impl SyncOrchestrator {
    pub fn new(ctx: Context) -> Self {
        Self { chain: Chain::new(ctx) }
    }

    pub fn context(&self) -> &Context {
        self.chain.context()
    }

    /// Executa uma tarefa e devolve as tarefas seguintes.
    pub async fn run_task(&self, task: &Task) -> Result<Vec<Task>> {
        debug!(%task, "running task");
        match task {
            Task::SyncOrders(only) => self.sync_orders(*only).await,
            Task::SyncCancelled(only) => {
                for configuration in self.configurations(*only)? {
                    let outcome = sync::get_cancelled_orders(self.context(), &configuration).await;
                    absorb(task, outcome.map(|_| ()))?;
                }
                Ok(Vec::new())
            }
            Task::SyncProcessed(only) => {
                for configuration in self.configurations(*only)? {
                    let outcome = reconcile::get_processed_orders(self.context(), &configuration).await;
                    absorb(task, outcome.map(|_| ()))?;
                }
                Ok(Vec::new())
            }
            Task::UpdateOrders => self.claim(OrderFilter::SearchUpdateOrders, Task::UpdateOrder),
            Task::SearchExpeditions => self.claim(OrderFilter::SearchExpedition, Task::SearchExpedition),
            Task::SendLabels => self.claim(OrderFilter::PendingSendLabels, Task::SendLabel),
            Task::SendOrdersAwaitingIntegration => {
                self.claim(OrderFilter::AwaitingIntegration, Task::SendOrder)
            }
            Task::UpdateOrder(id)
            | Task::SearchExpedition(id)
            | Task::SendLabel(id)
            | Task::SendOrder(id)
            | Task::SendBilling(id)
            | Task::SendCancelation(id)
            | Task::GetOrderInIntegrator(id) => {
                let outcome = self.run_order_task(task, *id).await;
                absorb(task, outcome)?;
                Ok(Vec::new())
            }
        }
    }

    async fn sync_orders(&self, only: Option<ConfigurationId>) -> Result<Vec<Task>> {
        let mut synced = false;
        for configuration in self.configurations(only)? {
            match sync::sync_orders(self.context(), &configuration).await {
                Ok(_) => synced = true,
                Err(SyncError::Operation(error)) => {
                    warn!(configuration = %configuration.name, "Sync orders: {error}");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(if synced { vec![Task::UpdateOrders] } else { Vec::new() })
    }

    async fn run_order_task(&self, task: &Task, id: OrderId) -> Result<()> {
        let ctx = self.context();
        let mut order = ctx.store.order(id)?;
        let configuration = ctx.store.configuration(order.configuration_id)?;
        let chain = &self.chain;

        match task {
            Task::UpdateOrder(_) => update_order::update_order(ctx, chain, &configuration, &mut order).await,
            Task::SearchExpedition(_) => {
                expedition::save_expedition_info(ctx, chain, &configuration, &mut order).await
            }
            Task::SendLabel(_) => push::send_label(ctx, &configuration, &mut order).await,
            Task::SendOrder(_) => push::send_order(ctx, chain, &configuration, &mut order).await,
            Task::SendBilling(_) => push::send_billing(ctx, chain, &configuration, &mut order).await,
            Task::SendCancelation(_) => push::send_cancelation(ctx, &configuration, &order).await,
            Task::GetOrderInIntegrator(_) => {
                reconcile::get_order_in_integrator(ctx, &configuration, &mut order).await
            }
            _ => Ok(()),
        }
    }

    fn configurations(&self, only: Option<ConfigurationId>) -> Result<Vec<Configuration>> {
        Ok(self.context().store.active_configurations(only)?)
    }

    fn claim(&self, filter: OrderFilter, task: fn(OrderId) -> Task) -> Result<Vec<Task>> {
        let ids = self.context().store.claim_orders(filter)?;
        if !ids.is_empty() {
            info!(?filter, orders = ids.len(), "orders claimed for dispatch");
        }
        Ok(ids.into_iter().map(task).collect())
    }

    /// Libera o pedido reivindicado por uma tarefa. Pedido já removido não é erro.
    pub fn release(&self, id: OrderId) -> Result<()> {
        match self.context().store.set_running(id, false) {
            Err(StoreError::NotFound { .. }) | Ok(()) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Varredura de recuperação: zera `running` deixado por execuções interrompidas.
    pub fn recover(&self) -> Result<usize> {
        let reset = self.context().store.reset_running()?;
        info!(reset, "running flags reset");
        Ok(reset)
    }

    /// Remove o pedido, seus itens e os arquivos de XML e etiqueta.
    pub async fn delete_order(&self, id: OrderId) -> Result<Order> {
        let ctx = self.context();
        let order = ctx.store.delete_order(id)?;
        for path in [&order.xml, &order.label].into_iter().flatten() {
            ctx.blobs.delete(path).await?;
        }
        info!(order = %order, "order deleted");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::testing::*;
    use crate::state_machine::OrderStatus;
    use crate::store::{BlobStore, Store};
    use serde_json::json;

    fn orchestrator(h: &Harness) -> SyncOrchestrator {
        SyncOrchestrator::new(h.ctx.clone())
    }

    #[tokio::test]
    async fn sync_orders_schedules_update() {
        let h = Harness::new();
        h.source.respond(
            "pedidos.pesquisa.php",
            json!({"retorno": {"pedidos": [{"pedido": {"id": 1, "numero": 1}}]}}),
        );
        let next = orchestrator(&h).run_task(&Task::SyncOrders(None)).await.unwrap();
        assert_eq!(next, vec![Task::UpdateOrders]);
    }

    #[tokio::test]
    async fn sync_business_error_is_absorbed() {
        let h = Harness::new();
        h.source.respond(
            "pedidos.pesquisa.php",
            json!({"retorno": {"status": "Erro", "erros": [{"erro": "A consulta não retornou registros"}]}}),
        );
        let next = orchestrator(&h).run_task(&Task::SyncOrders(None)).await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn batch_claims_before_fan_out() {
        let h = Harness::new();
        let first = h.order(1);
        let second = h.order(2);

        let next = orchestrator(&h).run_task(&Task::UpdateOrders).await.unwrap();

        assert_eq!(next, vec![Task::UpdateOrder(first.id), Task::UpdateOrder(second.id)]);
        assert!(h.store.order(first.id).unwrap().running);
        assert!(h.store.order(second.id).unwrap().running);
        assert!(orchestrator(&h).run_task(&Task::UpdateOrders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_awaiting_claims_awaiting_integration() {
        let h = Harness::new();
        let mut order = h.order(1);
        order.status = OrderStatus::AwaitingIntegration;
        h.save(&mut order);
        h.order(2);

        let next = orchestrator(&h)
            .run_task(&Task::SendOrdersAwaitingIntegration)
            .await
            .unwrap();
        assert_eq!(next, vec![Task::SendOrder(order.id)]);
    }

    #[tokio::test]
    async fn order_task_operation_error_is_absorbed() {
        let h = Harness::new();
        h.source.respond(
            "pedido.obter.php",
            json!({"retorno": {"status": "Erro", "erros": [{"erro": "Pedido não localizado"}]}}),
        );
        let order = h.order(1);
        let next = orchestrator(&h).run_task(&Task::UpdateOrder(order.id)).await.unwrap();
        assert!(next.is_empty());
        assert!(!h.store.order(order.id).unwrap().running);
    }

    #[tokio::test]
    async fn deleted_order_is_missing() {
        let h = Harness::new();
        let err = orchestrator(&h).run_task(&Task::SendOrder(404)).await.unwrap_err();
        assert!(err.is_missing());
    }

    #[tokio::test]
    async fn delete_removes_blobs() {
        let h = Harness::new();
        let mut order = h.order(1);
        h.blobs.put("loja/1.xml", b"x".to_vec()).await.unwrap();
        h.blobs.put("loja/1.pdf", b"y".to_vec()).await.unwrap();
        order.xml = Some("loja/1.xml".into());
        order.label = Some("loja/1.pdf".into());
        h.save(&mut order);

        orchestrator(&h).delete_order(order.id).await.unwrap();
        assert!(h.blobs.paths().is_empty());
        assert!(h.store.order(order.id).is_err());
    }

    #[tokio::test]
    async fn recover_resets_claims() {
        let h = Harness::new();
        h.order(1);
        h.order(2);
        let orch = orchestrator(&h);
        orch.run_task(&Task::UpdateOrders).await.unwrap();
        assert_eq!(orch.recover().unwrap(), 2);
    }
}
