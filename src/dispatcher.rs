//! Despachante de tarefas: limites de taxa por tipo, retentativa com backoff
//! exponencial para falhas de sistema e liberação do pedido reivindicado.
//!
//! No modo servidor um worker consome uma fila limitada e executa cada tarefa
//! numa task própria; o agendador alimenta a mesma fila em intervalos fixos.
//! Na CLI, [`Dispatcher::drain`] executa uma tarefa e as seguintes em sequência.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use governor::DefaultDirectRateLimiter;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::ScheduleSettings;
use crate::error::Result;
use crate::orchestrator::SyncOrchestrator;
use crate::state_machine::{FailureKind, RateLimit, RetryConfig, Task, TaskKind};

/// Capacidade da fila do worker.
pub const QUEUE_CAPACITY: usize = 1024;

/// Desfecho final de uma tarefa, depois das retentativas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Concluída; traz as tarefas seguintes a despachar.
    Completed(Vec<Task>),
    /// A entidade alvo não existe mais.
    Skipped,
    Failed(FailureKind),
}

/// Totais de uma execução sequencial.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: Vec<(Task, FailureKind)>,
}

// Aborta a task interna se a externa for cancelada.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<SyncOrchestrator>,
    retry: RetryConfig,
    limiters: Arc<HashMap<TaskKind, DefaultDirectRateLimiter>>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        retry: RetryConfig,
        limits: &HashMap<TaskKind, RateLimit>,
    ) -> Self {
        let limiters = limits
            .iter()
            .map(|(kind, limit)| (*kind, DefaultDirectRateLimiter::direct(limit.quota())))
            .collect();
        Self {
            orchestrator,
            retry,
            limiters: Arc::new(limiters),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Executa a tarefa respeitando o limite do seu tipo. Tarefas que chegam
    /// com o pedido reivindicado o liberam ao final, mesmo em pânico.
    pub async fn execute(&self, task: Task) -> TaskOutcome {
        let span = info_span!("task", %task, run = %Uuid::new_v4());
        async {
            if let Some(limiter) = self.limiters.get(&task.kind()) {
                limiter.until_ready().await;
            }

            let outcome = self.guarded(task.clone()).await;

            if let (true, Some(id)) = (task.holds_order(), task.order_id()) {
                if let Err(e) = self.orchestrator.release(id) {
                    error!("could not release order {id}: {e}");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    // Isola pânicos numa task própria.
    async fn guarded(&self, task: Task) -> TaskOutcome {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.attempt(&task).await }.in_current_span());
        let _abort = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                error!("task panicked");
                TaskOutcome::Failed(FailureKind::System("task panicked".into()))
            }
            Err(_) => TaskOutcome::Failed(FailureKind::System("task cancelled".into())),
        }
    }

    async fn attempt(&self, task: &Task) -> TaskOutcome {
        let mut retries = 0;
        loop {
            let error = match self.orchestrator.run_task(task).await {
                Ok(next) => return TaskOutcome::Completed(next),
                Err(e) if e.is_missing() => {
                    debug!("{e}, task skipped");
                    return TaskOutcome::Skipped;
                }
                Err(e) => e,
            };

            match error.failure_kind() {
                FailureKind::System(reason) if retries < self.retry.max_retries => {
                    retries += 1;
                    let delay_ms = self.retry.delay_for_attempt(retries);
                    warn!(
                        "Retry {retries}/{}: {reason} (waiting {delay_ms}ms)",
                        self.retry.max_retries
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                kind => {
                    error!(retries, "{kind}");
                    return TaskOutcome::Failed(kind);
                }
            }
        }
    }

    /// Executa `task` e todas as tarefas que ela gerar, uma de cada vez.
    pub async fn drain(&self, task: Task) -> DrainReport {
        let mut report = DrainReport::default();
        let mut pending = VecDeque::from([task]);
        while let Some(task) = pending.pop_front() {
            match self.execute(task.clone()).await {
                TaskOutcome::Completed(next) => {
                    report.completed += 1;
                    pending.extend(next);
                }
                TaskOutcome::Skipped => report.skipped += 1,
                TaskOutcome::Failed(kind) => report.failed.push((task, kind)),
            }
        }
        report
    }

    /// Worker do modo servidor. Ao receber o sinal de parada aborta as tarefas
    /// em andamento e roda a varredura de recuperação.
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<Task>,
        sender: mpsc::Sender<Task>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut running = JoinSet::new();
        info!("dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = queue.recv() => {
                    let Some(task) = received else { break };
                    let this = self.clone();
                    let sender = sender.clone();
                    running.spawn(async move {
                        if let TaskOutcome::Completed(next) = this.execute(task).await {
                            for follow_up in next {
                                if sender.send(follow_up).await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("dispatcher task panicked");
                        }
                    }
                }
            }
        }

        info!(in_flight = running.len(), "dispatcher stopping");
        running.shutdown().await;
        self.orchestrator.recover()?;
        Ok(())
    }
}

/// Fila limitada compartilhada pelo worker, pelo agendador e pela CLI.
pub fn queue() -> (mpsc::Sender<Task>, mpsc::Receiver<Task>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Ciclos periódicos ativos; intervalo zero desativa o ciclo.
pub fn scheduled_tasks(schedule: &ScheduleSettings) -> Vec<(Duration, Task)> {
    [
        (schedule.sync_orders_secs, Task::SyncOrders(None)),
        (schedule.search_expeditions_secs, Task::SearchExpeditions),
        (schedule.send_labels_secs, Task::SendLabels),
        (schedule.sync_cancelled_secs, Task::SyncCancelled(None)),
        (schedule.sync_processed_secs, Task::SyncProcessed(None)),
        (schedule.send_awaiting_secs, Task::SendOrdersAwaitingIntegration),
    ]
    .into_iter()
    .filter(|(secs, _)| *secs > 0)
    .map(|(secs, task)| (Duration::from_secs(secs), task))
    .collect()
}

/// Enfileira cada tarefa no seu intervalo até o sinal de parada.
pub async fn run_scheduler(
    sender: mpsc::Sender<Task>,
    entries: Vec<(Duration, Task)>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tickers = JoinSet::new();
    for (period, task) in entries {
        let sender = sender.clone();
        info!(%task, every_secs = period.as_secs(), "scheduled");
        tickers.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if sender.send(task.clone()).await.is_err() {
                    break;
                }
            }
        });
    }

    let _ = shutdown.changed().await;
    tickers.shutdown().await;
}
