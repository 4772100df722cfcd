use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use governor::Quota;
use serde::{Deserialize, Serialize};

use crate::model::{ConfigurationId, OrderId};

/// Distingue falhas de negócio de falhas de infraestrutura.
/// Falhas de sistema são retentadas pelo despachante; as de negócio não.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A API respondeu com um erro de negócio ou status HTTP de falha.
    Business(String),
    /// Infraestrutura falhou (rede, armazenamento, timeout).
    System(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Business(msg) => write!(f, "Business failure: {msg}"),
            FailureKind::System(msg) => write!(f, "System failure: {msg}"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries before giving up on a task.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Unidade de trabalho executada pelo despachante.
///
/// Tarefas de lote (`UpdateOrders`, `SearchExpeditions`, ...) reivindicam
/// pedidos e devolvem as tarefas individuais a despachar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SyncOrders(Option<ConfigurationId>),
    SyncCancelled(Option<ConfigurationId>),
    SyncProcessed(Option<ConfigurationId>),
    UpdateOrders,
    UpdateOrder(OrderId),
    SearchExpeditions,
    SearchExpedition(OrderId),
    SendLabels,
    SendLabel(OrderId),
    SendOrdersAwaitingIntegration,
    SendOrder(OrderId),
    SendBilling(OrderId),
    SendCancelation(OrderId),
    GetOrderInIntegrator(OrderId),
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::SyncOrders(_) => TaskKind::SyncOrders,
            Task::SyncCancelled(_) => TaskKind::SyncCancelled,
            Task::SyncProcessed(_) => TaskKind::SyncProcessed,
            Task::UpdateOrders => TaskKind::UpdateOrders,
            Task::UpdateOrder(_) => TaskKind::UpdateOrder,
            Task::SearchExpeditions => TaskKind::SearchExpeditions,
            Task::SearchExpedition(_) => TaskKind::SearchExpedition,
            Task::SendLabels => TaskKind::SendLabels,
            Task::SendLabel(_) => TaskKind::SendLabel,
            Task::SendOrdersAwaitingIntegration => TaskKind::SendOrdersAwaitingIntegration,
            Task::SendOrder(_) => TaskKind::SendOrder,
            Task::SendBilling(_) => TaskKind::SendBilling,
            Task::SendCancelation(_) => TaskKind::SendCancelation,
            Task::GetOrderInIntegrator(_) => TaskKind::GetOrderInIntegrator,
        }
    }

    /// Pedido alvo, para tarefas de um único pedido.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Task::UpdateOrder(id)
            | Task::SearchExpedition(id)
            | Task::SendLabel(id)
            | Task::SendOrder(id)
            | Task::SendBilling(id)
            | Task::SendCancelation(id)
            | Task::GetOrderInIntegrator(id) => Some(*id),
            _ => None,
        }
    }

    /// Tarefas cujo pedido chega reivindicado (`running=true`) por um driver
    /// e deve ser liberado ao final, inclusive em pânico.
    pub fn holds_order(&self) -> bool {
        matches!(
            self,
            Task::UpdateOrder(_) | Task::SearchExpedition(_) | Task::SendLabel(_) | Task::SendOrder(_)
        )
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order_id() {
            Some(id) => write!(f, "{}[{id}]", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Tipo de tarefa, usado como chave dos limites de taxa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SyncOrders,
    SyncCancelled,
    SyncProcessed,
    UpdateOrders,
    UpdateOrder,
    SearchExpeditions,
    SearchExpedition,
    SendLabels,
    SendLabel,
    SendOrdersAwaitingIntegration,
    SendOrder,
    SendBilling,
    SendCancelation,
    GetOrderInIntegrator,
}

impl TaskKind {
    pub const ALL: [TaskKind; 14] = [
        TaskKind::SyncOrders,
        TaskKind::SyncCancelled,
        TaskKind::SyncProcessed,
        TaskKind::UpdateOrders,
        TaskKind::UpdateOrder,
        TaskKind::SearchExpeditions,
        TaskKind::SearchExpedition,
        TaskKind::SendLabels,
        TaskKind::SendLabel,
        TaskKind::SendOrdersAwaitingIntegration,
        TaskKind::SendOrder,
        TaskKind::SendBilling,
        TaskKind::SendCancelation,
        TaskKind::GetOrderInIntegrator,
    ];

    /// Limites padrão por tipo de tarefa.
    pub fn default_rate_limit(self) -> Option<RateLimit> {
        match self {
            TaskKind::UpdateOrders => Some(RateLimit::per_second(1)),
            TaskKind::UpdateOrder | TaskKind::SendOrder => Some(RateLimit::per_minute(4)),
            TaskKind::GetOrderInIntegrator | TaskKind::SendCancelation => {
                Some(RateLimit::per_minute(10))
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::SyncOrders => "sync_orders",
            TaskKind::SyncCancelled => "sync_cancelled",
            TaskKind::SyncProcessed => "sync_processed",
            TaskKind::UpdateOrders => "update_orders",
            TaskKind::UpdateOrder => "update_order",
            TaskKind::SearchExpeditions => "search_expeditions",
            TaskKind::SearchExpedition => "search_expedition",
            TaskKind::SendLabels => "send_labels",
            TaskKind::SendLabel => "send_label",
            TaskKind::SendOrdersAwaitingIntegration => "send_orders_awaiting_integration",
            TaskKind::SendOrder => "send_order",
            TaskKind::SendBilling => "send_billing",
            TaskKind::SendCancelation => "send_cancelation",
            TaskKind::GetOrderInIntegrator => "get_order_in_integrator",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind `{s}`"))
    }
}

/// Unidade de tempo de um limite de taxa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
}

/// Limite "no máximo N por período", no formato `N/s`, `N/m` ou `N/h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: NonZeroU32,
    pub period: RatePeriod,
}

impl RateLimit {
    pub fn per_second(count: u32) -> Self {
        Self::new(count, RatePeriod::Second)
    }

    pub fn per_minute(count: u32) -> Self {
        Self::new(count, RatePeriod::Minute)
    }

    fn new(count: u32, period: RatePeriod) -> Self {
        Self {
            count: NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN),
            period,
        }
    }

    /// Cota sem rajada: as chamadas saem espaçadas em `período / N`.
    pub fn quota(self) -> Quota {
        let quota = match self.period {
            RatePeriod::Second => Quota::per_second(self.count),
            RatePeriod::Minute => Quota::per_minute(self.count),
            RatePeriod::Hour => Quota::per_hour(self.count),
        };
        quota.allow_burst(NonZeroU32::MIN)
    }
}

impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid rate limit `{s}`, expected N/s, N/m or N/h"))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("invalid rate limit count in `{s}`"))?;
        let count = NonZeroU32::new(count).ok_or_else(|| format!("rate limit `{s}` must be positive"))?;
        let period = match period.trim() {
            "s" => RatePeriod::Second,
            "m" => RatePeriod::Minute,
            "h" => RatePeriod::Hour,
            other => return Err(format!("invalid rate limit period `{other}`")),
        };
        Ok(Self { count, period })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period {
            RatePeriod::Second => "s",
            RatePeriod::Minute => "m",
            RatePeriod::Hour => "h",
        };
        write!(f, "{}/{unit}", self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::RateLimiter;
    use governor::clock::FakeRelativeClock;
    use std::time::Duration;

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
    }

    #[test]
    fn failure_kind_display() {
        let biz = FailureKind::Business("pedido inexistente".into());
        assert_eq!(biz.to_string(), "Business failure: pedido inexistente");

        let sys = FailureKind::System("timeout".into());
        assert_eq!(sys.to_string(), "System failure: timeout");
    }

    #[test]
    fn task_kind_and_order() {
        assert_eq!(Task::UpdateOrder(7).kind(), TaskKind::UpdateOrder);
        assert_eq!(Task::UpdateOrder(7).order_id(), Some(7));
        assert_eq!(Task::UpdateOrders.order_id(), None);
        assert_eq!(Task::SendLabel(3).to_string(), "send_label[3]");
        assert!(Task::SendOrder(1).holds_order());
        assert!(!Task::SendBilling(1).holds_order());
    }

    #[test]
    fn default_rate_limits() {
        assert_eq!(TaskKind::UpdateOrders.default_rate_limit(), Some(RateLimit::per_second(1)));
        assert_eq!(TaskKind::SendOrder.default_rate_limit(), Some(RateLimit::per_minute(4)));
        assert_eq!(
            TaskKind::GetOrderInIntegrator.default_rate_limit(),
            Some(RateLimit::per_minute(10))
        );
        assert_eq!(TaskKind::SearchExpeditions.default_rate_limit(), None);
    }

    #[test]
    fn rate_limit_parsing() {
        let limit: RateLimit = "10/m".parse().unwrap();
        assert_eq!(limit, RateLimit::per_minute(10));
        assert_eq!(limit.to_string(), "10/m");
        assert!("0/s".parse::<RateLimit>().is_err());
        assert!("10/d".parse::<RateLimit>().is_err());
        assert!("ten".parse::<RateLimit>().is_err());
    }

    #[test]
    fn task_kind_parses_from_name() {
        assert_eq!("send_order".parse::<TaskKind>().unwrap(), TaskKind::SendOrder);
        assert!("nope".parse::<TaskKind>().is_err());
    }

    fn admitted_within(limit: RateLimit, seconds: u32) -> usize {
        let clock = FakeRelativeClock::default();
        let limiter = RateLimiter::direct_with_clock(limit.quota(), clock.clone());
        let mut admitted = 0;
        for _ in 0..seconds {
            while limiter.check().is_ok() {
                admitted += 1;
            }
            clock.advance(Duration::from_secs(1));
        }
        admitted
    }

    #[test]
    fn rate_limit_admits_at_most_count_per_period() {
        assert_eq!(admitted_within(RateLimit::per_minute(4), 60), 4);
        assert_eq!(admitted_within(RateLimit::per_minute(4), 120), 8);
        assert_eq!(admitted_within(RateLimit::per_minute(60), 60), 60);
    }
}
