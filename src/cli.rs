//! Interface de linha de comando do tiny-sync baseada em clap.
//!
//! Define a struct [`Cli`] com os subcomandos [`Command`] (servidor, drivers
//! de sincronização e ações administrativas por pedido) e as flags globais
//! `--config` e `--verbose`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::{ConfigurationId, NewConfiguration, OrderId, StatusFilter};
use crate::state_machine::Task;

/// tiny-sync: sincronização de pedidos entre o Tiny ERP e o integrador.
#[derive(Debug, Parser)]
#[command(name = "tiny-sync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: tiny-sync.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sobe o receptor de webhooks, o agendador e o worker.
    Serve,

    /// Busca os pedidos recentes no Tiny e atualiza os novos.
    Sync {
        /// Restringe a uma configuração.
        #[arg(long)]
        configuration: Option<ConfigurationId>,
    },

    /// Atualiza todos os pedidos aguardando arquivos.
    UpdateOrders,
    /// Atualiza um pedido e segue a cadeia.
    UpdateOrder { id: OrderId },

    /// Busca expedição e etiquetas dos pedidos importados.
    SearchExpeditions,
    /// Busca expedição e etiquetas de um pedido.
    SearchExpedition { id: OrderId },

    /// Envia um pedido ao integrador.
    SendOrder { id: OrderId },
    /// Envia todos os pedidos aguardando integração.
    SendAwaiting,
    /// Envia o XML da nota de um pedido.
    SendBilling { id: OrderId },

    /// Envia a etiqueta de um pedido.
    SendLabel { id: OrderId },
    /// Envia as etiquetas pendentes.
    SendLabels,

    /// Pede o cancelamento de um pedido já cancelado localmente.
    SendCancelation { id: OrderId },

    /// Procura o pedido no integrador pelo número.
    GetOrderInIntegrator { id: OrderId },

    /// Sincroniza os pedidos cancelados no Tiny.
    SyncCancelled {
        #[arg(long)]
        configuration: Option<ConfigurationId>,
    },

    /// Marca os pedidos processados pelo integrador.
    SyncProcessed {
        #[arg(long)]
        configuration: Option<ConfigurationId>,
    },

    /// Libera pedidos presos como em execução.
    Recover,

    /// Remove um pedido, seus itens e arquivos.
    DeleteOrder { id: OrderId },

    /// Administra as configurações (lojas).
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Cadastra uma configuração.
    Add(AddConfiguration),
    /// Lista as configurações.
    List,
    /// Desativa uma configuração.
    Disable { id: ConfigurationId },
}

#[derive(Debug, Args)]
pub struct AddConfiguration {
    /// Nome da loja; também é a pasta dos arquivos.
    #[arg(long)]
    pub name: String,

    /// Token da API do Tiny.
    #[arg(long)]
    pub token: String,

    /// Token do integrador.
    #[arg(long)]
    pub token_integrator: String,

    /// Situação filtrada na busca de pedidos.
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,

    /// Janela de busca retroativa, em dias.
    #[arg(long, default_value_t = 3)]
    pub days: u32,

    /// Busca etiquetas das expedições.
    #[arg(long, default_value_t = false)]
    pub search_labels: bool,

    /// Usa os itens da nota no lugar dos itens do pedido.
    #[arg(long, default_value_t = false)]
    pub use_invoice_items: bool,
}

impl From<AddConfiguration> for NewConfiguration {
    fn from(args: AddConfiguration) -> Self {
        NewConfiguration {
            name: args.name,
            token: args.token,
            token_integrator: args.token_integrator,
            status: args.status,
            days: args.days,
            search_labels: args.search_labels,
            use_invoice_items: args.use_invoice_items,
        }
    }
}

impl Command {
    /// Tarefa executada pelo comando, se for um comando de sincronização.
    pub fn task(&self) -> Option<Task> {
        let task = match self {
            Command::Sync { configuration } => Task::SyncOrders(*configuration),
            Command::UpdateOrders => Task::UpdateOrders,
            Command::UpdateOrder { id } => Task::UpdateOrder(*id),
            Command::SearchExpeditions => Task::SearchExpeditions,
            Command::SearchExpedition { id } => Task::SearchExpedition(*id),
            Command::SendOrder { id } => Task::SendOrder(*id),
            Command::SendAwaiting => Task::SendOrdersAwaitingIntegration,
            Command::SendBilling { id } => Task::SendBilling(*id),
            Command::SendLabel { id } => Task::SendLabel(*id),
            Command::SendLabels => Task::SendLabels,
            Command::SendCancelation { id } => Task::SendCancelation(*id),
            Command::GetOrderInIntegrator { id } => Task::GetOrderInIntegrator(*id),
            Command::SyncCancelled { configuration } => Task::SyncCancelled(*configuration),
            Command::SyncProcessed { configuration } => Task::SyncProcessed(*configuration),
            Command::Serve | Command::Recover | Command::DeleteOrder { .. } | Command::Config(_) => {
                return None;
            }
        };
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_order_subcommand() {
        let cli = Cli::parse_from(["tiny-sync", "update-order", "42"]);
        assert_eq!(cli.command.task(), Some(Task::UpdateOrder(42)));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["tiny-sync", "--config", "prod.toml", "--verbose", "sync", "--configuration", "2"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));
        assert_eq!(cli.command.task(), Some(Task::SyncOrders(Some(2))));
    }

    #[test]
    fn cli_maps_batch_commands() {
        let cli = Cli::parse_from(["tiny-sync", "send-awaiting"]);
        assert_eq!(cli.command.task(), Some(Task::SendOrdersAwaitingIntegration));

        let cli = Cli::parse_from(["tiny-sync", "sync-cancelled"]);
        assert_eq!(cli.command.task(), Some(Task::SyncCancelled(None)));

        let cli = Cli::parse_from(["tiny-sync", "serve"]);
        assert_eq!(cli.command.task(), None);
    }

    #[test]
    fn cli_parses_config_add() {
        let cli = Cli::parse_from([
            "tiny-sync",
            "config",
            "add",
            "--name",
            "loja",
            "--token",
            "t",
            "--token-integrator",
            "i",
            "--status",
            "preparando-envio",
            "--search-labels",
        ]);
        match cli.command {
            Command::Config(ConfigCommand::Add(args)) => {
                let new = NewConfiguration::from(args);
                assert_eq!(new.name, "loja");
                assert_eq!(new.days, 3);
                assert_eq!(new.status, Some(StatusFilter::PreparandoEnvio));
                assert!(new.search_labels);
                assert!(!new.use_invoice_items);
            }
            _ => panic!("expected Config Add command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
