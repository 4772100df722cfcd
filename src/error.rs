use std::path::PathBuf;

use thiserror::Error;

use crate::model::{ConfigurationId, OrderId};
use crate::state_machine::FailureKind;

/// Erro de uma operação da cadeia: a API remota recusou o pedido ou respondeu
/// com um status HTTP de falha. Capturado e registrado nas fronteiras de
/// orquestração para não bloquear os demais pedidos do lote.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Erro de negócio embutido numa resposta 200 (`retorno.erros`).
    #[error("{0}")]
    Remote(String),

    /// Resposta HTTP fora da faixa de sucesso.
    #[error("Connection error by {service} (status {status})")]
    Connection { service: &'static str, status: u16 },
}

/// Erros da camada de persistência.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// Outro processo mantém o banco aberto.
    #[error("store {} is locked by another process", .0.display())]
    Locked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl StoreError {
    pub fn order(id: OrderId) -> Self {
        StoreError::NotFound { entity: "order", id }
    }

    pub fn configuration(id: ConfigurationId) -> Self {
        StoreError::NotFound { entity: "configuration", id }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Entidade local removida entre o agendamento e a execução.
    pub fn is_missing(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::NotFound { .. }))
    }

    /// Classifica a falha para a política de retentativa do despachante.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Operation(e) => FailureKind::Business(e.to_string()),
            SyncError::Config(msg) => FailureKind::Business(msg.clone()),
            other => FailureKind::System(other.to_string()),
        }
    }

    pub fn as_operation(&self) -> Option<&OperationError> {
        match self {
            SyncError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_display() {
        let err = OperationError::Remote("A consulta não retornou registros".into());
        assert_eq!(err.to_string(), "A consulta não retornou registros");

        let err = OperationError::Connection { service: "Tiny", status: 502 };
        assert_eq!(err.to_string(), "Connection error by Tiny (status 502)");
    }

    #[test]
    fn missing_entities_are_detected() {
        let err = SyncError::from(StoreError::order(7));
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "Store error: order 7 not found");

        let err = SyncError::from(OperationError::Remote("x".into()));
        assert!(!err.is_missing());
    }

    #[test]
    fn failure_classification() {
        let err = SyncError::from(OperationError::Remote("token inválido".into()));
        assert_eq!(err.failure_kind(), FailureKind::Business("token inválido".into()));

        let err = SyncError::from(std::io::Error::other("disk full"));
        assert!(matches!(err.failure_kind(), FailureKind::System(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
