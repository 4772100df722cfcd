use std::fmt;

use serde::{Deserialize, Serialize};

/// Estados do ciclo de vida de um pedido.
///
/// O fluxo normal é: AWAITING_FILES → AWAITING_INTEGRATION → IMPORTED.
/// CANCELLED pode ser alcançado a partir de qualquer estado e é terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    AwaitingFiles,
    AwaitingIntegration,
    Imported,
    Cancelled,
}

impl OrderStatus {
    /// Posição no fluxo normal; `None` para CANCELLED, que fica fora da ordem.
    fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::AwaitingFiles => Some(0),
            OrderStatus::AwaitingIntegration => Some(1),
            OrderStatus::Imported => Some(2),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Cancelled
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::AwaitingFiles => "Aguardando arquivos",
            OrderStatus::AwaitingIntegration => "Aguardando integração",
            OrderStatus::Imported => "Importado",
            OrderStatus::Cancelled => "Cancelado",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::AwaitingFiles => write!(f, "AWAITING_FILES"),
            OrderStatus::AwaitingIntegration => write!(f, "AWAITING_INTEGRATION"),
            OrderStatus::Imported => write!(f, "IMPORTED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Situação da nota fiscal no Tiny (`situacao`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum InvoiceStatus {
    #[default]
    Pending = 1,
    Issued = 2,
    Cancelled = 3,
    AwaitingReceipt = 4,
    Rejected = 5,
    Authorized = 6,
    IssuedDanfe = 7,
    Registered = 8,
    AwaitingProtocol = 9,
    Denied = 10,
}

impl InvoiceStatus {
    /// Situações em que a nota é final o bastante para exportar o XML.
    pub const AVAILABLE: [InvoiceStatus; 2] = [InvoiceStatus::Authorized, InvoiceStatus::IssuedDanfe];

    pub fn from_code(code: i64) -> Option<Self> {
        let status = match code {
            1 => InvoiceStatus::Pending,
            2 => InvoiceStatus::Issued,
            3 => InvoiceStatus::Cancelled,
            4 => InvoiceStatus::AwaitingReceipt,
            5 => InvoiceStatus::Rejected,
            6 => InvoiceStatus::Authorized,
            7 => InvoiceStatus::IssuedDanfe,
            8 => InvoiceStatus::Registered,
            9 => InvoiceStatus::AwaitingProtocol,
            10 => InvoiceStatus::Denied,
            _ => return None,
        };
        Some(status)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_available(self) -> bool {
        Self::AVAILABLE.contains(&self)
    }

    pub fn label(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "Pendente",
            InvoiceStatus::Issued => "Emitida",
            InvoiceStatus::Cancelled => "Cancelada",
            InvoiceStatus::AwaitingReceipt => "Enviada - Aguardando recibo",
            InvoiceStatus::Rejected => "Rejeitada",
            InvoiceStatus::Authorized => "Autorizada",
            InvoiceStatus::IssuedDanfe => "Emitida DANFE",
            InvoiceStatus::Registered => "Registrada",
            InvoiceStatus::AwaitingProtocol => "Enviada - Aguardando protocolo",
            InvoiceStatus::Denied => "Denegada",
        }
    }
}

impl TryFrom<u8> for InvoiceStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code)).ok_or_else(|| format!("unknown invoice status {code}"))
    }
}

impl From<InvoiceStatus> for u8 {
    fn from(status: InvoiceStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.label())
    }
}

/// Resultado de avaliar uma mudança de status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// O status muda para o valor indicado.
    Next(OrderStatus),
    /// O pedido já está no status pedido; reentrada permitida.
    Stay(OrderStatus),
    /// A mudança foi recusada e o status atual é mantido.
    Ignored { current: OrderStatus, requested: OrderStatus },
}

impl Transition {
    /// Status efetivo depois da transição.
    pub fn status(self) -> OrderStatus {
        match self {
            Transition::Next(status) | Transition::Stay(status) => status,
            Transition::Ignored { current, .. } => current,
        }
    }

    pub fn is_ignored(self) -> bool {
        matches!(self, Transition::Ignored { .. })
    }
}

/// Regras de transição do status de um pedido.
pub struct StateMachine;

impl StateMachine {
    /// Calcula a transição de `current` para `requested`.
    ///
    /// - CANCELLED é terminal: nada sai dele.
    /// - CANCELLED pode ser pedido a partir de qualquer estado.
    /// - No fluxo normal só se avança ou se permanece; recuos são ignorados.
    pub fn next(current: OrderStatus, requested: OrderStatus) -> Transition {
        if current == requested {
            return Transition::Stay(current);
        }
        if current.is_terminal() {
            return Transition::Ignored { current, requested };
        }
        match (current.rank(), requested.rank()) {
            (_, None) => Transition::Next(requested),
            (Some(from), Some(to)) if to > from => Transition::Next(requested),
            _ => Transition::Ignored { current, requested },
        }
    }

    /// Status que deve prevalecer quando uma linha é regravada sobre o valor
    /// armazenado. Um pedido cancelado nunca volta para outro status.
    pub fn resolve(stored: OrderStatus, incoming: OrderStatus) -> OrderStatus {
        if stored.is_terminal() { stored } else { incoming }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_states() {
        let t = StateMachine::next(OrderStatus::AwaitingFiles, OrderStatus::AwaitingIntegration);
        assert_eq!(t, Transition::Next(OrderStatus::AwaitingIntegration));

        let t = StateMachine::next(OrderStatus::AwaitingIntegration, OrderStatus::Imported);
        assert_eq!(t, Transition::Next(OrderStatus::Imported));
    }

    #[test]
    fn reentering_awaiting_files_is_allowed() {
        let t = StateMachine::next(OrderStatus::AwaitingFiles, OrderStatus::AwaitingFiles);
        assert_eq!(t, Transition::Stay(OrderStatus::AwaitingFiles));
        assert!(!t.is_ignored());
    }

    #[test]
    fn cancellation_from_any_state() {
        for status in [
            OrderStatus::AwaitingFiles,
            OrderStatus::AwaitingIntegration,
            OrderStatus::Imported,
        ] {
            assert_eq!(
                StateMachine::next(status, OrderStatus::Cancelled),
                Transition::Next(OrderStatus::Cancelled)
            );
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        for status in [
            OrderStatus::AwaitingFiles,
            OrderStatus::AwaitingIntegration,
            OrderStatus::Imported,
        ] {
            let t = StateMachine::next(OrderStatus::Cancelled, status);
            assert!(t.is_ignored());
            assert_eq!(t.status(), OrderStatus::Cancelled);
        }
    }

    #[test]
    fn backward_moves_are_ignored() {
        let t = StateMachine::next(OrderStatus::Imported, OrderStatus::AwaitingFiles);
        assert!(t.is_ignored());
        assert_eq!(t.status(), OrderStatus::Imported);
    }

    #[test]
    fn resolve_keeps_cancelled() {
        assert_eq!(
            StateMachine::resolve(OrderStatus::Cancelled, OrderStatus::Imported),
            OrderStatus::Cancelled
        );
        assert_eq!(
            StateMachine::resolve(OrderStatus::Imported, OrderStatus::AwaitingFiles),
            OrderStatus::AwaitingFiles
        );
    }

    #[test]
    fn invoice_availability() {
        assert!(InvoiceStatus::Authorized.is_available());
        assert!(InvoiceStatus::IssuedDanfe.is_available());
        assert!(!InvoiceStatus::Rejected.is_available());
        assert_eq!(InvoiceStatus::from_code(5), Some(InvoiceStatus::Rejected));
        assert_eq!(InvoiceStatus::from_code(42), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(OrderStatus::AwaitingFiles.to_string(), "AWAITING_FILES");
        assert_eq!(OrderStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!(InvoiceStatus::IssuedDanfe.to_string(), "7 (Emitida DANFE)");
    }
}
