//! Canonical payment outcome reported by the bank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, PaymentEvent};

/// Transaction status as the bank spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankStatus {
    #[serde(rename = "APROBADA")]
    Approved,
    #[serde(rename = "RECHAZADA")]
    Rejected,
    #[serde(rename = "PENDIENTE")]
    Pending,
}

impl BankStatus {
    /// Parses the bank's status string, ignoring case and surrounding whitespace.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "APROBADA" => Some(BankStatus::Approved),
            "RECHAZADA" => Some(BankStatus::Rejected),
            "PENDIENTE" => Some(BankStatus::Pending),
            _ => None,
        }
    }

    /// Returns the wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            BankStatus::Approved => "APROBADA",
            BankStatus::Rejected => "RECHAZADA",
            BankStatus::Pending => "PENDIENTE",
        }
    }

    /// The payment attempt event this status represents.
    pub fn payment_event(&self) -> PaymentEvent {
        match self {
            BankStatus::Approved => PaymentEvent::BankApproved,
            BankStatus::Rejected => PaymentEvent::BankRejected,
            BankStatus::Pending => PaymentEvent::BankPending,
        }
    }
}

impl std::fmt::Display for BankStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single shape both the redirect and the notification path produce.
///
/// Field names follow the bank's contract on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    #[serde(rename = "referencia_transaccion")]
    pub reference: String,

    #[serde(rename = "estado_transaccion")]
    pub status: BankStatus,

    #[serde(rename = "monto_transaccion")]
    pub amount: Money,

    #[serde(rename = "fecha_hora_pago")]
    pub paid_at: DateTime<Utc>,

    #[serde(rename = "codigo_respuesta")]
    pub response_code: String,

    #[serde(rename = "metodo_pago")]
    pub payment_method: String,

    #[serde(
        rename = "codigo_autorizacion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization_code: Option<String>,
}

/// Where the fields of an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    /// Server-to-server notification with every field present.
    Notification,
    /// Browser redirect that happened to carry every field.
    Redirect,
    /// Browser redirect completed by an authoritative status lookup.
    StatusLookup,
    /// Browser redirect with gaps the status lookup could not fill.
    Degraded,
}

impl OutcomeSource {
    /// Returns the source name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSource::Notification => "notification",
            OutcomeSource::Redirect => "redirect",
            OutcomeSource::StatusLookup => "status_lookup",
            OutcomeSource::Degraded => "degraded",
        }
    }
}

/// A normalized outcome plus how much it can be trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretedOutcome {
    pub outcome: PaymentOutcome,
    pub source: OutcomeSource,

    /// Status the bank redirect claimed, kept when it was not verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<BankStatus>,
}

impl InterpretedOutcome {
    /// Returns true unless the outcome was assembled from defaults.
    pub fn is_verified(&self) -> bool {
        self.source != OutcomeSource::Degraded
    }

    /// Returns true only for a verified approval.
    pub fn triggers_confirmation(&self) -> bool {
        self.is_verified() && self.outcome.status == BankStatus::Approved
    }
}
