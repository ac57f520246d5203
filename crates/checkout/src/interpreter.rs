//! Normalizes bank redirects and bank notifications into one outcome.
//!
//! The redirect only guarantees `referencia_transaccion` and
//! `estado_transaccion`. Whenever amount, payment time, response code or
//! payment method are missing, or the redirect claims an approval, the
//! interpreter asks the gateway for the authoritative status; if that lookup fails too it returns a degraded
//! outcome (amount 0, time now) that never counts as an approval.
//!
//! The notification is server to server and must carry all six fields.

use chrono::{DateTime, NaiveDateTime, Utc};
use domain::{BankStatus, InterpretedOutcome, Money, OutcomeSource, PaymentOutcome};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};
use crate::services::PaymentGateway;

/// Query parameters of the bank's return redirect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedirectParams {
    pub referencia_transaccion: Option<String>,
    pub estado_transaccion: Option<String>,
    pub codigo_autorizacion: Option<String>,
    pub monto_transaccion: Option<String>,
    pub fecha_hora_pago: Option<String>,
    pub codigo_respuesta: Option<String>,
    pub metodo_pago: Option<String>,
}

/// Body of the bank's server-to-server notification.
///
/// Fields are optional here so that a malformed payload can be reported
/// field by field instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub referencia_transaccion: Option<String>,
    pub estado_transaccion: Option<String>,
    /// Number or numeric string.
    pub monto_transaccion: Option<serde_json::Value>,
    pub fecha_hora_pago: Option<String>,
    pub codigo_respuesta: Option<String>,
    pub metodo_pago: Option<String>,
    #[serde(default)]
    pub codigo_autorizacion: Option<String>,
}

/// Turns raw bank responses into [`InterpretedOutcome`]s.
pub struct PaymentResponseInterpreter<G: PaymentGateway> {
    gateway: G,
}

impl<G: PaymentGateway> PaymentResponseInterpreter<G> {
    /// Creates a new interpreter backed by `gateway` for status lookups.
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    /// Interprets the browser redirect.
    ///
    /// Only a missing `referencia_transaccion` is an error. Every other gap
    /// resolves to a value, either from the status lookup or from defaults.
    #[tracing::instrument(skip(self, params), fields(reference = ?params.referencia_transaccion))]
    pub async fn from_redirect(&self, params: &RedirectParams) -> Result<InterpretedOutcome> {
        let reference = non_empty(&params.referencia_transaccion).ok_or_else(|| {
            CheckoutError::Validation("referencia_transaccion is required".to_string())
        })?;

        let reported = match non_empty(&params.estado_transaccion).and_then(BankStatus::from_wire) {
            Some(status) => status,
            None => {
                tracing::warn!(
                    estado = ?params.estado_transaccion,
                    "unrecognized transaction status on redirect, treating as pending"
                );
                BankStatus::Pending
            }
        };
        let authorization_code = non_empty(&params.codigo_autorizacion).map(str::to_string);

        let amount = non_empty(&params.monto_transaccion).and_then(|raw| parse_amount(raw).ok());
        let paid_at = non_empty(&params.fecha_hora_pago).and_then(|raw| parse_timestamp(raw).ok());
        let response_code = non_empty(&params.codigo_respuesta);
        let payment_method = non_empty(&params.metodo_pago);

        // An approval on the redirect is always checked with the gateway.
        if reported != BankStatus::Approved
            && let (Some(amount), Some(paid_at), Some(response_code), Some(payment_method)) =
                (amount, paid_at, response_code, payment_method)
        {
            let outcome = PaymentOutcome {
                reference: reference.to_string(),
                status: reported,
                amount,
                paid_at,
                response_code: response_code.to_string(),
                payment_method: payment_method.to_string(),
                authorization_code,
            };
            return Ok(record(InterpretedOutcome {
                outcome,
                source: OutcomeSource::Redirect,
                reported_status: None,
            }));
        }

        match self.gateway.transaction_status(reference).await {
            Ok(mut outcome) => {
                if outcome.authorization_code.is_none() {
                    outcome.authorization_code = authorization_code;
                }
                if outcome.status != reported {
                    tracing::info!(
                        reported = %reported,
                        authoritative = %outcome.status,
                        "status lookup disagrees with redirect"
                    );
                }
                Ok(record(InterpretedOutcome {
                    outcome,
                    source: OutcomeSource::StatusLookup,
                    reported_status: None,
                }))
            }
            Err(e) => {
                tracing::warn!(error = %e, "status lookup failed, presenting degraded outcome");
                // An approval nobody could verify is shown as still pending.
                let status = match reported {
                    BankStatus::Approved => BankStatus::Pending,
                    other => other,
                };
                let outcome = PaymentOutcome {
                    reference: reference.to_string(),
                    status,
                    amount: amount.unwrap_or_else(Money::zero),
                    paid_at: paid_at.unwrap_or_else(Utc::now),
                    response_code: response_code.unwrap_or_default().to_string(),
                    payment_method: payment_method.unwrap_or_default().to_string(),
                    authorization_code,
                };
                Ok(record(InterpretedOutcome {
                    outcome,
                    source: OutcomeSource::Degraded,
                    reported_status: Some(reported),
                }))
            }
        }
    }

    /// Interprets the bank's notification. Any missing or malformed field is
    /// a validation error.
    #[tracing::instrument(skip(self, payload), fields(reference = ?payload.referencia_transaccion))]
    pub fn from_notification(&self, payload: &NotificationPayload) -> Result<InterpretedOutcome> {
        let amount_present = payload
            .monto_transaccion
            .as_ref()
            .is_some_and(|v| !v.is_null() && v.as_str().is_none_or(|s| !s.trim().is_empty()));

        let missing: Vec<&str> = [
            ("referencia_transaccion", non_empty(&payload.referencia_transaccion).is_some()),
            ("estado_transaccion", non_empty(&payload.estado_transaccion).is_some()),
            ("monto_transaccion", amount_present),
            ("fecha_hora_pago", non_empty(&payload.fecha_hora_pago).is_some()),
            ("codigo_respuesta", non_empty(&payload.codigo_respuesta).is_some()),
            ("metodo_pago", non_empty(&payload.metodo_pago).is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(CheckoutError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let raw_status = non_empty(&payload.estado_transaccion).unwrap_or_default();
        let status = BankStatus::from_wire(raw_status).ok_or_else(|| {
            CheckoutError::Validation(format!("unknown estado_transaccion: {raw_status}"))
        })?;

        let amount = match payload.monto_transaccion {
            Some(ref value) => parse_amount_value(value)?,
            None => Money::zero(),
        };
        let paid_at = parse_timestamp(non_empty(&payload.fecha_hora_pago).unwrap_or_default())?;

        let outcome = PaymentOutcome {
            reference: non_empty(&payload.referencia_transaccion)
                .unwrap_or_default()
                .to_string(),
            status,
            amount,
            paid_at,
            response_code: non_empty(&payload.codigo_respuesta)
                .unwrap_or_default()
                .to_string(),
            payment_method: non_empty(&payload.metodo_pago)
                .unwrap_or_default()
                .to_string(),
            authorization_code: non_empty(&payload.codigo_autorizacion).map(str::to_string),
        };

        Ok(record(InterpretedOutcome {
            outcome,
            source: OutcomeSource::Notification,
            reported_status: None,
        }))
    }
}

fn record(interpreted: InterpretedOutcome) -> InterpretedOutcome {
    metrics::counter!(
        "payment_outcomes_total",
        "status" => interpreted.outcome.status.as_str(),
        "source" => interpreted.source.as_str()
    )
    .increment(1);
    tracing::info!(
        reference = %interpreted.outcome.reference,
        status = %interpreted.outcome.status,
        source = interpreted.source.as_str(),
        amount = %interpreted.outcome.amount,
        "payment outcome interpreted"
    );
    interpreted
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parses a bank amount, rounding decimals half-up to whole units.
fn parse_amount(raw: &str) -> Result<Money> {
    let raw = raw.trim();
    if let Ok(whole) = raw.parse::<i64>() {
        return non_negative(whole, raw);
    }
    match raw.parse::<f64>() {
        Ok(value) => round_amount(value, raw),
        Err(_) => Err(CheckoutError::Validation(format!(
            "monto_transaccion is not a number: {raw}"
        ))),
    }
}

fn parse_amount_value(value: &serde_json::Value) -> Result<Money> {
    match value {
        serde_json::Value::String(s) => parse_amount(s),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(whole), _) => non_negative(whole, &n.to_string()),
            (None, Some(value)) => round_amount(value, &n.to_string()),
            _ => Err(CheckoutError::Validation(format!(
                "monto_transaccion out of range: {n}"
            ))),
        },
        other => Err(CheckoutError::Validation(format!(
            "monto_transaccion is not a number: {other}"
        ))),
    }
}

fn round_amount(value: f64, raw: &str) -> Result<Money> {
    if !value.is_finite() || value >= i64::MAX as f64 {
        return Err(CheckoutError::Validation(format!(
            "monto_transaccion out of range: {raw}"
        )));
    }
    // f64::round rounds half away from zero, which is half-up for amounts.
    non_negative(value.round() as i64, raw)
}

fn non_negative(amount: i64, raw: &str) -> Result<Money> {
    if amount < 0 {
        return Err(CheckoutError::Validation(format!(
            "monto_transaccion must not be negative: {raw}"
        )));
    }
    Ok(Money::new(amount))
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (read as UTC).
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CheckoutError::Validation(format!("fecha_hora_pago is not a timestamp: {raw}")))
}
