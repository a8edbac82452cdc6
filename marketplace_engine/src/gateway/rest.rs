use std::sync::Arc;

use log::*;
use mp_common::{Money, CURRENCY_CODE_LOWER};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
    StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    config::GatewayConfig,
    traits::{
        AuthorizationStatus,
        CaptureOutcome,
        EscrowGateway,
        GatewayError,
        PaymentMetadata,
        PaymentVerification,
    },
};

/// A REST adapter for an escrow-style payment processor.
///
/// The processor's API surface is small: authorizations are created with manual capture, captured or
/// voided by reference, and payouts are submitted as transfers. Responses use conventional status
/// codes; a `409` on capture means the reference was captured by an earlier call and is folded into
/// [`CaptureOutcome::AlreadyCaptured`].
#[derive(Clone)]
pub struct RestEscrowGateway {
    config: GatewayConfig,
    client: Arc<Client>,
}

#[derive(Debug, Serialize)]
struct AuthorizationRequest<'a> {
    amount: i64,
    currency: &'a str,
    capture_method: &'a str,
    metadata: &'a PaymentMetadata,
}

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    payment_ref: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    amount: i64,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    payment_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    amount: i64,
    currency: &'a str,
    destination: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    transfer_ref: String,
}

impl RestEscrowGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::with_capacity(2);
        let auth = format!("Bearer {}", config.api_key.reveal());
        let mut val =
            HeaderValue::from_str(&auth).map_err(|e| GatewayError::Protocol(format!("invalid api key: {e}")))?;
        val.set_sensitive(true);
        headers.insert("Authorization", val);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<T, GatewayError> {
        let url = self.url(path);
        trace!("💳️ {method} {url}");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| GatewayError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| GatewayError::Protocol(e.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        Err(Self::map_failure(status, message))
    }

    fn map_failure(status: StatusCode, message: String) -> GatewayError {
        match status {
            StatusCode::NOT_FOUND => GatewayError::UnknownReference(message),
            StatusCode::PAYMENT_REQUIRED | StatusCode::UNPROCESSABLE_ENTITY => GatewayError::Declined(message),
            s if s.is_server_error() => GatewayError::Network(format!("{s}: {message}")),
            s => GatewayError::Protocol(format!("{s}: {message}")),
        }
    }
}

impl EscrowGateway for RestEscrowGateway {
    async fn authorize(&self, amount: Money, meta: PaymentMetadata) -> Result<String, GatewayError> {
        let body = AuthorizationRequest {
            amount: amount.value(),
            currency: CURRENCY_CODE_LOWER,
            capture_method: "manual",
            metadata: &meta,
        };
        let resp: AuthorizationResponse =
            self.query(Method::POST, "/v1/authorizations", Some(body)).await?;
        debug!("💳️ Hold [{}] of {amount} placed for {}", resp.payment_ref, meta.reference);
        Ok(resp.payment_ref)
    }

    async fn verify_authorization(&self, payment_ref: &str) -> Result<PaymentVerification, GatewayError> {
        let path = format!("/v1/authorizations/{payment_ref}");
        let resp: AuthorizationResponse = self.query::<_, ()>(Method::GET, &path, None).await?;
        let status = match resp.status.as_str() {
            "succeeded" => AuthorizationStatus::Succeeded,
            "requires_action" => AuthorizationStatus::RequiresAction,
            "failed" | "canceled" => AuthorizationStatus::Failed,
            other => return Err(GatewayError::Protocol(format!("unknown authorization status '{other}'"))),
        };
        Ok(PaymentVerification { status, reason: resp.reason })
    }

    async fn capture(&self, payment_ref: &str) -> Result<CaptureOutcome, GatewayError> {
        let path = format!("/v1/authorizations/{payment_ref}/capture");
        match self.query::<CaptureResponse, ()>(Method::POST, &path, None).await {
            Ok(resp) => Ok(CaptureOutcome::Captured(Money::from_cents(resp.amount))),
            // 409 Conflict: this reference was captured by an earlier call. The funds moved once.
            Err(GatewayError::Protocol(msg)) if msg.starts_with("409") => {
                debug!("💳️ Capture replay on [{payment_ref}]");
                let verification_path = format!("/v1/authorizations/{payment_ref}");
                let resp: CaptureResponse = self.query::<_, ()>(Method::GET, &verification_path, None).await?;
                Ok(CaptureOutcome::AlreadyCaptured(Money::from_cents(resp.amount)))
            },
            Err(e) => Err(e),
        }
    }

    async fn cancel_authorization(&self, payment_ref: &str) -> Result<(), GatewayError> {
        let path = format!("/v1/authorizations/{payment_ref}");
        let _: serde_json::Value = self.query::<_, ()>(Method::DELETE, &path, None).await?;
        debug!("💳️ Hold [{payment_ref}] released");
        Ok(())
    }

    async fn refund(&self, payment_ref: &str, amount: Option<Money>) -> Result<(), GatewayError> {
        let body = RefundRequest { payment_ref, amount: amount.map(|a| a.value()) };
        let _: serde_json::Value = self.query(Method::POST, "/v1/refunds", Some(body)).await?;
        debug!("💳️ Refund issued against [{payment_ref}]");
        Ok(())
    }

    async fn transfer(&self, amount: Money, destination: &str) -> Result<String, GatewayError> {
        let body = TransferRequest { amount: amount.value(), currency: CURRENCY_CODE_LOWER, destination };
        let resp: TransferResponse = match self.query(Method::POST, "/v1/transfers", Some(body)).await {
            Ok(resp) => resp,
            Err(GatewayError::Declined(msg)) => return Err(GatewayError::TransferRejected(msg)),
            Err(e) => return Err(e),
        };
        debug!("💳️ Transfer [{}] of {amount} submitted to {destination}", resp.transfer_ref);
        Ok(resp.transfer_ref)
    }
}
