//! HTTP payment gateway client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    ChargeRequest, ChargeResponse, GatewayError, GatewayResult, PaymentGateway, PayoutRequest,
    PayoutResponse,
};
use crate::transaction::GatewayPaymentStatus;

/// REST client for the payment gateway
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: GatewayPaymentStatus,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> GatewayResult<T> {
        let response = request.bearer_auth(&self.api_key).send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(GatewayError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse> {
        let url = format!("{}/v1/charges", self.base_url);
        self.send(
            self.client
                .post(&url)
                .header("Idempotency-Key", &request.reference)
                .json(&request),
        )
        .await
    }

    async fn create_payout(&self, request: PayoutRequest) -> GatewayResult<PayoutResponse> {
        let url = format!("{}/v1/payouts", self.base_url);
        self.send(
            self.client
                .post(&url)
                .header("Idempotency-Key", format!("payout-{}", request.reference))
                .json(&request),
        )
        .await
    }

    async fn get_status(&self, gateway_id: &str) -> GatewayResult<GatewayPaymentStatus> {
        let url = format!("{}/v1/payments/{}", self.base_url, gateway_id);
        let response: StatusResponse = self.send(self.client.get(&url)).await?;
        Ok(response.status)
    }
}
