use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{IntegratorOrder, IntegratorPage, OrderPayload};
use crate::error::Result;

/// Chamadas à API do integrador. Todas recebem o token da configuração.
#[async_trait]
pub trait Integrator: Send + Sync {
    /// `POST orders/simple`; devolve o id criado, se houver.
    async fn push_order(&self, token: &str, payload: &OrderPayload) -> Result<Option<i64>>;

    /// `POST orders/{id}/billing` com o XML no campo `xml`.
    async fn push_billing(&self, token: &str, integrator_id: i64, filename: &str, xml: Vec<u8>) -> Result<bool>;

    /// `POST orders/{id}/attachment` com a etiqueta no campo `attachment`.
    async fn push_label(&self, token: &str, integrator_id: i64, filename: &str, label: Vec<u8>) -> Result<bool>;

    /// `POST orders/{id}/cancelation`, sem corpo.
    async fn push_cancelation(&self, token: &str, integrator_id: i64) -> Result<bool>;

    /// `GET orders?order_number=N`; `None` quando a resposta não é 200.
    async fn find_orders(&self, token: &str, number: i64) -> Result<Option<Vec<IntegratorOrder>>>;

    /// `GET orders?status__in=S&page=N`; `None` quando a resposta não é 200.
    async fn list_orders(&self, token: &str, status: &str, page: u32) -> Result<Option<IntegratorPage>>;
}

pub struct IntegratorClient {
    client: Client,
    base_url: String,
    auth_scheme: String,
}

impl IntegratorClient {
    pub fn new(base_url: impl Into<String>, auth_scheme: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_scheme: auth_scheme.into(),
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), resource)
    }

    fn authorization(&self, token: &str) -> String {
        format!("{} {token}", self.auth_scheme)
    }

    async fn post_file(&self, token: &str, resource: String, field: &'static str, filename: &str, bytes: Vec<u8>) -> Result<bool> {
        let form = Form::new().part(field, Part::bytes(bytes).file_name(filename.to_string()));
        let response = self
            .client
            .post(self.url(&resource))
            .header("Authorization", self.authorization(token))
            .multipart(form)
            .send()
            .await?;
        Ok(accepted(&resource, response.status()))
    }
}

fn accepted(resource: &str, status: StatusCode) -> bool {
    if status.is_success() {
        debug!(resource, status = status.as_u16(), "integrator accepted request");
        true
    } else {
        warn!(resource, status = status.as_u16(), "integrator rejected request");
        false
    }
}

#[async_trait]
impl Integrator for IntegratorClient {
    async fn push_order(&self, token: &str, payload: &OrderPayload) -> Result<Option<i64>> {
        let response = self
            .client
            .post(self.url("orders/simple"))
            .header("Authorization", self.authorization(token))
            .json(payload)
            .send()
            .await?;

        if !accepted("orders/simple", response.status()) {
            return Ok(None);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "integrator answered orders/simple without JSON");
                return Ok(None);
            }
        };
        Ok(match body.get("id") {
            Some(Value::Number(id)) => id.as_i64(),
            Some(Value::String(id)) => id.trim().parse().ok(),
            _ => None,
        })
    }

    async fn push_billing(&self, token: &str, integrator_id: i64, filename: &str, xml: Vec<u8>) -> Result<bool> {
        self.post_file(token, format!("orders/{integrator_id}/billing"), "xml", filename, xml)
            .await
    }

    async fn push_label(&self, token: &str, integrator_id: i64, filename: &str, label: Vec<u8>) -> Result<bool> {
        self.post_file(token, format!("orders/{integrator_id}/attachment"), "attachment", filename, label)
            .await
    }

    async fn push_cancelation(&self, token: &str, integrator_id: i64) -> Result<bool> {
        let resource = format!("orders/{integrator_id}/cancelation");
        let response = self
            .client
            .post(self.url(&resource))
            .header("Authorization", self.authorization(token))
            .send()
            .await?;
        Ok(accepted(&resource, response.status()))
    }

    async fn find_orders(&self, token: &str, number: i64) -> Result<Option<Vec<IntegratorOrder>>> {
        let response = self
            .client
            .get(self.url("orders"))
            .query(&[("order_number", number.to_string())])
            .header("Authorization", self.authorization(token))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            warn!(number, status = response.status().as_u16(), "order lookup in integrator failed");
            return Ok(None);
        }
        let page: IntegratorPage = response.json().await?;
        Ok(Some(page.results))
    }

    async fn list_orders(&self, token: &str, status: &str, page: u32) -> Result<Option<IntegratorPage>> {
        let response = self
            .client
            .get(self.url("orders"))
            .query(&[("status__in", status.to_string()), ("page", page.to_string())])
            .header("Authorization", self.authorization(token))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            warn!(status, page, code = response.status().as_u16(), "integrator order listing failed");
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }
}
