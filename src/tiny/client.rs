use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::decoder::TinyResponse;
use crate::error::{OperationError, Result};

/// Origem dos pedidos: recursos GET do Tiny e download de etiquetas.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// GET `{base}/{resource}` com os parâmetros de consulta informados.
    async fn get(&self, resource: &str, params: &[(&str, String)]) -> Result<TinyResponse>;

    /// Baixa o conteúdo bruto de uma URL (etiquetas).
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct TinyClient {
    client: Client,
    base_url: String,
}

impl TinyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), resource.trim_start_matches('/'))
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    if status != StatusCode::OK {
        return Err(OperationError::Connection {
            service: "Tiny",
            status: status.as_u16(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl OrderSource for TinyClient {
    async fn get(&self, resource: &str, params: &[(&str, String)]) -> Result<TinyResponse> {
        debug!(resource, "GET Tiny resource");
        let response = self.client.get(self.url(resource)).query(params).send().await?;
        check_status(response.status())?;
        let bytes = response.bytes().await?;
        Ok(TinyResponse::from_bytes(&bytes))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "downloading label");
        let response = self.client.get(url).send().await?;
        check_status(response.status())?;
        Ok(response.bytes().await?.to_vec())
    }
}
