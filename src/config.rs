//! Configuração do tiny-sync carregada a partir de `tiny-sync.toml`.
//!
//! A struct [`Settings`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis. Variáveis de
//! ambiente (também lidas de um `.env`) têm precedência sobre o arquivo.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::state_machine::{RateLimit, RetryConfig, TaskKind};

/// Nome padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_FILE: &str = "tiny-sync.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// URL base da API do Tiny (`BASE_URL_TINY`).
    #[serde(default = "default_tiny_base_url")]
    pub tiny_base_url: String,

    /// URL base da API do integrador (`BASE_URL_INTEGRATOR`).
    #[serde(default)]
    pub integrator_base_url: String,

    /// Esquema do cabeçalho `Authorization` enviado ao integrador.
    #[serde(default = "default_auth_scheme")]
    pub integrator_auth_scheme: String,

    /// Timeout total das requisições HTTP, em segundos.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Raiz do armazenamento de arquivos (XML e etiquetas).
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Arquivo redb do armazenamento de pedidos.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Endereço do receptor de webhooks.
    #[serde(default = "default_webhook_addr")]
    pub webhook_addr: String,

    #[serde(default)]
    pub log: LogSettings,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Sobrescritas de limite de taxa por tipo de tarefa, ex.: `send_order = "4/m"`.
    #[serde(default)]
    pub rate_limits: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Intervalos do agendador, em segundos. Zero desativa o ciclo.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_sync_orders_secs")]
    pub sync_orders_secs: u64,
    #[serde(default = "default_search_expeditions_secs")]
    pub search_expeditions_secs: u64,
    #[serde(default = "default_send_labels_secs")]
    pub send_labels_secs: u64,
    #[serde(default = "default_sync_cancelled_secs")]
    pub sync_cancelled_secs: u64,
    #[serde(default = "default_sync_processed_secs")]
    pub sync_processed_secs: u64,
    #[serde(default)]
    pub send_awaiting_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            sync_orders_secs: default_sync_orders_secs(),
            search_expeditions_secs: default_search_expeditions_secs(),
            send_labels_secs: default_send_labels_secs(),
            sync_cancelled_secs: default_sync_cancelled_secs(),
            sync_processed_secs: default_sync_processed_secs(),
            send_awaiting_secs: 0,
        }
    }
}

fn default_tiny_base_url() -> String {
    "https://api.tiny.com.br/api2/".to_string()
}

fn default_auth_scheme() -> String {
    "Token".to_string()
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("tiny-sync.redb")
}

fn default_webhook_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sync_orders_secs() -> u64 {
    600
}

fn default_search_expeditions_secs() -> u64 {
    900
}

fn default_send_labels_secs() -> u64 {
    900
}

fn default_sync_cancelled_secs() -> u64 {
    1800
}

fn default_sync_processed_secs() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tiny_base_url: default_tiny_base_url(),
            integrator_base_url: String::new(),
            integrator_auth_scheme: default_auth_scheme(),
            http_timeout_secs: default_http_timeout_secs(),
            media_root: default_media_root(),
            store_path: default_store_path(),
            webhook_addr: default_webhook_addr(),
            log: LogSettings::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleSettings::default(),
            rate_limits: HashMap::new(),
        }
    }
}

impl Settings {
    /// Carrega a configuração do caminho indicado (ou `tiny-sync.toml`).
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // `.env` é opcional.
        let _ = dotenvy::dotenv();

        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str::<Settings>(contents).context("invalid configuration file")
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("BASE_URL_TINY") {
            self.tiny_base_url = url;
        }
        if let Some(url) = non_empty("BASE_URL_INTEGRATOR") {
            self.integrator_base_url = url;
        }
        if let Some(path) = non_empty("TINY_SYNC_STORE") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty("TINY_SYNC_MEDIA_ROOT") {
            self.media_root = PathBuf::from(path);
        }
    }

    fn validate(&self) -> Result<()> {
        self.rate_limit_overrides().map(|_| ())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Limites efetivos: padrões por tipo com as sobrescritas do arquivo.
    pub fn rate_limits(&self) -> Result<HashMap<TaskKind, RateLimit>> {
        let mut limits: HashMap<TaskKind, RateLimit> = TaskKind::ALL
            .into_iter()
            .filter_map(|kind| kind.default_rate_limit().map(|limit| (kind, limit)))
            .collect();
        limits.extend(self.rate_limit_overrides()?);
        Ok(limits)
    }

    fn rate_limit_overrides(&self) -> Result<Vec<(TaskKind, RateLimit)>> {
        self.rate_limits
            .iter()
            .map(|(kind, limit)| {
                let kind: TaskKind = kind.parse().map_err(anyhow::Error::msg)?;
                let limit: RateLimit = limit.parse().map_err(anyhow::Error::msg)?;
                Ok((kind, limit))
            })
            .collect()
    }
}
