//! Configuração do qagen carregada a partir de `qagen.toml`.
//!
//! A struct [`QagenConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `QAGEN_API_KEY` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::content::SourceItem;

/// Arquivo de configuração padrão, relativo ao diretório atual.
pub const DEFAULT_CONFIG_PATH: &str = "qagen.toml";

/// Variável de ambiente que sobrescreve a chave da API.
pub const API_KEY_ENV: &str = "QAGEN_API_KEY";

/// Configuração de nível superior carregada de `qagen.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QagenConfig {
    /// Diretório onde a fila, o estado dos itens e o cache são persistidos.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Biblioteca de conteúdo (itens de origem e artefatos gerados).
    #[serde(default = "default_library_path")]
    pub library_path: PathBuf,

    #[serde(default)]
    pub settings: BatchSettings,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Snapshot de configuração congelado em cada batch no momento da admissão.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_item_type")]
    pub source_type: String,
    /// Filtro de taxonomia no formato `taxonomia:termo`.
    #[serde(default)]
    pub source_filter: Option<String>,
    #[serde(default = "default_item_type")]
    pub target_type: String,
    #[serde(default)]
    pub target_filter: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            source_type: default_item_type(),
            source_filter: None,
            target_type: default_item_type(),
            target_filter: None,
            api_key: String::new(),
            api_base_url: default_api_base_url(),
            model_id: default_model_id(),
        }
    }
}

impl BatchSettings {
    /// Chave normalizada: sem espaços e sem o prefixo `Bearer `.
    pub fn bearer_token(&self) -> &str {
        let key = self.api_key.trim();
        key.strip_prefix("Bearer ").unwrap_or(key).trim()
    }

    /// Se o item de origem entra num batch com estas configurações: o tipo
    /// precisa bater com `source_type` e, havendo `source_filter`, o termo
    /// (a parte depois de `:`) precisa estar entre os termos do item.
    pub fn admits(&self, item: &SourceItem) -> bool {
        if item.item_type != self.source_type {
            return false;
        }
        match self.source_filter.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(filter) => {
                let term = filter.split_once(':').map_or(filter, |(_, term)| term);
                item.terms.iter().any(|t| t == term)
            }
        }
    }
}

/// Parâmetros do driver e do gatilho periódico.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Atraso do auto-reagendamento depois de um tick com trabalho restante.
    pub tick_delay_secs: u64,
    /// Atraso usado pelo watchdog (`check_and_start`).
    pub watchdog_delay_secs: u64,
    /// Atraso usado por `force_start`.
    pub force_delay_secs: u64,
    /// Horizonte do lock de execução única; deve exceder o pior tempo por item.
    pub lock_horizon_secs: u64,
    /// Intervalo de polling do runner.
    pub poll_interval_ms: u64,
    /// Frequência com que o runner executa o watchdog.
    pub watchdog_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_delay_secs: 30,
            watchdog_delay_secs: 5,
            force_delay_secs: 2,
            lock_horizon_secs: 300,
            poll_interval_ms: 1000,
            watchdog_interval_secs: 120,
        }
    }
}

/// Política de retentativas do cliente de transformação.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Número total de tentativas (incluindo a primeira).
    pub max_attempts: u32,
    /// Espera fixa quando o serviço sinaliza rate limit.
    pub rate_limit_wait_ms: u64,
    /// Atraso base para backoff exponencial.
    pub backoff_base_ms: u64,
    /// Teto do backoff exponencial.
    pub backoff_cap_ms: u64,
    /// Timeout de cada requisição HTTP.
    pub request_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_wait_ms: 65_000,
            backoff_base_ms: 1000,
            backoff_cap_ms: 10_000,
            request_timeout_secs: 90,
        }
    }
}

impl RetryPolicy {
    /// Atraso antes da próxima tentativa depois da falha `attempt` (1-based).
    ///
    /// Rate limit usa a espera fixa longa; o resto usa
    /// `min(base * 2^(attempt - 1), cap)`.
    pub fn delay_after(&self, attempt: u32, rate_limited: bool) -> Duration {
        if rate_limited {
            return Duration::from_millis(self.rate_limit_wait_ms);
        }
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_cap_ms),
        )
    }
}

/// Janelas de retenção e cadência das tarefas de manutenção.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Idade a partir da qual um rascunho não publicado é órfão.
    pub draft_staleness_secs: u64,
    /// Batches concluídos/cancelados mais antigos que isso são removidos.
    pub batch_retention_days: u64,
    pub cache_ttl_days: u64,
    pub reap_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub audit_retention_days: u64,
    /// Número máximo de registros mantidos no histórico.
    pub history_limit: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            draft_staleness_secs: 3600,
            batch_retention_days: 7,
            cache_ttl_days: 7,
            reap_interval_secs: 12 * 3600,
            purge_interval_secs: 3600,
            audit_retention_days: 90,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Nível padrão quando `RUST_LOG` não está definido.
    pub level: String,
    /// Emite logs em JSON em vez de texto.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".qagen")
}

fn default_library_path() -> PathBuf {
    PathBuf::from("library.json")
}

fn default_item_type() -> String {
    "post".to_string()
}

fn default_api_base_url() -> String {
    "https://api.siliconflow.cn/v1/chat/completions".to_string()
}

fn default_model_id() -> String {
    "deepseek-ai/DeepSeek-V3".to_string()
}

impl QagenConfig {
    /// Carrega a configuração de `qagen.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<QagenConfig>(&contents)?
        } else {
            Self::with_defaults()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            config.settings.api_key = key;
        }

        Ok(config)
    }

    /// Configuração completa com todos os defaults (equivalente a um arquivo vazio).
    pub fn with_defaults() -> Self {
        Self {
            state_dir: default_state_dir(),
            library_path: default_library_path(),
            ..Default::default()
        }
    }
}
