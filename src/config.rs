//! Configuração do easel carregada a partir de `easel.toml`.
//!
//! A struct [`EaselConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis. O arquivo é
//! procurado no diretório atual e depois no diretório de configuração do
//! usuário; variáveis de ambiente `EASEL_*` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Configuração de nível superior carregada de `easel.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EaselConfig {
    /// URL do motor de geração.
    #[serde(default = "default_url")]
    pub url: String,

    /// Chave de API opcional (mínimo de 8 caracteres quando presente).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Prazo de cada operação de rede, em segundos (1.0 a 3600.0).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Diretório onde salvar as imagens baixadas.
    #[serde(default)]
    pub output_dir: Option<String>,

    /// Diretório com os templates de workflow.
    #[serde(default = "default_template_dir")]
    pub template_dir: String,

    /// Intervalo entre sondagens de estado, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Prazo máximo de espera pela conclusão de um workflow, em segundos.
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Máximo de retentativas para falhas transitórias de rede.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso inicial do backoff exponencial, em milissegundos.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Base do backoff exponencial.
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Teto de atraso entre retentativas, em milissegundos.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// Valor padrão para a URL do motor: instância local.
fn default_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

// Valor padrão para o prazo de rede: 120 segundos.
fn default_timeout_secs() -> f64 {
    120.0
}

// Valor padrão para o diretório de templates.
fn default_template_dir() -> String {
    "workflows".to_string()
}

// Valor padrão para o intervalo de sondagem: 1000ms.
fn default_poll_interval_ms() -> u64 {
    1000
}

// Valor padrão para a espera máxima: 10 minutos.
fn default_wait_timeout_secs() -> u64 {
    600
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para o atraso inicial: 500ms.
fn default_initial_delay_ms() -> u64 {
    500
}

// Valor padrão para a base exponencial: 2.0.
fn default_exponential_base() -> f64 {
    2.0
}

// Valor padrão para o teto de atraso: 60 segundos.
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for EaselConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            output_dir: None,
            template_dir: default_template_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            exponential_base: default_exponential_base(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl EaselConfig {
    /// Carrega a configuração de `easel.toml`, procurando no diretório
    /// atual e depois no diretório de configuração do usuário. Usa valores
    /// padrão se nenhum arquivo existir.
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_file() {
            Some(path) => Self::parse_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Carrega a configuração de um caminho específico.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        let local = Path::new("easel.toml");
        if local.is_file() {
            return Some(local.to_path_buf());
        }
        let user = dirs::config_dir()?.join("easel").join("easel.toml");
        user.is_file().then_some(user)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo.
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("EASEL_URL")
            && !url.is_empty()
        {
            self.url = url;
        }
        if let Ok(key) = std::env::var("EASEL_API_KEY")
            && !key.is_empty()
        {
            self.api_key = Some(key);
        }
        if let Ok(raw) = std::env::var("EASEL_TIMEOUT_SECS")
            && let Ok(secs) = raw.trim().parse::<f64>()
        {
            self.timeout_secs = secs;
        }
        if let Ok(dir) = std::env::var("EASEL_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.output_dir = Some(dir);
        }
        if let Ok(dir) = std::env::var("EASEL_TEMPLATE_DIR")
            && !dir.is_empty()
        {
            self.template_dir = dir;
        }
    }

    fn normalize(&mut self) {
        self.url = self.url.trim().trim_end_matches('/').to_string();
    }

    /// Valida os campos carregados, qualquer que seja a origem.
    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            bail!("url must start with http:// or https://: {}", self.url);
        }
        if self.timeout_secs < 1.0 || self.timeout_secs > 3600.0 {
            bail!(
                "timeout_secs must be between 1.0 and 3600.0, got {}",
                self.timeout_secs
            );
        }
        if let Some(key) = &self.api_key {
            if key.trim().is_empty() {
                bail!("api_key must not be empty or whitespace-only");
            }
            if key.len() < 8 {
                bail!("api_key must be at least 8 characters long");
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Política de retry derivada dos campos de backoff.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            exponential_base: self.exponential_base,
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = EaselConfig::default();
        assert_eq!(config.url, "http://127.0.0.1:8188");
        assert_eq!(config.timeout_secs, 120.0);
        assert_eq!(config.template_dir, "workflows");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            url = "http://gpu-box:8188"
            max_retries = 5
        "#;
        let config: EaselConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.url, "http://gpu-box:8188");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout_secs, 120.0);
        assert_eq!(config.exponential_base, 2.0);
    }

    #[test]
    fn validate_rejects_bad_url_scheme() {
        let config = EaselConfig {
            url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_timeout() {
        let config = EaselConfig {
            timeout_secs: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EaselConfig {
            timeout_secs: 7200.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_short_api_key() {
        let config = EaselConfig {
            api_key: Some("short".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EaselConfig {
            api_key: Some("sk-long-enough-key".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        let mut config = EaselConfig {
            url: "http://localhost:8188///".into(),
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.url, "http://localhost:8188");
    }

    #[test]
    fn retry_policy_reflects_backoff_fields() {
        let config = EaselConfig {
            max_retries: 7,
            initial_delay_ms: 250,
            exponential_base: 3.0,
            max_delay_ms: 10_000,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.exponential_base, 3.0);
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn load_from_reads_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("easel.toml");
        std::fs::write(&path, "url = \"http://render-host:8188/\"\n").unwrap();

        let config = EaselConfig::load_from(&path).unwrap();
        assert_eq!(config.url, "http://render-host:8188");
    }
}
