//! Tipos de erro para o cliente do motor de geração.
//!
//! Define [`ComfyError`] com variantes para falha de conexão, timeout,
//! rejeição de workflow, recurso inexistente e erros genéricos da API.
//! Usa `thiserror` para derivar `Display` e `Error` automaticamente a
//! partir dos atributos `#[error(...)]`.

use std::collections::BTreeMap;

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o motor de geração.
///
/// As variantes cobrem a taxonomia completa do transporte:
/// - [`Connection`](ComfyError::Connection) — motor inacessível (retryable)
/// - [`Timeout`](ComfyError::Timeout) — prazo da operação excedido
/// - [`Validation`](ComfyError::Validation) — o motor rejeitou a forma do
///   workflow, com detalhe por nó
/// - [`NotFound`](ComfyError::NotFound) — prompt ou artefato desconhecido
/// - [`Api`](ComfyError::Api) — resposta não-2xx sem categoria específica
#[derive(Debug, Error)]
pub enum ComfyError {
    /// Falha na camada de rede (DNS, conexão recusada). O motor nunca
    /// chegou a receber a requisição.
    #[error("engine unreachable: {0}")]
    Connection(String),

    /// A operação excedeu o prazo fornecido pelo chamador. Distinto de
    /// `Connection`: a requisição pode ter chegado ao motor.
    #[error("request timed out")]
    Timeout,

    /// O motor rejeitou a estrutura do workflow. `node_errors` carrega o
    /// diagnóstico por nó, exatamente como o motor o reportou.
    #[error("workflow rejected by engine: {message}")]
    Validation {
        message: String,
        node_errors: BTreeMap<String, serde_json::Value>,
    },

    /// Prompt id ou artefato desconhecido para o motor.
    #[error("not found: {0}")]
    NotFound(String),

    /// Erro retornado pela API sem categoria específica (ex.: 500).
    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Categoria de um [`ComfyError`], usada pela política de retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComfyErrorKind {
    Connection,
    Timeout,
    Validation,
    NotFound,
    Api,
}

impl ComfyError {
    pub fn kind(&self) -> ComfyErrorKind {
        match self {
            ComfyError::Connection(_) => ComfyErrorKind::Connection,
            ComfyError::Timeout => ComfyErrorKind::Timeout,
            ComfyError::Validation { .. } => ComfyErrorKind::Validation,
            ComfyError::NotFound(_) => ComfyErrorKind::NotFound,
            ComfyError::Api { .. } => ComfyErrorKind::Api,
        }
    }
}

impl From<reqwest::Error> for ComfyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ComfyError::Timeout
        } else if err.is_connect() {
            ComfyError::Connection(err.to_string())
        } else {
            ComfyError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}
