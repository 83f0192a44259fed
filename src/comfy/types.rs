//! Tipos de dados para o protocolo HTTP/push do motor de geração.
//!
//! Cobre as respostas dos endpoints de submissão, fila, histórico e
//! artefatos, além das mensagens de notificação push do ciclo de vida.
//! Todas as structs derivam `Serialize`/`Deserialize` conforme o formato
//! que o motor emite.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tracker::WorkflowStatus;

/// Resposta do endpoint de submissão (`POST /prompt`).
///
/// `node_errors` vem preenchido quando o motor aceitou o workflow mas tem
/// observações por nó; a rejeição completa chega como HTTP 400.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Identificador opaco atribuído pelo motor.
    pub prompt_id: String,
    /// Número sequencial na fila, quando reportado.
    #[serde(default)]
    pub number: Option<u64>,
    /// Diagnóstico por nó, exatamente como o motor o envia.
    #[serde(default)]
    pub node_errors: BTreeMap<String, Value>,
}

/// Estado da fila do motor (`GET /queue`).
///
/// Cada entrada é um array heterogêneo cujo segundo elemento é o
/// `prompt_id`; o restante não interessa ao cliente.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Value>,
    #[serde(default)]
    pub queue_pending: Vec<Value>,
}

impl QueueSnapshot {
    fn entry_id(entry: &Value) -> Option<&str> {
        entry.get(1)?.as_str()
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.queue_running
            .iter()
            .any(|entry| Self::entry_id(entry) == Some(prompt_id))
    }

    /// Posição (0-based) na fila de pendentes, se o prompt estiver nela.
    pub fn pending_position(&self, prompt_id: &str) -> Option<u32> {
        self.queue_pending
            .iter()
            .position(|entry| Self::entry_id(entry) == Some(prompt_id))
            .map(|index| index as u32)
    }
}

/// Coordenada de um artefato produzido: nome de arquivo, subpasta e o tipo
/// de pasta do motor ("output", "temp", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default = "default_folder_kind", rename = "type")]
    pub folder_kind: String,
}

fn default_folder_kind() -> String {
    "output".to_string()
}

impl ArtifactRef {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            subfolder: String::new(),
            folder_kind: default_folder_kind(),
        }
    }

    /// Caminho relativo `subpasta/arquivo` (ou só o arquivo, sem subpasta).
    pub fn path(&self) -> String {
        if self.subfolder.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.subfolder, self.filename)
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Uma entrada do endpoint de histórico (`GET /history/{prompt_id}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Saída de um nó no histórico; só as imagens interessam ao cliente.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Registro terminal de uma execução, destilado do histórico: artefatos
/// produzidos ou o payload de erro do motor, verbatim.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub prompt_id: String,
    pub images: Vec<ArtifactRef>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub(crate) fn from_entry(prompt_id: &str, entry: &HistoryEntry) -> Self {
        let images = entry
            .outputs
            .values()
            .flat_map(|output| output.images.iter().cloned())
            .collect();

        let error = entry.status.as_ref().and_then(|status| {
            if status.status_str.as_deref() != Some("error") {
                return None;
            }
            let payload = status.messages.iter().find_map(|message| {
                let pair = message.as_array()?;
                if pair.first()?.as_str()? == "execution_error" {
                    pair.get(1).cloned()
                } else {
                    None
                }
            });
            Some(
                payload
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "execution failed".to_string()),
            )
        });

        Self {
            prompt_id: prompt_id.to_string(),
            images,
            error,
        }
    }

    pub fn into_status(self) -> WorkflowStatus {
        match self.error {
            Some(error) => WorkflowStatus::failed(error),
            None => WorkflowStatus::completed(self.images),
        }
    }
}

/// Mensagens de ciclo de vida do canal de notificação push, no formato
/// `{"type": ..., "data": {...}}` do motor. O fluxo é ordenado e sempre
/// consultivo: a ausência de mensagens nunca é um erro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    ExecutionStart {
        prompt_id: String,
    },
    Executing {
        prompt_id: String,
        /// `None` quando o motor sinaliza o fim da execução.
        #[serde(default)]
        node: Option<String>,
    },
    Progress {
        #[serde(default)]
        prompt_id: Option<String>,
        value: u32,
        max: u32,
    },
    Executed {
        prompt_id: String,
        node: String,
        #[serde(default)]
        output: Value,
    },
    ExecutionSuccess {
        prompt_id: String,
    },
    ExecutionError {
        prompt_id: String,
        #[serde(default)]
        exception_message: String,
        #[serde(default)]
        node_id: Option<String>,
        #[serde(default)]
        node_type: Option<String>,
    },
    ExecutionInterrupted {
        prompt_id: String,
    },
    ExecutionCached {
        prompt_id: String,
        #[serde(default)]
        nodes: Vec<String>,
    },
    /// Tipos de mensagem que o cliente não consome (ex.: contadores de fila).
    #[serde(other)]
    Other,
}
