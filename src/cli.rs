//! Interface de linha de comando do easel baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (generate,
//! templates, status, cancel, check) e flags globais (--url,
//! --template-dir, --verbose).

use clap::{Parser, Subcommand};

/// easel — cliente de workflows para geração de imagens.
#[derive(Debug, Parser)]
#[command(name = "easel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL do motor de geração (sobrepõe a configuração).
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Diretório de templates (sobrepõe a configuração).
    #[arg(long, global = true)]
    pub template_dir: Option<String>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gera imagens a partir de um template de workflow.
    Generate {
        /// Id do template (nome do arquivo sem extensão).
        template_id: String,

        /// Parâmetro do template no formato nome=valor (pode repetir).
        #[arg(long = "param", short = 'p', value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Diretório de saída para as imagens baixadas.
        #[arg(long)]
        out: Option<String>,

        /// Prazo máximo de espera pela conclusão, em segundos.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Lista os templates disponíveis.
    Templates {
        /// Filtra por categoria.
        #[arg(long)]
        category: Option<String>,
    },

    /// Consulta o estado de um workflow submetido.
    Status {
        /// Id retornado na submissão do workflow.
        prompt_id: String,
    },

    /// Cancela um workflow na fila ou em execução.
    Cancel {
        /// Id retornado na submissão do workflow.
        prompt_id: String,
    },

    /// Verifica se o motor de geração está acessível.
    Check,
}

/// Divide um argumento `nome=valor` vindo de `--param`.
pub fn split_param(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then_some((name, value))
}
