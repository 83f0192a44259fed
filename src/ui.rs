//! Interface de terminal do easel — spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`GenerationProgress`] acompanha visualmente a
//! execução de um workflow no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::tracker::{WorkflowState, WorkflowStatus};

/// Indicador visual de progresso para uma geração no terminal.
///
/// Exibe um spinner animado durante a execução e mensagens coloridas para
/// sucesso (verde) e falha (vermelho).
pub struct GenerationProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
}

impl GenerationProgress {
    /// Inicia o spinner com o nome do template e retorna a instância.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("PENDING: {label}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado observado.
    pub fn update(&self, status: &WorkflowStatus) {
        let message = match status.state {
            WorkflowState::Queued => match status.queue_position {
                Some(position) => format!("QUEUED (position {position})"),
                None => "QUEUED".to_string(),
            },
            WorkflowState::Running => {
                format!("RUNNING {:>3.0}%", status.progress * 100.0)
            }
            state => state.to_string(),
        };
        self.pb.set_message(message);
    }

    /// Encerra o spinner com uma mensagem de sucesso.
    pub fn finish_success(&self, images: usize, duration_ms: u64) {
        self.pb.finish_and_clear();
        let plural = if images == 1 { "image" } else { "images" };
        println!(
            "{} {images} {plural} in {:.1}s",
            self.green.apply_to("✔"),
            duration_ms as f64 / 1000.0
        );
    }

    /// Encerra o spinner com uma mensagem de falha.
    pub fn finish_failure(&self, reason: &str) {
        self.pb.finish_and_clear();
        eprintln!("{} {reason}", self.red.apply_to("✘"));
    }
}
