//! Saída de terminal dos comandos avulsos: spinner e resultado colorido.
//!
//! Usa `indicatif` para o spinner e `console` para as cores.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatcher::DrainReport;
use crate::model::Configuration;
use crate::state_machine::Task;

/// Acompanha a execução de uma tarefa no terminal.
pub struct TaskProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl TaskProgress {
    pub fn start(task: &Task) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("RUN: {task}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Encerra o spinner e imprime o resumo. Devolve `true` se nada falhou.
    pub fn complete(&self, report: &DrainReport) -> bool {
        self.pb.finish_and_clear();
        for (task, kind) in &report.failed {
            println!("  {} {task}: {kind}", self.red.apply_to("✗"));
        }
        if report.skipped > 0 {
            println!(
                "  {} {} task(s) skipped, target no longer exists",
                self.yellow.apply_to("↷"),
                report.skipped
            );
        }
        let mark = if report.failed.is_empty() {
            self.green.apply_to("✓")
        } else {
            self.red.apply_to("✗")
        };
        println!("  {mark} {} task(s) completed", report.completed);
        report.failed.is_empty()
    }
}

/// Mensagem simples de sucesso, para comandos sem tarefa.
pub fn done(message: &str) {
    println!("  {} {message}", Style::new().green().bold().apply_to("✓"));
}

/// Tabela das configurações cadastradas.
pub fn print_configurations(configurations: &[Configuration]) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    if configurations.is_empty() {
        println!("{}", dim.apply_to("no configurations"));
        return;
    }
    println!(
        "{}",
        bold.apply_to(format!("{:>4}  {:<24} {:>5} {:>7} {:>7}", "id", "name", "days", "labels", "active"))
    );
    for c in configurations {
        let active = if c.is_active {
            Style::new().green().apply_to("yes")
        } else {
            Style::new().red().apply_to("no")
        };
        println!(
            "{:>4}  {:<24} {:>5} {:>7} {:>7}",
            c.id,
            c.name,
            c.days,
            if c.search_labels { "yes" } else { "no" },
            active
        );
    }
}
