use console::{StyledObject, style};

use crate::types::Recommendation;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// `  label: value` with the label dimmed
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {} {}", style(format!("{}:", label)).dim(), value);
    }

    pub fn recommendation(&self, recommendation: Recommendation) -> StyledObject<&'static str> {
        let label = style(recommendation.label()).bold();
        match recommendation {
            Recommendation::StrongBuy | Recommendation::Buy => label.green(),
            Recommendation::Hold => label.yellow(),
            Recommendation::Sell | Recommendation::StrongSell => label.red(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
