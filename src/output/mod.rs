use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn step(num: usize, total: usize, msg: &str) {
    println!(
        "{} {}",
        style(format!("[{}/{}]", num, total)).bold().cyan(),
        msg
    );
}

pub fn success(msg: &str) {
    println!("{} {}", style("✓").bold().green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").bold().red(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("!").bold().yellow(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", style("→").bold().blue(), msg);
}

pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Aligned `key: value` line for status-style listings.
pub fn field(key: &str, value: &str) {
    println!("  {:<12} {}", style(format!("{}:", key)).dim(), value);
}

/// Print a step log from a lifecycle operation, numbering each entry.
pub fn log_lines<S: AsRef<str>>(lines: &[S]) {
    let total = lines.len();
    for (i, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if let Some(rest) = line.strip_prefix("warning: ") {
            warning(rest);
        } else if let Some(rest) = line.strip_prefix("failed: ") {
            error(rest);
        } else {
            step(i + 1, total, line);
        }
    }
}
