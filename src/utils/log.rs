// src/utils/log.rs

//! Console section helpers on top of the `log` facade.
//!
//! Level filtering and timestamps are left to whatever logger the binary
//! installs; these helpers only shape run output into readable blocks.

const WIDTH: usize = 60;

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(WIDTH);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("{}", step_line(step_num, total, message));
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    for line in summary_lines(title, items) {
        log::info!("{}", line);
    }
}

fn step_line(step_num: usize, total: usize, message: &str) -> String {
    format!("[STEP {}/{}] {}", step_num, total, message)
}

fn summary_lines(title: &str, items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    std::iter::once(format!("[SUMMARY] {}", title))
        .chain(
            items
                .iter()
                .map(|(key, value)| format!("    {:<width$} : {}", key, value)),
        )
        .collect()
}
