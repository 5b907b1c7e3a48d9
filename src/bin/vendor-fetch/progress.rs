use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use vendor_fetch::Staged;

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn make_progress_spinner(m: &MultiProgress, prefix: String) -> ProgressBar {
    let pb = m.add(ProgressBar::new_spinner());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb.set_style(
        style("{prefix:.cyan.bold/blue.bold} 🔎 {msg:.cyan/blue} {spinner}")
            .tick_chars("⣾⣽⣻⢿⡿⣟⣯⣷"),
    );
    pb.set_prefix(prefix);
    pb
}

pub fn complete_progress_bar(
    pb: ProgressBar,
    name: &str,
    result: &Result<Vec<Staged>, vendor_fetch::Error>,
) {
    let template = if result.is_ok() {
        "{prefix:.cyan.bold/blue.bold} {msg:.cyan/blue}"
    } else {
        "{prefix:.cyan.bold/blue.bold} {msg:.red.bold}"
    };
    pb.set_style(style(template));
    let status = match result {
        Ok(staged) => format!("😸 {name} ({} subtree(s) staged)", staged.len()),
        Err(_) => format!("😿 failed to fetch '{name}'"),
    };
    pb.finish_with_message(status);
}
