use std::fmt::Write;

use crate::core::{
    form::FormErrors,
    project::Project,
    store::Notice,
};

pub const LOADING: &str = "Loading projects...";
pub const EMPTY_TITLE: &str = "No projects yet";
pub const EMPTY_HINT: &str = "Run `projectarc add` to create your first project";

/// Status pill, e.g. `[Active #4caf50]`.
pub fn status_badge(project: &Project) -> String {
    format!("[{} {}]", project.status_label(), project.status_color())
}

/// One-line description of the card image, if there is one.
pub fn image_summary(image_url: &str) -> Option<String> {
    if image_url.is_empty() {
        return None;
    }
    match image_url.split_once(";base64,") {
        Some((header, payload)) if header.starts_with("data:") => {
            let mime_type = header.trim_start_matches("data:");
            let kb = (payload.len() as f64 * 3.0 / 4.0 / 1024.0).round() as u64;
            Some(format!("image: embedded {mime_type}, {kb}KB"))
        }
        _ => Some(format!("image: {image_url}")),
    }
}

pub fn project_card(project: &Project, editing: bool) -> String {
    let mut out = String::new();
    let marker = if editing { "*" } else { "-" };
    let _ = write!(out, "{marker} {} {}", project.name, status_badge(project));
    if let Some(id) = &project.id {
        let _ = write!(out, " ({id})");
    }
    out.push('\n');
    let _ = writeln!(out, "    {}", project.format_description());
    if let Some(image) = image_summary(&project.image_url) {
        let _ = writeln!(out, "    {image}");
    }
    out
}

pub fn form_errors(errors: &FormErrors) -> String {
    let mut out = String::new();
    if let Some(e) = &errors.name {
        let _ = writeln!(out, "  name: {e}");
    }
    if let Some(e) = &errors.description {
        let _ = writeln!(out, "  description: {e}");
    }
    if let Some(e) = &errors.image {
        let _ = writeln!(out, "  image: {e}");
    }
    out
}

pub fn notice(notice: &Notice) -> String {
    format!("! {}\n", notice.message)
}
