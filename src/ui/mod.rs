//! Plain-text presentation of the store state.

pub mod components;

use std::fmt::Write;

use crate::core::{form::ProjectForm, store::ProjectsView};

/// Renders the project list the way the terminal shows it.
pub fn render_view(view: &ProjectsView) -> String {
    let mut out = String::new();
    if let Some(notice) = &view.notice {
        out.push_str(&components::notice(notice));
    }
    if view.loading {
        let _ = writeln!(out, "{}", components::LOADING);
        return out;
    }
    if let Some(reason) = &view.failure {
        let _ = writeln!(out, "! Could not load projects: {reason}");
    }
    if view.shows_empty_state() {
        let _ = writeln!(out, "{}", components::EMPTY_TITLE);
        let _ = writeln!(out, "{}", components::EMPTY_HINT);
        return out;
    }
    for project in &view.projects {
        let editing = project.id.is_some() && project.id == view.editing;
        out.push_str(&components::project_card(project, editing));
    }
    out
}

/// Renders a form: the draft followed by any field errors.
pub fn render_form(form: &ProjectForm) -> String {
    let draft = form.draft();
    let mut out = String::new();
    let title = if draft.is_new() { "New project" } else { "Edit project" };
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "  name: {}", draft.name);
    let _ = writeln!(out, "  description: {}", draft.description);
    let _ = writeln!(out, "  status: {}", components::status_badge(draft));
    if let Some(file) = form.pending_image() {
        let _ = writeln!(out, "  image: {} ({}, {} bytes)", file.name, file.mime_type, file.size);
    }
    let errors = components::form_errors(form.errors());
    if !errors.is_empty() {
        let _ = writeln!(out, "Errors:");
        out.push_str(&errors);
    }
    out
}
