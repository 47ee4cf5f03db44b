use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::model::Color;

/// Longest description shown on a project card before it is cut off.
const CARD_DESCRIPTION_LIMIT: usize = 60;

/// Store-assigned identity of a persisted project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Active,
    Complete,
}

impl Status {
    /// Parses a stored status value. Anything unknown reads as `Pending`.
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Status::Active,
            "complete" => Status::Complete,
            _ => Status::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Active => "active",
            Status::Complete => "complete",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loosely-typed project fields, shaped like a stored document.
///
/// Used as the initializer for [`Project::create`]: a field only overrides the
/// default when it is present and non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFields {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub status: Option<String>,
}

/// A project document as delivered by the store in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub status: String,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

fn serialize_timestamp<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(ts) => {
            let formatted = ts
                .format(&time::format_description::well_known::Rfc3339)
                .map_err(serde::ser::Error::custom)?;
            serializer.serialize_some(&formatted)
        }
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Option<ProjectId>,
    pub name: String,
    pub description: String,
    pub image_url: String,
    pub status: Status,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            description: String::new(),
            image_url: String::new(),
            status: Status::Pending,
            created_at: None,
            updated_at: None,
        }
    }
}

fn truthy(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Project {
    /// Builds a project from defaults, applying only the truthy fields.
    ///
    /// An empty string never overwrites a default: `create` with
    /// `name: Some("")` keeps the empty default name, and `status: Some("")`
    /// keeps `Pending`.
    pub fn create(fields: &ProjectFields) -> Self {
        let mut project = Project::default();
        if let Some(id) = truthy(&fields.id) {
            project.id = Some(ProjectId::new(id));
        }
        if let Some(name) = truthy(&fields.name) {
            project.name = name.to_string();
        }
        if let Some(description) = truthy(&fields.description) {
            project.description = description.to_string();
        }
        if let Some(image_url) = truthy(&fields.image_url) {
            project.image_url = image_url.to_string();
        }
        if let Some(status) = truthy(&fields.status) {
            project.status = Status::parse(status);
        }
        project
    }

    pub fn from_record(record: &ProjectRecord) -> Self {
        let mut project = Project::create(&ProjectFields {
            id: Some(record.id.as_str().to_string()),
            name: Some(record.name.clone()),
            description: Some(record.description.clone()),
            image_url: Some(record.image_url.clone()),
            status: Some(record.status.clone()),
        });
        project.created_at = record.created_at;
        project.updated_at = record.updated_at;
        project
    }

    pub fn to_fields(&self) -> ProjectFields {
        ProjectFields {
            id: self.id.as_ref().map(|id| id.as_str().to_string()),
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            image_url: Some(self.image_url.clone()),
            status: Some(self.status.as_str().to_string()),
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn status_color(&self) -> Color {
        match self.status {
            Status::Active => Color::GREEN,
            Status::Complete => Color::BLUE,
            Status::Pending => Color::ORANGE,
        }
    }

    pub fn status_label(&self) -> String {
        let status = self.status.as_str();
        let mut chars = status.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Description as shown on a card: at most 60 characters, then `...`.
    pub fn format_description(&self) -> String {
        if self.description.chars().count() > CARD_DESCRIPTION_LIMIT {
            let head: String = self.description.chars().take(CARD_DESCRIPTION_LIMIT).collect();
            format!("{head}...")
        } else {
            self.description.clone()
        }
    }
}
