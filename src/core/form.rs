use crate::core::{
    codec::{self, DEFAULT_MAX_SIZE_KB, ImageError, ImageFile},
    project::{Project, ProjectFields},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name is required")]
    NameRequired,

    #[error("Name needs to be at least 3 characters.")]
    NameTooShort,

    #[error("Description is required.")]
    DescriptionRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Name,
    Description,
    Status,
}

/// Per-field error messages shown next to the inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub name: Option<ValidationError>,
    pub description: Option<ValidationError>,
    pub image: Option<String>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.image.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("the form has invalid fields")]
    Invalid(FormErrors),

    #[error(transparent)]
    Image(#[from] ImageError),
}

pub fn validate(project: &Project) -> FormErrors {
    let name_len = project.name.chars().count();
    let name = if name_len == 0 {
        Some(ValidationError::NameRequired)
    } else if name_len < 3 {
        Some(ValidationError::NameTooShort)
    } else {
        None
    };
    let description = project
        .description
        .is_empty()
        .then_some(ValidationError::DescriptionRequired);
    FormErrors {
        name,
        description,
        image: None,
    }
}

/// Draft of a project being created or edited.
#[derive(Debug, Clone)]
pub struct ProjectForm {
    draft: Project,
    errors: FormErrors,
    image_file: Option<ImageFile>,
    max_image_kb: u32,
}

impl ProjectForm {
    pub fn new(project: Project) -> Self {
        Self {
            draft: project,
            errors: FormErrors::default(),
            image_file: None,
            max_image_kb: DEFAULT_MAX_SIZE_KB,
        }
    }

    /// Overrides the compression target used by [`ProjectForm::submit`].
    pub fn with_max_image_kb(mut self, max_image_kb: u32) -> Self {
        self.max_image_kb = max_image_kb;
        self
    }

    pub fn draft(&self) -> &Project {
        &self.draft
    }

    pub fn errors(&self) -> &FormErrors {
        &self.errors
    }

    pub fn pending_image(&self) -> Option<&ImageFile> {
        self.image_file.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Applies one input change and re-validates the whole draft.
    pub fn set_field(&mut self, field: FormField, value: &str) {
        let mut fields: ProjectFields = self.draft.to_fields();
        let value = Some(value.to_string());
        match field {
            FormField::Name => fields.name = value,
            FormField::Description => fields.description = value,
            FormField::Status => fields.status = value,
        }
        let created_at = self.draft.created_at;
        let updated_at = self.draft.updated_at;
        self.draft = Project::create(&fields);
        self.draft.created_at = created_at;
        self.draft.updated_at = updated_at;
        self.errors = validate(&self.draft);
    }

    /// Picks the image to upload on submit. An invalid file is rejected and
    /// its reason shown on the image field.
    pub fn select_image(&mut self, file: Option<ImageFile>) -> Result<(), ImageError> {
        self.errors.image = None;
        let Some(file) = file else {
            return Ok(());
        };
        if let Err(e) = codec::validate(Some(&file)) {
            self.errors.image = Some(e.to_string());
            return Err(e);
        }
        self.image_file = Some(file);
        Ok(())
    }

    /// Validates the draft and compresses the pending image, returning the
    /// project ready to hand to the store.
    pub async fn submit(&mut self) -> Result<Project, FormError> {
        let field_errors = validate(&self.draft);
        self.errors.name = field_errors.name;
        self.errors.description = field_errors.description;
        if !self.is_valid() {
            return Err(FormError::Invalid(self.errors.clone()));
        }

        let mut project = self.draft.clone();
        if let Some(file) = &self.image_file {
            tracing::debug!(file = %file.name, "Compressing image");
            match codec::compress(file, self.max_image_kb).await {
                Ok(image) => project.image_url = image.into_data_url(),
                Err(e) => {
                    tracing::warn!(error = %e, "Image compression failed");
                    self.errors.image = Some(e.to_string());
                    return Err(FormError::Image(e));
                }
            }
        }
        Ok(project)
    }
}
