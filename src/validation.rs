//! Validation of the "create category" form before it is forwarded to the store.

use crate::tree::Forest;
use image::ImageFormat;
use serde::Serialize;
use thiserror::Error;

/// Largest accepted category image.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ACCEPTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Raw form fields as submitted.
#[derive(Debug, Clone, Default)]
pub struct CategoryForm {
    pub name: String,
    pub description: Option<String>,
    pub parent_category: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// A form that passed validation, normalized for the store.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("Category name is required")]
    NameTooShort,
    #[error("Parent category {0} does not exist")]
    UnknownParent(String),
    #[error("Max image size is 5MB (got {size} bytes).")]
    ImageTooLarge { size: usize },
    #[error(
        "Only .jpg, .jpeg, .png and .webp formats are supported (got {}).",
        .content_type.as_deref().unwrap_or("no content type")
    )]
    UnsupportedImageType { content_type: Option<String> },
    #[error("Image content does not match a supported format.")]
    ImageContentMismatch,
}

impl FieldError {
    /// Form field the error belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            Self::NameTooShort => "name",
            Self::UnknownParent(_) => "parentCategory",
            Self::ImageTooLarge { .. }
            | Self::UnsupportedImageType { .. }
            | Self::ImageContentMismatch => "image",
        }
    }
}

/// Serializable `{field, message}` pair for 422 responses.
#[derive(Debug, Clone, Serialize)]
pub struct FieldMessage {
    pub field: &'static str,
    pub message: String,
}

impl From<&FieldError> for FieldMessage {
    fn from(err: &FieldError) -> Self {
        Self {
            field: err.field(),
            message: err.to_string(),
        }
    }
}

/// Check every field and collect all failures.
///
/// `known` is the current category snapshot; when present the parent must be
/// one of its ids.
pub fn validate(form: CategoryForm, known: Option<&Forest>) -> Result<NewCategory, Vec<FieldError>> {
    let mut errors = Vec::new();

    let name = form.name.trim().to_string();
    if name.chars().count() < 2 {
        errors.push(FieldError::NameTooShort);
    }

    let description = non_blank(form.description);
    let parent_id = non_blank(form.parent_category);

    if let (Some(parent), Some(forest)) = (parent_id.as_deref(), known) {
        if !forest.iter().any(|(_, node)| node.id() == parent) {
            errors.push(FieldError::UnknownParent(parent.to_string()));
        }
    }

    // An empty file input arrives as a zero-length part; treat it as absent.
    let image = form.image.filter(|img| !img.data.is_empty());
    if let Some(img) = &image {
        if let Err(err) = check_image(img) {
            errors.push(err);
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(NewCategory {
        name,
        description,
        parent_id,
        image,
    })
}

fn check_image(img: &ImageUpload) -> Result<(), FieldError> {
    if img.data.len() > MAX_IMAGE_BYTES {
        return Err(FieldError::ImageTooLarge {
            size: img.data.len(),
        });
    }

    let declared = img.content_type.as_deref().map(str::to_ascii_lowercase);
    if !declared
        .as_deref()
        .map(|ct| ACCEPTED_IMAGE_TYPES.contains(&ct))
        .unwrap_or(false)
    {
        return Err(FieldError::UnsupportedImageType {
            content_type: img.content_type.clone(),
        });
    }

    match image::guess_format(&img.data) {
        Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) => Ok(()),
        _ => Err(FieldError::ImageContentMismatch),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
