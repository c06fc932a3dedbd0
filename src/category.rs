//! Category schema types as exchanged with the BuyBot category store.
//!
//! The store speaks Mongo-flavoured JSON (`_id`, `parentCategory`, camelCase);
//! these types accept the common spellings and serialize back in camelCase.

use serde::{Deserialize, Deserializer, Serialize};

/// Flat category record as returned by `GET /api/categories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(
        default,
        alias = "parentCategory",
        alias = "parent",
        deserialize_with = "parent_ref",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub product_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<CategoryImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CategoryRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
            product_count: 0,
            slug: None,
            image: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryImage {
    pub url: String,
}

/// A category with its subcategories attached.
///
/// Only deserializable: nested output goes through `Forest::write_json`,
/// which does not recurse per level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    #[serde(flatten)]
    pub record: CategoryRecord,
    #[serde(default)]
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub fn leaf(record: CategoryRecord) -> Self {
        Self {
            record,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }
}

/// The store sends parent references either as a bare id, as `null`/`""`,
/// or populated as a whole category object (`{"_id": ..., "name": ...}`).
fn parent_ref<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ParentRef {
        Id(String),
        Populated {
            #[serde(alias = "_id")]
            id: String,
        },
    }

    let parent = Option::<ParentRef>::deserialize(deserializer)?;
    Ok(parent
        .map(|p| match p {
            ParentRef::Id(id) => id,
            ParentRef::Populated { id } => id,
        })
        .filter(|id| !id.trim().is_empty()))
}
