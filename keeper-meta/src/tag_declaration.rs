use keeper_docstore::DocumentStore;
use keeper_docstore::ListQuery;
use keeper_model::SystemTags;

use crate::error::MetaError;
use crate::error::MetaResult;

/// What `.tag/K` declares about key `K` (spec §4.5).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDeclaration {
    pub constrained: bool,
    /// `Some(verb)` when `_inverse=verb` marks `K` as an edge key.
    pub inverse: Option<String>,
}

fn tag_decl_id(key: &str) -> String {
    format!(".tag/{key}")
}

/// Load the `.tag/K` declaration for `key`, if such a doc exists.
pub async fn load_tag_declaration(
    docstore: &dyn DocumentStore,
    key: &str,
) -> MetaResult<Option<TagDeclaration>> {
    let Some(doc) = docstore
        .get(&tag_decl_id(key))
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?
    else {
        return Ok(None);
    };
    let system = SystemTags(&doc.tags);
    Ok(Some(TagDeclaration {
        constrained: system.constrained(),
        inverse: system.inverse().map(str::to_string),
    }))
}

/// Every key currently declared as an edge key (`.tag/K` with
/// `_inverse=V`), alongside its inverse verb. Used by the write path
/// (Phase F) to decide which changed tags require edge maintenance.
pub async fn edge_keys(
    docstore: &dyn DocumentStore,
) -> MetaResult<Vec<(String, String)>> {
    let docs = docstore
        .list(ListQuery {
            include_system: true,
            ..Default::default()
        })
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?;

    Ok(docs
        .into_iter()
        .filter(|d| d.id.starts_with(".tag/") && !d.id[".tag/".len()..].contains('/'))
        .filter_map(|d| {
            let inverse = SystemTags(&d.tags).inverse()?.to_string();
            let key = d.id[".tag/".len()..].to_string();
            Some((key, inverse))
        })
        .collect())
}

/// Enforce I9: if `.tag/K` is constrained, `value` must name an existing
/// `.tag/K/value` child doc. Returns the valid-values list for the error
/// message when it does not.
pub async fn validate_constrained_tag(
    docstore: &dyn DocumentStore,
    key: &str,
    value: &str,
) -> MetaResult<()> {
    let Some(decl) = load_tag_declaration(docstore, key).await? else {
        return Ok(());
    };
    if !decl.constrained {
        return Ok(());
    }

    let child_id = format!("{}/{value}", tag_decl_id(key));
    let exists = docstore
        .get(&child_id)
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?
        .is_some();
    if exists {
        return Ok(());
    }

    let prefix = format!("{}/", tag_decl_id(key));
    let docs = docstore
        .list(ListQuery {
            include_system: true,
            ..Default::default()
        })
        .await
        .map_err(|e| MetaError::Storage(e.to_string()))?;
    let valid_values: Vec<String> = docs
        .into_iter()
        .filter_map(|d| d.id.strip_prefix(&prefix).map(str::to_string))
        .collect();

    Err(MetaError::TagConstraintViolation {
        key: key.to_string(),
        valid_values,
    })
}
