use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use keeper_model::Tags;
use tokio::sync::RwLock;

use crate::model::DocStoreError;
use crate::model::DocStoreResult;
use crate::model::Document;
use crate::model::DocumentStore;
use crate::model::DocumentWrite;
use crate::model::Edge;
use crate::model::ListQuery;
use crate::model::NewDocument;
use crate::model::NewPart;
use crate::model::Part;
use crate::model::Version;

#[derive(Default)]
struct State {
    documents: HashMap<String, Document>,
    /// Ascending by ordinal: `versions[id][0]` is ordinal 1 (oldest).
    versions: HashMap<String, Vec<Version>>,
    parts: HashMap<String, Vec<Part>>,
    edges: Vec<Edge>,
}

/// Reference [`DocumentStore`] backed by in-process maps, guarded by a
/// single `RwLock` the way the teacher's `InMemoryDocumentStore` guards its
/// object table. Used by tests and by callers that do not need the
/// crash-durability `SqliteDocumentStore` provides.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<State>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: &str) -> DocStoreError {
        DocStoreError::NotFound(id.to_string())
    }
}

fn list_matches(doc: &Document, query: &ListQuery) -> bool {
    if !query.include_system && keeper_model::is_system_id(&doc.id) {
        return false;
    }
    if !doc.tags.matches_filter(&query.tag_filter) {
        return false;
    }
    if let Some(since) = query.since
        && doc.updated_at < since
    {
        return false;
    }
    if let Some(until) = query.until
        && doc.updated_at > until
    {
        return false;
    }
    true
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, doc: NewDocument) -> DocStoreResult<Document> {
        let mut state = self.state.write().await;
        if state.documents.contains_key(&doc.id) {
            return Err(DocStoreError::Conflict(format!(
                "document {} already exists",
                doc.id
            )));
        }
        let document = Document {
            id: doc.id.clone(),
            summary: doc.summary,
            tags: doc.tags,
            content_hash: doc.content_hash,
            created_at: doc.created_at,
            updated_at: doc.created_at,
            accessed_at: doc.created_at,
            part_count: None,
        };
        state.documents.insert(doc.id.clone(), document.clone());
        state.versions.entry(doc.id).or_default();
        Ok(document)
    }

    async fn get(&self, id: &str) -> DocStoreResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.get(id).cloned())
    }

    async fn update_versioned(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document> {
        let mut state = self.state.write().await;
        let current = state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))?;

        let next_ordinal = state.versions.get(id).map_or(1, |v| v.len() as u32 + 1);
        let archived = Version {
            doc_id: id.to_string(),
            version_ordinal: next_ordinal,
            summary: current.summary,
            tags: current.tags,
            content_hash: current.content_hash,
            created_at: current.updated_at,
        };
        state.versions.entry(id.to_string()).or_default().push(archived);

        let updated = Document {
            id: id.to_string(),
            summary: write.summary,
            tags: write.tags,
            content_hash: write.content_hash,
            created_at: current.created_at,
            updated_at: write.updated_at,
            accessed_at: write.updated_at,
            part_count: current.part_count,
        };
        state.documents.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn update_tags_only(
        &self,
        id: &str,
        tags: Tags,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document> {
        let mut state = self.state.write().await;
        let current = state
            .documents
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        current.tags = tags;
        current.updated_at = updated_at;
        current.accessed_at = updated_at;
        Ok(current.clone())
    }

    async fn update_summary_only(
        &self,
        id: &str,
        summary: String,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document> {
        let mut state = self.state.write().await;
        let current = state
            .documents
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        current.summary = summary;
        current.updated_at = updated_at;
        current.accessed_at = updated_at;
        Ok(current.clone())
    }

    async fn update_current(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document> {
        let mut state = self.state.write().await;
        let current = state
            .documents
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        current.summary = write.summary;
        current.tags = write.tags;
        current.content_hash = write.content_hash;
        current.updated_at = write.updated_at;
        current.accessed_at = write.updated_at;
        Ok(current.clone())
    }

    async fn delete(&self, id: &str, delete_versions: bool) -> DocStoreResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.documents.remove(id).is_some();
        state.parts.remove(id);
        state.edges.retain(|e| e.source_doc != id);
        if delete_versions {
            state.versions.remove(id);
        }
        Ok(removed)
    }

    async fn revert(&self, id: &str) -> DocStoreResult<Option<Document>> {
        let mut state = self.state.write().await;
        let Some(versions) = state.versions.get_mut(id) else {
            return Ok(None);
        };
        let Some(newest) = versions.pop() else {
            return Ok(None);
        };

        let promoted = Document {
            id: id.to_string(),
            summary: newest.summary,
            tags: newest.tags,
            content_hash: newest.content_hash,
            created_at: state
                .documents
                .get(id)
                .map_or(newest.created_at, |d| d.created_at),
            updated_at: newest.created_at,
            accessed_at: newest.created_at,
            part_count: state.documents.get(id).and_then(|d| d.part_count),
        };
        state.documents.insert(id.to_string(), promoted.clone());
        Ok(Some(promoted))
    }

    async fn touch_accessed(&self, id: &str, accessed_at: DateTime<Utc>) -> DocStoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(doc) = state.documents.get_mut(id) {
            doc.accessed_at = accessed_at;
        }
        Ok(())
    }

    async fn get_version(&self, id: &str, offset: u32) -> DocStoreResult<Option<Version>> {
        let state = self.state.read().await;
        if offset == 0 {
            return Ok(state
                .documents
                .get(id)
                .map(|doc| Version {
                    doc_id: doc.id.clone(),
                    version_ordinal: 0,
                    summary: doc.summary.clone(),
                    tags: doc.tags.clone(),
                    content_hash: doc.content_hash.clone(),
                    created_at: doc.updated_at,
                }));
        }
        let Some(versions) = state.versions.get(id) else {
            return Ok(None);
        };
        let len = versions.len() as u32;
        if offset > len {
            return Ok(None);
        }
        // offset 1 = newest archived = last element.
        let index = (len - offset) as usize;
        Ok(versions.get(index).cloned())
    }

    async fn list_versions(&self, id: &str) -> DocStoreResult<Vec<Version>> {
        let state = self.state.read().await;
        let Some(versions) = state.versions.get(id) else {
            return Ok(Vec::new());
        };
        let mut out = versions.clone();
        out.reverse();
        Ok(out)
    }

    async fn replace_parts(&self, id: &str, parts: Vec<NewPart>) -> DocStoreResult<Vec<Part>> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(id) {
            return Err(Self::not_found(id));
        }
        let now = Utc::now();
        let built: Vec<Part> = parts
            .into_iter()
            .map(|p| Part {
                doc_id: id.to_string(),
                part_num: p.part_num,
                summary: p.summary,
                tags: p.tags,
                content: p.content,
                created_at: now,
            })
            .collect();
        let count = built.len() as u32;
        state.parts.insert(id.to_string(), built.clone());
        if let Some(doc) = state.documents.get_mut(id) {
            doc.part_count = Some(count);
        }
        Ok(built)
    }

    async fn list_parts(&self, id: &str) -> DocStoreResult<Vec<Part>> {
        let state = self.state.read().await;
        Ok(state.parts.get(id).cloned().unwrap_or_default())
    }

    async fn get_part(&self, id: &str, part_num: u32) -> DocStoreResult<Option<Part>> {
        let state = self.state.read().await;
        Ok(state
            .parts
            .get(id)
            .and_then(|parts| parts.iter().find(|p| p.part_num == part_num).cloned()))
    }

    async fn tag_part(&self, id: &str, part_num: u32, tags: Tags) -> DocStoreResult<Part> {
        let mut state = self.state.write().await;
        let parts = state
            .parts
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        let part = parts
            .iter_mut()
            .find(|p| p.part_num == part_num)
            .ok_or_else(|| Self::not_found(&format!("{id}@P{part_num}")))?;
        part.tags = tags;
        Ok(part.clone())
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
        exclude_id: Option<&str>,
    ) -> DocStoreResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .values()
            .find(|doc| {
                doc.content_hash.as_deref() == Some(hash)
                    && exclude_id != Some(doc.id.as_str())
            })
            .cloned())
    }

    async fn list(&self, query: ListQuery) -> DocStoreResult<Vec<Document>> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|doc| list_matches(doc, &query))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn fulltext_search(&self, text: &str, query: ListQuery) -> DocStoreResult<Vec<Document>> {
        let needle = text.to_lowercase();
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|doc| list_matches(doc, &query))
            .filter(|doc| doc.summary.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn upsert_edge(&self, edge: Edge) -> DocStoreResult<()> {
        let mut state = self.state.write().await;
        if !state.edges.contains(&edge) {
            state.edges.push(edge);
        }
        Ok(())
    }

    async fn delete_edge(&self, edge: Edge) -> DocStoreResult<()> {
        let mut state = self.state.write().await;
        state.edges.retain(|e| e != &edge);
        Ok(())
    }

    async fn inverse_edges(&self, target_doc: &str, tag_key: &str) -> DocStoreResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.target_doc == target_doc && e.tag_key == tag_key)
            .map(|e| e.source_doc.clone())
            .collect())
    }

    async fn edges_from(&self, source_doc: &str) -> DocStoreResult<Vec<Edge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| e.source_doc == source_doc)
            .cloned()
            .collect())
    }
}
