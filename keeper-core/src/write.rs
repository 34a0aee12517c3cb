use base64::Engine;
use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::Document;
use keeper_docstore::DocumentWrite;
use keeper_docstore::NewDocument;
use keeper_docstore::Part;
use keeper_model::Tags;
use keeper_model::content_addressed_id;
use keeper_model::content_hash;
use keeper_model::stamp_system_tags;
use keeper_model::SystemTags;
use keeper_model::TagSource;
use keeper_providers::ProviderError;
use keeper_queue::NewTask;
use keeper_queue::TaskKind;
use keeper_vectorstore::VectorRecord;

use crate::error::KeeperError;
use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::PutInput;

/// Phase A's output: the normalized text, its content hash (`None` when the
/// text is a not-yet-extracted placeholder awaiting OCR), the resolved id,
/// and whatever byte payload an `ocr` task needs to pick the extraction
/// back up.
pub(crate) struct ResolvedInput {
    pub id: String,
    pub normalized_text: String,
    pub content_hash: Option<String>,
    pub content_type: Option<String>,
    pub source: TagSource,
    pub needs_ocr: bool,
    pub ocr_payload: Option<String>,
}

impl Keeper {
    /// Phase A.1-A.2: resolve `content` or `uri` into normalized text plus a
    /// content hash, and pick the document id (caller-supplied, or
    /// content-addressed per I4, or the bare uri per §6.1).
    pub(crate) async fn resolve_input(&self, input: &PutInput) -> KeeperResult<ResolvedInput> {
        match (&input.content, &input.uri) {
            (Some(_), Some(_)) | (None, None) => Err(KeeperError::InvalidInput(
                "put requires exactly one of content or uri".to_string(),
            )),
            (Some(content), None) => {
                let normalized = normalize_text(content);
                let hash = content_hash(&normalized);
                let id = input
                    .id
                    .clone()
                    .unwrap_or_else(|| content_addressed_id(&normalized));
                Ok(ResolvedInput {
                    id,
                    normalized_text: normalized,
                    content_hash: Some(hash),
                    content_type: None,
                    source: TagSource::Inline,
                    needs_ocr: false,
                    ocr_payload: None,
                })
            }
            (None, Some(uri)) => {
                let (bytes, content_type) = self.providers.fetch(uri).await?;
                let id = input.id.clone().unwrap_or_else(|| uri.clone());
                if is_text_content_type(&content_type) {
                    let normalized = normalize_text(&String::from_utf8_lossy(&bytes));
                    let hash = content_hash(&normalized);
                    Ok(ResolvedInput {
                        id,
                        normalized_text: normalized,
                        content_hash: Some(hash),
                        content_type: Some(content_type),
                        source: TagSource::Uri,
                        needs_ocr: false,
                        ocr_payload: None,
                    })
                } else {
                    match self.providers.describe(&bytes, &content_type).await {
                        Ok(text) => {
                            let normalized = normalize_text(&text);
                            let hash = content_hash(&normalized);
                            Ok(ResolvedInput {
                                id,
                                normalized_text: normalized,
                                content_hash: Some(hash),
                                content_type: Some(content_type),
                                source: TagSource::Uri,
                                needs_ocr: false,
                                ocr_payload: None,
                            })
                        }
                        Err(ProviderError::Unavailable(_)) => {
                            let payload = encode_ocr_payload(&bytes, &content_type);
                            Ok(ResolvedInput {
                                id,
                                normalized_text: String::new(),
                                content_hash: None,
                                content_type: Some(content_type),
                                source: TagSource::Uri,
                                needs_ocr: true,
                                ocr_payload: Some(payload),
                            })
                        }
                        Err(other) => Err(other.into()),
                    }
                }
            }
        }
    }

    pub(crate) async fn placeholder_dimension(&self) -> usize {
        if let Some(dim) = self.vectorstore.dimension().await {
            return dim;
        }
        if let Some(identity) = self.providers.recorded_identity().await {
            return identity.dimension;
        }
        let config = self.config.read().await;
        config
            .provider_identity
            .as_ref()
            .map(|i| i.dimension)
            .unwrap_or(1)
    }

    /// Phase C.1-C.2: dedup probe, then embed-or-defer.
    pub(crate) async fn acquire_vector(
        &self,
        resolved: &ResolvedInput,
        now: DateTime<Utc>,
    ) -> KeeperResult<(Vec<f32>, bool)> {
        if let Some(hash) = &resolved.content_hash
            && let Some(dup) = self
                .docstore
                .find_by_content_hash(hash, Some(&resolved.id))
                .await?
            && let Some(existing_vector) = self.vectorstore.get(&dup.id).await?
        {
            let dimension_matches = match self.vectorstore.dimension().await {
                Some(dim) => dim == existing_vector.vector.len(),
                None => true,
            };
            if dimension_matches {
                return Ok((existing_vector.vector, false));
            }
        }

        if resolved.needs_ocr {
            let dim = self.placeholder_dimension().await;
            return Ok((vec![0.0; dim], true));
        }

        match self.providers.embed(&resolved.normalized_text).await {
            Ok((vector, previous_identity)) => {
                if let Some(previous) = previous_identity {
                    self.begin_reindex(previous, now).await?;
                }
                Ok((vector, false))
            }
            Err(ProviderError::Unavailable(_)) => {
                let dim = self.placeholder_dimension().await;
                Ok((vec![0.0; dim], true))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Phase C.3: verbatim below the configured length, otherwise a
    /// truncated placeholder plus a deferred `summarize` task carrying the
    /// original text.
    pub(crate) async fn resolve_summary(
        &self,
        input: &PutInput,
        resolved: &ResolvedInput,
        now: DateTime<Utc>,
    ) -> KeeperResult<String> {
        if let Some(summary) = &input.summary {
            return Ok(summary.clone());
        }
        if resolved.needs_ocr {
            return Ok("(pending ocr)".to_string());
        }

        let max_len = self.config.read().await.max_summary_length;
        if resolved.normalized_text.chars().count() <= max_len {
            return Ok(resolved.normalized_text.clone());
        }

        let truncated: String = resolved.normalized_text.chars().take(max_len).collect();
        self.queue
            .enqueue(
                NewTask {
                    doc_id: resolved.id.clone(),
                    task_kind: TaskKind::Summarize,
                    payload: resolved.normalized_text.clone(),
                },
                now,
            )
            .await?;
        Ok(format!("{truncated}…"))
    }

    /// The `put` write protocol (spec §4.1 Phases A-G).
    pub async fn put(&self, input: PutInput) -> KeeperResult<Document> {
        let now = Utc::now();
        let resolved = self.resolve_input(&input).await?;
        let existing = self.docstore.get(&resolved.id).await?;

        let created_at = existing
            .as_ref()
            .map(|d| d.created_at)
            .or(input.created_at)
            .unwrap_or(now);

        let mut system_tags = Tags::new();
        stamp_system_tags(&mut system_tags, created_at, now);
        if let Some(content_type) = &resolved.content_type {
            system_tags.set("_content_type", content_type.clone());
        }
        system_tags.set("_source", resolved.source.as_str());

        let existing_tags = existing.as_ref().map(|d| d.tags.clone()).unwrap_or_default();
        let caller_tags = input.tags.strip_system();

        let config = self.config.read().await;
        let default_tags = config.default_tags();
        let environment_tags = config.environment_tags();
        let required_tags = config.required_tags.clone();
        drop(config);

        let merged_tags = Tags::merge_layers([
            existing_tags.clone(),
            default_tags,
            environment_tags,
            caller_tags,
            system_tags,
        ]);

        if !keeper_model::is_system_id(&resolved.id) {
            for (key, value) in merged_tags.iter() {
                if Tags::is_system_key(key) {
                    continue;
                }
                keeper_meta::validate_constrained_tag(self.docstore.as_ref(), key, value).await?;
            }
            for key in &required_tags {
                if !merged_tags.contains_key(key) {
                    return Err(KeeperError::InvalidInput(format!(
                        "missing required tag {key}"
                    )));
                }
            }
        }

        let hash_changed = existing
            .as_ref()
            .map(|d| d.content_hash != resolved.content_hash)
            .unwrap_or(true);
        let tags_changed = existing.as_ref().map(|d| d.tags != merged_tags).unwrap_or(true);

        if let Some(existing_doc) = &existing {
            if !hash_changed && !tags_changed {
                return Ok(existing_doc.clone());
            }
            if !hash_changed {
                // Same content, different tags: Property 1 and scenario S2
                // both require `put` to archive exactly one version here,
                // same as any other versioned update; the no-archival
                // shortcut is reserved for the explicit `tag` operation.
                // The content hash didn't move, so skip the dedup probe and
                // provider call entirely and just carry the existing vector
                // forward onto both the archived and current keys.
                let write = DocumentWrite {
                    summary: existing_doc.summary.clone(),
                    tags: merged_tags.clone(),
                    content_hash: resolved.content_hash.clone(),
                    updated_at: now,
                };
                let updated = self.docstore.update_versioned(&resolved.id, write).await?;
                let versions = self.docstore.list_versions(&resolved.id).await?;
                if let Some(archived) = versions.first()
                    && let Some(previous_vector) = self.vectorstore.get(&resolved.id).await?
                {
                    self.vectorstore
                        .upsert(VectorRecord {
                            key: format!("{}@v{}", resolved.id, archived.version_ordinal),
                            vector: previous_vector.vector.clone(),
                            summary: existing_doc.summary.clone(),
                            tags: existing_doc.tags.clone(),
                            updated_at: archived.created_at,
                        })
                        .await?;
                    self.vectorstore
                        .upsert(VectorRecord {
                            key: resolved.id.clone(),
                            vector: previous_vector.vector,
                            summary: updated.summary.clone(),
                            tags: merged_tags.clone(),
                            updated_at: now,
                        })
                        .await?;
                }
                self.maintain_edges(&resolved.id, &existing_doc.tags, &merged_tags, now)
                    .await?;
                self.maybe_backfill_tag_declaration(
                    &resolved.id,
                    Some(&existing_doc.tags),
                    &merged_tags,
                    now,
                )
                .await?;
                self.docstore.touch_accessed(&resolved.id, now).await?;
                return Ok(updated);
            }
        }

        let (vector, embed_pending) = self.acquire_vector(&resolved, now).await?;
        let summary = self.resolve_summary(&input, &resolved, now).await?;

        let mut final_tags = merged_tags.clone();
        if embed_pending {
            final_tags.set("_embed_pending", "1");
        }

        let document = if let Some(existing_doc) = &existing {
            let write = DocumentWrite {
                summary: summary.clone(),
                tags: final_tags.clone(),
                content_hash: resolved.content_hash.clone(),
                updated_at: now,
            };
            let updated = self.docstore.update_versioned(&resolved.id, write).await?;
            let versions = self.docstore.list_versions(&resolved.id).await?;
            if let Some(archived) = versions.first()
                && let Some(previous_vector) = self.vectorstore.get(&resolved.id).await?
            {
                self.vectorstore
                    .upsert(VectorRecord {
                        key: format!("{}@v{}", resolved.id, archived.version_ordinal),
                        vector: previous_vector.vector,
                        summary: existing_doc.summary.clone(),
                        tags: existing_doc.tags.clone(),
                        updated_at: archived.created_at,
                    })
                    .await?;
            }
            updated
        } else {
            self.docstore
                .create(NewDocument {
                    id: resolved.id.clone(),
                    summary: summary.clone(),
                    tags: final_tags.clone(),
                    content_hash: resolved.content_hash.clone(),
                    created_at,
                })
                .await?
        };

        self.vectorstore
            .upsert(VectorRecord {
                key: resolved.id.clone(),
                vector,
                summary: summary.clone(),
                tags: final_tags.clone(),
                updated_at: now,
            })
            .await?;

        let empty_tags = Tags::new();
        let old_tags = existing.as_ref().map(|d| &d.tags).unwrap_or(&empty_tags);
        self.maintain_edges(&resolved.id, old_tags, &final_tags, now).await?;
        self.maybe_backfill_tag_declaration(&resolved.id, existing.as_ref().map(|d| &d.tags), &final_tags, now)
            .await?;

        if embed_pending && !resolved.needs_ocr {
            self.queue
                .enqueue(
                    NewTask {
                        doc_id: resolved.id.clone(),
                        task_kind: TaskKind::Embed,
                        payload: resolved.normalized_text.clone(),
                    },
                    now,
                )
                .await?;
        }
        if let Some(ocr_payload) = resolved.ocr_payload {
            self.queue
                .enqueue(
                    NewTask {
                        doc_id: resolved.id.clone(),
                        task_kind: TaskKind::Ocr,
                        payload: ocr_payload,
                    },
                    now,
                )
                .await?;
        }

        self.docstore.touch_accessed(&resolved.id, now).await?;
        Ok(document)
    }

    /// `tag`: a tag-only update, bypassing content resolution entirely
    /// (spec §4.1 `tag` row). Empty values delete keys per I3.
    pub async fn tag(&self, id: &str, tags: Tags) -> KeeperResult<Document> {
        let now = Utc::now();
        let existing = self
            .docstore
            .get(id)
            .await?
            .ok_or_else(|| KeeperError::NotFound(id.to_string()))?;

        let caller_tags = tags.strip_system();
        if !keeper_model::is_system_id(id) {
            for (key, value) in caller_tags.iter() {
                keeper_meta::validate_constrained_tag(self.docstore.as_ref(), key, value).await?;
            }
        }

        let mut system_tags = Tags::new();
        stamp_system_tags(&mut system_tags, existing.created_at, now);
        let existing_system = SystemTags(&existing.tags);
        if let Some(content_type) = existing_system.content_type() {
            system_tags.set("_content_type", content_type);
        }
        if let Some(source) = existing_system.source() {
            system_tags.set("_source", source.as_str());
        }
        if existing_system.embed_pending() {
            system_tags.set("_embed_pending", "1");
        }

        let merged = Tags::merge_layers([existing.tags.clone(), caller_tags, system_tags]);
        if merged == existing.tags {
            return Ok(existing);
        }

        let updated = self.docstore.update_tags_only(id, merged.clone(), now).await?;
        if let Some(record) = self.vectorstore.get(id).await? {
            self.vectorstore
                .upsert(VectorRecord {
                    key: id.to_string(),
                    vector: record.vector,
                    summary: record.summary,
                    tags: merged.clone(),
                    updated_at: now,
                })
                .await?;
        }
        self.maintain_edges(id, &existing.tags, &merged, now).await?;
        self.maybe_backfill_tag_declaration(id, Some(&existing.tags), &merged, now)
            .await?;
        self.docstore.touch_accessed(id, now).await?;
        Ok(updated)
    }

    pub async fn tag_part(&self, id: &str, part_num: u32, tags: Tags) -> KeeperResult<Part> {
        Ok(self
            .docstore
            .tag_part(id, part_num, tags.strip_system())
            .await?)
    }

    /// `delete`: removes the current document (and, if requested, its
    /// archived versions) plus every embedding keyed off it.
    pub async fn delete(&self, id: &str, delete_versions: bool) -> KeeperResult<bool> {
        let parts = self.docstore.list_parts(id).await?;
        let versions = if delete_versions {
            self.docstore.list_versions(id).await?
        } else {
            Vec::new()
        };

        let existed = self.docstore.delete(id, delete_versions).await?;
        if existed {
            self.vectorstore.delete(id).await?;
            for part in parts {
                self.vectorstore.delete(&format!("{id}@p{}", part.part_num)).await?;
            }
            for version in versions {
                self.vectorstore
                    .delete(&format!("{id}@v{}", version.version_ordinal))
                    .await?;
            }
        }
        Ok(existed)
    }

    /// `revert`: promote the newest archived version back to current,
    /// shrinking the tail by one; the archived vector is promoted to the
    /// current key and its archived key is dropped.
    pub async fn revert(&self, id: &str) -> KeeperResult<Option<Document>> {
        let versions = self.docstore.list_versions(id).await?;
        let Some(newest) = versions.first().cloned() else {
            return Ok(None);
        };

        let reverted = self.docstore.revert(id).await?;
        if let Some(doc) = &reverted {
            let archived_key = format!("{id}@v{}", newest.version_ordinal);
            if let Some(archived_vector) = self.vectorstore.get(&archived_key).await? {
                self.vectorstore
                    .upsert(VectorRecord {
                        key: id.to_string(),
                        vector: archived_vector.vector,
                        summary: doc.summary.clone(),
                        tags: doc.tags.clone(),
                        updated_at: doc.updated_at,
                    })
                    .await?;
                self.vectorstore.delete(&archived_key).await?;
            }
        }
        Ok(reverted)
    }

    pub async fn get_version(
        &self,
        id: &str,
        offset: u32,
    ) -> KeeperResult<Option<keeper_docstore::Version>> {
        Ok(self.docstore.get_version(id, offset).await?)
    }

    pub async fn list_versions(&self, id: &str) -> KeeperResult<Vec<keeper_docstore::Version>> {
        Ok(self.docstore.list_versions(id).await?)
    }
}

/// Trim surrounding whitespace and normalize line endings, the minimal
/// "regularize to text" step spec §4.1 Phase A.1 asks for once an
/// extractor (out of scope, §1) has already produced plain text.
pub(crate) fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim().to_string()
}

pub(crate) fn is_text_content_type(content_type: &str) -> bool {
    content_type.is_empty() || content_type.starts_with("text/") || content_type.contains("json")
}

/// `ocr` task payloads are opaque strings (spec §3.1 `PendingTask.payload`);
/// media bytes travel as `{content_type}\n{base64 bytes}`.
fn encode_ocr_payload(bytes: &[u8], content_type: &str) -> String {
    format!(
        "{content_type}\n{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub(crate) fn decode_ocr_payload(payload: &str) -> Option<(String, Vec<u8>)> {
    let (content_type, encoded) = payload.split_once('\n')?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    Some((content_type.to_string(), bytes))
}
