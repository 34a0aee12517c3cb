use chrono::DateTime;
use chrono::Utc;
use keeper_docstore::DocumentWrite;
use keeper_docstore::ListQuery;
use keeper_docstore::NewDocument;
use keeper_docstore::NewPart;
use keeper_docstore::Version;
use keeper_queue::NewTask;
use keeper_queue::TaskKind;

use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::ExportEntry;
use crate::model::ExportHeader;
use crate::model::ExportRecord;
use crate::model::ImportMode;
use crate::model::ImportStats;

impl Keeper {
    /// Stream the store out as a header record followed by one self-contained
    /// record per document, versions and parts inlined (spec §6.3). Embeddings
    /// are never exported; `import_data` re-enqueues `reembed` work instead.
    pub async fn export_iter(&self, include_system: bool) -> KeeperResult<Vec<ExportEntry>> {
        let now = Utc::now();
        let mut entries = vec![ExportEntry::Header(ExportHeader::new(
            now,
            "keeper-core in-process export".to_string(),
        ))];

        let docs = self
            .docstore
            .list(ListQuery {
                include_system,
                ..Default::default()
            })
            .await?;

        for doc in docs {
            let versions = self.docstore.list_versions(&doc.id).await?;
            let parts = self.docstore.list_parts(&doc.id).await?;
            entries.push(ExportEntry::Record(Box::new(ExportRecord {
                id: doc.id,
                summary: doc.summary,
                tags: doc.tags,
                content_hash: doc.content_hash,
                created_at: doc.created_at,
                updated_at: doc.updated_at,
                accessed_at: doc.accessed_at,
                versions,
                parts,
            })));
        }

        Ok(entries)
    }

    /// Re-create documents, versions and parts from export records (Property
    /// 7). In `Merge` mode, a record whose id already exists with an
    /// identical `content_hash` and tag set is skipped entirely — this is
    /// what makes "export then import(merge) on the same store" a no-op. A
    /// record for a document that doesn't exist yet gets its full version
    /// history replayed in order so the rebuilt store has the same version
    /// density (I6) as the source. Either way, a `reembed` task is enqueued
    /// per touched document since embeddings never travel in the export
    /// format.
    pub async fn import_data(&self, records: &[ExportRecord], mode: ImportMode) -> KeeperResult<ImportStats> {
        let now = Utc::now();
        let mut stats = ImportStats::default();

        for record in records {
            let existing = self.docstore.get(&record.id).await?;
            let unchanged = existing
                .as_ref()
                .is_some_and(|doc| doc.content_hash == record.content_hash && doc.tags == record.tags);

            if mode == ImportMode::Merge && unchanged {
                stats.skipped += 1;
                continue;
            }

            let existed_before = existing.is_some();
            if mode == ImportMode::Replace && existed_before {
                self.docstore.delete(&record.id, true).await?;
            }

            if mode == ImportMode::Merge && existed_before {
                self.apply_import_current(record, now).await?;
            } else {
                self.recreate_with_history(record).await?;
            }

            if existed_before {
                stats.updated += 1;
            } else {
                stats.created += 1;
            }

            self.import_parts(&record.id, &record.parts).await?;

            self.queue
                .enqueue(
                    NewTask {
                        doc_id: record.id.clone(),
                        task_kind: TaskKind::Reembed,
                        payload: String::new(),
                    },
                    now,
                )
                .await?;
            stats.reembed_enqueued += 1;
        }

        Ok(stats)
    }

    /// Merge-mode update of an already-existing, changed document: overwrite
    /// its current state, archiving whatever was there before. Its prior
    /// history is left untouched rather than reconciled against the
    /// incoming record's `versions`.
    async fn apply_import_current(&self, record: &ExportRecord, now: DateTime<Utc>) -> KeeperResult<()> {
        let mut tags = record.tags.strip_system();
        tags.set("_source", "import");
        let write = DocumentWrite {
            summary: record.summary.clone(),
            tags,
            content_hash: record.content_hash.clone(),
            updated_at: now,
        };
        self.docstore.update_versioned(&record.id, write).await?;
        Ok(())
    }

    /// Create a brand-new document by replaying its exported versions
    /// oldest-first, then promoting the record's current state on top — the
    /// same archive-then-install primitive the write path uses, just driven
    /// by history instead of a single new write (Property 7 "replace yields
    /// an equivalent store").
    async fn recreate_with_history(&self, record: &ExportRecord) -> KeeperResult<()> {
        if record.versions.is_empty() {
            let mut tags = record.tags.strip_system();
            tags.set("_source", "import");
            self.docstore
                .create(NewDocument {
                    id: record.id.clone(),
                    summary: record.summary.clone(),
                    tags,
                    content_hash: record.content_hash.clone(),
                    created_at: record.created_at,
                })
                .await?;
            return Ok(());
        }

        let mut ordered: Vec<Version> = record.versions.clone();
        ordered.sort_by_key(|v| v.version_ordinal);
        let mut iter = ordered.into_iter();

        let oldest = iter.next().expect("checked non-empty above");
        let mut tags = oldest.tags.strip_system();
        tags.set("_source", "import");
        self.docstore
            .create(NewDocument {
                id: record.id.clone(),
                summary: oldest.summary,
                tags,
                content_hash: oldest.content_hash,
                created_at: oldest.created_at,
            })
            .await?;

        for version in iter {
            let mut tags = version.tags.strip_system();
            tags.set("_source", "import");
            let write = DocumentWrite {
                summary: version.summary,
                tags,
                content_hash: version.content_hash,
                updated_at: version.created_at,
            };
            self.docstore.update_versioned(&record.id, write).await?;
        }

        let mut tags = record.tags.strip_system();
        tags.set("_source", "import");
        let write = DocumentWrite {
            summary: record.summary.clone(),
            tags,
            content_hash: record.content_hash.clone(),
            updated_at: record.updated_at,
        };
        self.docstore.update_versioned(&record.id, write).await?;
        Ok(())
    }

    async fn import_parts(&self, doc_id: &str, parts: &[keeper_docstore::Part]) -> KeeperResult<()> {
        if parts.is_empty() {
            return Ok(());
        }
        let new_parts: Vec<NewPart> = parts
            .iter()
            .map(|p| NewPart {
                part_num: p.part_num,
                summary: p.summary.clone(),
                tags: p.tags.clone(),
                content: p.content.clone(),
            })
            .collect();
        self.docstore.replace_parts(doc_id, new_parts).await?;
        Ok(())
    }
}
