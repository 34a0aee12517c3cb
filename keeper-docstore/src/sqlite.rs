use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use keeper_model::Tags;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

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

/// Schema version stored in `PRAGMA user_version`. Bump when the DDL changes
/// and add a migration path in [`init_schema`].
const SCHEMA_VERSION: i64 = 1;

fn storage_err(context: &str, err: rusqlite::Error) -> DocStoreError {
    DocStoreError::Storage(format!("{context}: {err}"))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL,
            content_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            accessed_at TEXT NOT NULL,
            part_count INTEGER
        );

        CREATE INDEX IF NOT EXISTS documents_content_hash ON documents(content_hash);

        CREATE TABLE IF NOT EXISTS versions (
            doc_id TEXT NOT NULL,
            version_ordinal INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL,
            content_hash TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (doc_id, version_ordinal)
        );

        CREATE TABLE IF NOT EXISTS parts (
            doc_id TEXT NOT NULL,
            part_num INTEGER NOT NULL,
            summary TEXT NOT NULL,
            tags TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (doc_id, part_num)
        );

        CREATE TABLE IF NOT EXISTS edges (
            source_doc TEXT NOT NULL,
            tag_key TEXT NOT NULL,
            target_doc TEXT NOT NULL,
            PRIMARY KEY (source_doc, tag_key, target_doc)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS doc_fts USING fts5(
            doc_id UNINDEXED,
            summary
        );

        PRAGMA user_version = 1;
        ",
    )
}

/// Escape a user-supplied string for FTS5's `MATCH` mini-language: tokens
/// containing non-alphanumerics are quoted, internal quotes doubled.
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            if tok.chars().all(char::is_alphanumeric) {
                tok.to_string()
            } else {
                format!("\"{}\"", tok.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(raw: &str) -> DocStoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocStoreError::Storage(format!("bad timestamp {raw}: {e}")))
}

fn tags_to_json(tags: &Tags) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "{}".to_string())
}

fn tags_from_json(raw: &str) -> Tags {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Crash-recoverable [`DocumentStore`], grounded on the WAL + FTS5 + pragma
/// idiom used elsewhere in the corpus for SQLite-backed document stores.
/// Holds its connection behind a plain [`Mutex`]: every call here is a single
/// short-lived statement, so the lock is never held across an `.await`.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn open(db_path: &Path) -> DocStoreResult<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| storage_err(&format!("open {}", db_path.display()), e))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> DocStoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage_err("open in-memory", e))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> DocStoreResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| storage_err("set journal_mode WAL", e))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| storage_err("set foreign_keys ON", e))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| storage_err("set busy_timeout", e))?;
        init_schema(conn).map_err(|e| storage_err("initialize schema", e))?;
        let _ = SCHEMA_VERSION;
        Ok(())
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let accessed_at: String = row.get("accessed_at")?;
        let tags: String = row.get("tags")?;
        Ok(Document {
            id: row.get("id")?,
            summary: row.get("summary")?,
            tags: tags_from_json(&tags),
            content_hash: row.get("content_hash")?,
            created_at: from_rfc3339(&created_at).unwrap_or_else(|_| Utc::now()),
            updated_at: from_rfc3339(&updated_at).unwrap_or_else(|_| Utc::now()),
            accessed_at: from_rfc3339(&accessed_at).unwrap_or_else(|_| Utc::now()),
            part_count: row.get::<_, Option<i64>>("part_count")?.map(|v| v as u32),
        })
    }

    fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<Version> {
        let created_at: String = row.get("created_at")?;
        let tags: String = row.get("tags")?;
        Ok(Version {
            doc_id: row.get("doc_id")?,
            version_ordinal: row.get::<_, i64>("version_ordinal")? as u32,
            summary: row.get("summary")?,
            tags: tags_from_json(&tags),
            content_hash: row.get("content_hash")?,
            created_at: from_rfc3339(&created_at).unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_part(row: &rusqlite::Row<'_>) -> rusqlite::Result<Part> {
        let created_at: String = row.get("created_at")?;
        let tags: String = row.get("tags")?;
        Ok(Part {
            doc_id: row.get("doc_id")?,
            part_num: row.get::<_, i64>("part_num")? as u32,
            summary: row.get("summary")?,
            tags: tags_from_json(&tags),
            content: row.get("content")?,
            created_at: from_rfc3339(&created_at).unwrap_or_else(|_| Utc::now()),
        })
    }

    fn list_where_clause(query: &ListQuery) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        if !query.include_system {
            clauses.push("id NOT LIKE '.%'".to_string());
        }
        if let Some(since) = query.since {
            clauses.push("updated_at >= ?".to_string());
            binds.push(to_rfc3339(since));
        }
        if let Some(until) = query.until {
            clauses.push("updated_at <= ?".to_string());
            binds.push(to_rfc3339(until));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (where_sql, binds)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, doc: NewDocument) -> DocStoreResult<Document> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let created = to_rfc3339(doc.created_at);
        let inserted = conn.execute(
            "INSERT INTO documents (id, summary, tags, content_hash, created_at, updated_at, accessed_at, part_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5, NULL)",
            params![
                doc.id,
                doc.summary,
                tags_to_json(&doc.tags),
                doc.content_hash,
                created,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(DocStoreError::Conflict(format!(
                    "document {} already exists",
                    doc.id
                )));
            }
            Err(e) => return Err(storage_err("insert document", e)),
        }
        conn.execute(
            "INSERT INTO doc_fts (doc_id, summary) VALUES (?1, ?2)",
            params![doc.id, doc.summary],
        )
        .map_err(|e| storage_err("insert fts row", e))?;
        Ok(Document {
            id: doc.id,
            summary: doc.summary,
            tags: doc.tags,
            content_hash: doc.content_hash,
            created_at: doc.created_at,
            updated_at: doc.created_at,
            accessed_at: doc.created_at,
            part_count: None,
        })
    }

    async fn get(&self, id: &str) -> DocStoreResult<Option<Document>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| storage_err("select document", e))
    }

    async fn update_versioned(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let current = conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id],
                Self::row_to_document,
            )
            .optional()
            .map_err(|e| storage_err("select document", e))?
            .ok_or_else(|| DocStoreError::NotFound(id.to_string()))?;

        let next_ordinal: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version_ordinal), 0) + 1 FROM versions WHERE doc_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| storage_err("compute next ordinal", e))?;

        conn.execute(
            "INSERT INTO versions (doc_id, version_ordinal, summary, tags, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                next_ordinal,
                current.summary,
                tags_to_json(&current.tags),
                current.content_hash,
                to_rfc3339(current.updated_at),
            ],
        )
        .map_err(|e| storage_err("archive version", e))?;

        let updated_at = to_rfc3339(write.updated_at);
        conn.execute(
            "UPDATE documents SET summary = ?2, tags = ?3, content_hash = ?4, updated_at = ?5, accessed_at = ?5
             WHERE id = ?1",
            params![
                id,
                write.summary,
                tags_to_json(&write.tags),
                write.content_hash,
                updated_at,
            ],
        )
        .map_err(|e| storage_err("update document", e))?;
        conn.execute(
            "UPDATE doc_fts SET summary = ?2 WHERE doc_id = ?1",
            params![id, write.summary],
        )
        .map_err(|e| storage_err("update fts row", e))?;

        Ok(Document {
            id: id.to_string(),
            summary: write.summary,
            tags: write.tags,
            content_hash: write.content_hash,
            created_at: current.created_at,
            updated_at: write.updated_at,
            accessed_at: write.updated_at,
            part_count: current.part_count,
        })
    }

    async fn update_tags_only(
        &self,
        id: &str,
        tags: Tags,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let affected = conn
            .execute(
                "UPDATE documents SET tags = ?2, updated_at = ?3, accessed_at = ?3 WHERE id = ?1",
                params![id, tags_to_json(&tags), to_rfc3339(updated_at)],
            )
            .map_err(|e| storage_err("update tags", e))?;
        if affected == 0 {
            return Err(DocStoreError::NotFound(id.to_string()));
        }
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            Self::row_to_document,
        )
        .map_err(|e| storage_err("select document", e))
    }

    async fn update_summary_only(
        &self,
        id: &str,
        summary: String,
        updated_at: DateTime<Utc>,
    ) -> DocStoreResult<Document> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let affected = conn
            .execute(
                "UPDATE documents SET summary = ?2, updated_at = ?3, accessed_at = ?3 WHERE id = ?1",
                params![id, summary, to_rfc3339(updated_at)],
            )
            .map_err(|e| storage_err("update summary", e))?;
        if affected == 0 {
            return Err(DocStoreError::NotFound(id.to_string()));
        }
        conn.execute(
            "UPDATE doc_fts SET summary = ?2 WHERE doc_id = ?1",
            params![id, summary],
        )
        .map_err(|e| storage_err("update fts row", e))?;
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            Self::row_to_document,
        )
        .map_err(|e| storage_err("select document", e))
    }

    async fn update_current(&self, id: &str, write: DocumentWrite) -> DocStoreResult<Document> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let updated_at = to_rfc3339(write.updated_at);
        let affected = conn
            .execute(
                "UPDATE documents SET summary = ?2, tags = ?3, content_hash = ?4, updated_at = ?5, accessed_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    write.summary,
                    tags_to_json(&write.tags),
                    write.content_hash,
                    updated_at,
                ],
            )
            .map_err(|e| storage_err("update current", e))?;
        if affected == 0 {
            return Err(DocStoreError::NotFound(id.to_string()));
        }
        conn.execute(
            "UPDATE doc_fts SET summary = ?2 WHERE doc_id = ?1",
            params![id, write.summary],
        )
        .map_err(|e| storage_err("update fts row", e))?;
        conn.query_row(
            "SELECT * FROM documents WHERE id = ?1",
            params![id],
            Self::row_to_document,
        )
        .map_err(|e| storage_err("select document", e))
    }

    async fn delete(&self, id: &str, delete_versions: bool) -> DocStoreResult<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let affected = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(|e| storage_err("delete document", e))?;
        conn.execute("DELETE FROM parts WHERE doc_id = ?1", params![id])
            .map_err(|e| storage_err("delete parts", e))?;
        conn.execute("DELETE FROM edges WHERE source_doc = ?1", params![id])
            .map_err(|e| storage_err("delete edges", e))?;
        conn.execute("DELETE FROM doc_fts WHERE doc_id = ?1", params![id])
            .map_err(|e| storage_err("delete fts row", e))?;
        if delete_versions {
            conn.execute("DELETE FROM versions WHERE doc_id = ?1", params![id])
                .map_err(|e| storage_err("delete versions", e))?;
        }
        Ok(affected > 0)
    }

    async fn revert(&self, id: &str) -> DocStoreResult<Option<Document>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let newest = conn
            .query_row(
                "SELECT * FROM versions WHERE doc_id = ?1 ORDER BY version_ordinal DESC LIMIT 1",
                params![id],
                Self::row_to_version,
            )
            .optional()
            .map_err(|e| storage_err("select newest version", e))?;
        let Some(newest) = newest else {
            return Ok(None);
        };

        let created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("select created_at", e))?;
        let created_at = created_at
            .map(|raw| from_rfc3339(&raw))
            .transpose()?
            .unwrap_or(newest.created_at);

        conn.execute(
            "UPDATE documents SET summary = ?2, tags = ?3, content_hash = ?4, updated_at = ?5, accessed_at = ?5
             WHERE id = ?1",
            params![
                id,
                newest.summary,
                tags_to_json(&newest.tags),
                newest.content_hash,
                to_rfc3339(newest.created_at),
            ],
        )
        .map_err(|e| storage_err("promote version", e))?;
        conn.execute(
            "UPDATE doc_fts SET summary = ?2 WHERE doc_id = ?1",
            params![id, newest.summary],
        )
        .map_err(|e| storage_err("update fts row", e))?;
        conn.execute(
            "DELETE FROM versions WHERE doc_id = ?1 AND version_ordinal = ?2",
            params![id, newest.version_ordinal],
        )
        .map_err(|e| storage_err("pop version", e))?;

        let part_count: Option<i64> = conn
            .query_row(
                "SELECT part_count FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("select part_count", e))?
            .flatten();

        Ok(Some(Document {
            id: id.to_string(),
            summary: newest.summary,
            tags: newest.tags,
            content_hash: newest.content_hash,
            created_at,
            updated_at: newest.created_at,
            accessed_at: newest.created_at,
            part_count: part_count.map(|v| v as u32),
        }))
    }

    async fn touch_accessed(&self, id: &str, accessed_at: DateTime<Utc>) -> DocStoreResult<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "UPDATE documents SET accessed_at = ?2 WHERE id = ?1",
            params![id, to_rfc3339(accessed_at)],
        )
        .map_err(|e| storage_err("touch accessed", e))?;
        Ok(())
    }

    async fn get_version(&self, id: &str, offset: u32) -> DocStoreResult<Option<Version>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        if offset == 0 {
            return conn
                .query_row(
                    "SELECT * FROM documents WHERE id = ?1",
                    params![id],
                    Self::row_to_document,
                )
                .optional()
                .map_err(|e| storage_err("select document", e))
                .map(|maybe_doc| {
                    maybe_doc.map(|doc| Version {
                        doc_id: doc.id,
                        version_ordinal: 0,
                        summary: doc.summary,
                        tags: doc.tags,
                        content_hash: doc.content_hash,
                        created_at: doc.updated_at,
                    })
                });
        }
        conn.query_row(
            "SELECT * FROM versions WHERE doc_id = ?1
             ORDER BY version_ordinal DESC LIMIT 1 OFFSET ?2",
            params![id, offset - 1],
            Self::row_to_version,
        )
        .optional()
        .map_err(|e| storage_err("select version by offset", e))
    }

    async fn list_versions(&self, id: &str) -> DocStoreResult<Vec<Version>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM versions WHERE doc_id = ?1 ORDER BY version_ordinal DESC")
            .map_err(|e| storage_err("prepare list_versions", e))?;
        let rows = stmt
            .query_map(params![id], Self::row_to_version)
            .map_err(|e| storage_err("query list_versions", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect list_versions", e))
    }

    async fn replace_parts(&self, id: &str, parts: Vec<NewPart>) -> DocStoreResult<Vec<Part>> {
        let mut conn = self.conn.lock().expect("sqlite mutex poisoned");
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err("check document exists", e))?;
        if exists.is_none() {
            return Err(DocStoreError::NotFound(id.to_string()));
        }

        let now = Utc::now();
        let now_str = to_rfc3339(now);
        let tx = conn
            .transaction()
            .map_err(|e| storage_err("begin transaction", e))?;
        tx.execute("DELETE FROM parts WHERE doc_id = ?1", params![id])
            .map_err(|e| storage_err("clear parts", e))?;
        let mut built = Vec::with_capacity(parts.len());
        for part in parts {
            tx.execute(
                "INSERT INTO parts (doc_id, part_num, summary, tags, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    part.part_num,
                    part.summary,
                    tags_to_json(&part.tags),
                    part.content,
                    now_str,
                ],
            )
            .map_err(|e| storage_err("insert part", e))?;
            built.push(Part {
                doc_id: id.to_string(),
                part_num: part.part_num,
                summary: part.summary,
                tags: part.tags,
                content: part.content,
                created_at: now,
            });
        }
        let count = built.len() as i64;
        tx.execute(
            "UPDATE documents SET part_count = ?2 WHERE id = ?1",
            params![id, count],
        )
        .map_err(|e| storage_err("update part_count", e))?;
        tx.commit().map_err(|e| storage_err("commit transaction", e))?;
        Ok(built)
    }

    async fn list_parts(&self, id: &str) -> DocStoreResult<Vec<Part>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM parts WHERE doc_id = ?1 ORDER BY part_num ASC")
            .map_err(|e| storage_err("prepare list_parts", e))?;
        let rows = stmt
            .query_map(params![id], Self::row_to_part)
            .map_err(|e| storage_err("query list_parts", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect list_parts", e))
    }

    async fn get_part(&self, id: &str, part_num: u32) -> DocStoreResult<Option<Part>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.query_row(
            "SELECT * FROM parts WHERE doc_id = ?1 AND part_num = ?2",
            params![id, part_num],
            Self::row_to_part,
        )
        .optional()
        .map_err(|e| storage_err("select part", e))
    }

    async fn tag_part(&self, id: &str, part_num: u32, tags: Tags) -> DocStoreResult<Part> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let affected = conn
            .execute(
                "UPDATE parts SET tags = ?3 WHERE doc_id = ?1 AND part_num = ?2",
                params![id, part_num, tags_to_json(&tags)],
            )
            .map_err(|e| storage_err("tag part", e))?;
        if affected == 0 {
            return Err(DocStoreError::NotFound(format!("{id}@P{part_num}")));
        }
        conn.query_row(
            "SELECT * FROM parts WHERE doc_id = ?1 AND part_num = ?2",
            params![id, part_num],
            Self::row_to_part,
        )
        .map_err(|e| storage_err("select part", e))
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
        exclude_id: Option<&str>,
    ) -> DocStoreResult<Option<Document>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.query_row(
            "SELECT * FROM documents WHERE content_hash = ?1 AND id != ?2 LIMIT 1",
            params![hash, exclude_id.unwrap_or("")],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| storage_err("select by content_hash", e))
    }

    async fn list(&self, query: ListQuery) -> DocStoreResult<Vec<Document>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let (where_sql, binds) = Self::list_where_clause(&query);
        let limit_sql = query
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT * FROM documents{where_sql} ORDER BY updated_at DESC{limit_sql}"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| storage_err("prepare list", e))?;
        let params: Vec<&dyn rusqlite::ToSql> =
            binds.iter().map(|b| b as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(params.as_slice(), Self::row_to_document)
            .map_err(|e| storage_err("query list", e))?;
        let docs: Vec<Document> = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect list", e))?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.tags.matches_filter(&query.tag_filter))
            .collect())
    }

    async fn fulltext_search(&self, text: &str, query: ListQuery) -> DocStoreResult<Vec<Document>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let escaped = escape_fts5_query(text);
        let mut stmt = conn
            .prepare(
                "SELECT d.* FROM doc_fts f
                 JOIN documents d ON d.id = f.doc_id
                 WHERE f.summary MATCH ?1
                 ORDER BY rank",
            )
            .map_err(|e| storage_err("prepare fulltext_search", e))?;
        let rows = stmt
            .query_map(params![escaped], Self::row_to_document)
            .map_err(|e| storage_err("query fulltext_search", e))?;
        let docs: Vec<Document> = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect fulltext_search", e))?;
        let mut filtered: Vec<Document> = docs
            .into_iter()
            .filter(|doc| list_matches(doc, &query))
            .collect();
        if let Some(limit) = query.limit {
            filtered.truncate(limit);
        }
        Ok(filtered)
    }

    async fn upsert_edge(&self, edge: Edge) -> DocStoreResult<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO edges (source_doc, tag_key, target_doc) VALUES (?1, ?2, ?3)",
            params![edge.source_doc, edge.tag_key, edge.target_doc],
        )
        .map_err(|e| storage_err("upsert edge", e))?;
        Ok(())
    }

    async fn delete_edge(&self, edge: Edge) -> DocStoreResult<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "DELETE FROM edges WHERE source_doc = ?1 AND tag_key = ?2 AND target_doc = ?3",
            params![edge.source_doc, edge.tag_key, edge.target_doc],
        )
        .map_err(|e| storage_err("delete edge", e))?;
        Ok(())
    }

    async fn inverse_edges(&self, target_doc: &str, tag_key: &str) -> DocStoreResult<Vec<String>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT source_doc FROM edges WHERE target_doc = ?1 AND tag_key = ?2 ORDER BY source_doc",
            )
            .map_err(|e| storage_err("prepare inverse_edges", e))?;
        let rows = stmt
            .query_map(params![target_doc, tag_key], |row| row.get(0))
            .map_err(|e| storage_err("query inverse_edges", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect inverse_edges", e))
    }

    async fn edges_from(&self, source_doc: &str) -> DocStoreResult<Vec<Edge>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT source_doc, tag_key, target_doc FROM edges WHERE source_doc = ?1")
            .map_err(|e| storage_err("prepare edges_from", e))?;
        let rows = stmt
            .query_map(params![source_doc], |row| {
                Ok(Edge {
                    source_doc: row.get(0)?,
                    tag_key: row.get(1)?,
                    target_doc: row.get(2)?,
                })
            })
            .map_err(|e| storage_err("query edges_from", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage_err("collect edges_from", e))
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

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_model::content_addressed_id;
    use pretty_assertions::assert_eq;

    fn new_doc(id: &str, summary: &str, now: DateTime<Utc>) -> NewDocument {
        let mut tags = Tags::new();
        tags.set("topic", "api");
        NewDocument {
            id: id.to_string(),
            summary: summary.to_string(),
            tags,
            content_hash: Some(content_addressed_id(summary)),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        let created = store.create(new_doc("%abc", "hello", now)).await.expect("create");
        let fetched = store.get("%abc").await.expect("get").expect("present");
        assert_eq!(created.summary, fetched.summary);
        assert_eq!(created.tags, fetched.tags);
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store.create(new_doc("%abc", "hello", now)).await.expect("create");
        let result = store.create(new_doc("%abc", "again", now)).await;
        assert!(matches!(result, Err(DocStoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn versioned_update_archives_and_offsets_work() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store.create(new_doc("%abc", "v1", now)).await.expect("create");
        store
            .update_versioned(
                "%abc",
                DocumentWrite {
                    summary: "v2".into(),
                    tags: Tags::new(),
                    content_hash: Some(content_addressed_id("v2")),
                    updated_at: now,
                },
            )
            .await
            .expect("update");

        let versions = store.list_versions("%abc").await.expect("versions");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_ordinal, 1);
        assert_eq!(versions[0].summary, "v1");

        let offset0 = store
            .get_version("%abc", 0)
            .await
            .expect("get_version")
            .expect("present");
        assert_eq!(offset0.summary, "v2");
    }

    #[tokio::test]
    async fn revert_promotes_newest_version() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store.create(new_doc("%abc", "v1", now)).await.expect("create");
        store
            .update_versioned(
                "%abc",
                DocumentWrite {
                    summary: "v2".into(),
                    tags: Tags::new(),
                    content_hash: Some(content_addressed_id("v2")),
                    updated_at: now,
                },
            )
            .await
            .expect("update");

        let reverted = store.revert("%abc").await.expect("revert").expect("some");
        assert_eq!(reverted.summary, "v1");
        assert!(store.list_versions("%abc").await.expect("versions").is_empty());
    }

    #[tokio::test]
    async fn update_summary_only_does_not_archive() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store.create(new_doc("%abc", "truncated…", now)).await.expect("create");

        let updated = store
            .update_summary_only("%abc", "the full summary".to_string(), now)
            .await
            .expect("update_summary_only");
        assert_eq!(updated.summary, "the full summary");
        assert!(store.list_versions("%abc").await.expect("versions").is_empty());
    }

    #[tokio::test]
    async fn fulltext_search_matches_summary_tokens() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store
            .create(new_doc("%abc", "quarterly revenue report", now))
            .await
            .expect("create");
        store
            .create(new_doc("%def", "unrelated shopping list", now))
            .await
            .expect("create");

        let results = store
            .fulltext_search("revenue", ListQuery::default())
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "%abc");
    }

    #[tokio::test]
    async fn parts_round_trip_and_set_part_count() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let now = Utc::now();
        store.create(new_doc("%abc", "doc", now)).await.expect("create");
        let parts = store
            .replace_parts(
                "%abc",
                vec![
                    NewPart {
                        part_num: 1,
                        summary: "p1".into(),
                        tags: Tags::new(),
                        content: "alpha".into(),
                    },
                    NewPart {
                        part_num: 2,
                        summary: "p2".into(),
                        tags: Tags::new(),
                        content: "beta".into(),
                    },
                ],
            )
            .await
            .expect("replace_parts");
        assert_eq!(parts.len(), 2);

        let doc = store.get("%abc").await.expect("get").expect("present");
        assert_eq!(doc.part_count, Some(2));

        let part2 = store
            .get_part("%abc", 2)
            .await
            .expect("get_part")
            .expect("present");
        assert_eq!(part2.content, "beta");
    }

    #[tokio::test]
    async fn inverse_edges_reflect_upserts_and_deletes() {
        let store = SqliteDocumentStore::open_in_memory().expect("open");
        let edge = Edge {
            source_doc: "%turn1".into(),
            tag_key: "speaker".into(),
            target_doc: "Kate".into(),
        };
        store.upsert_edge(edge.clone()).await.expect("upsert");
        let inbound = store.inverse_edges("Kate", "speaker").await.expect("inverse");
        assert_eq!(inbound, vec!["%turn1".to_string()]);

        store.delete_edge(edge).await.expect("delete");
        assert!(store
            .inverse_edges("Kate", "speaker")
            .await
            .expect("inverse")
            .is_empty());
    }
}
