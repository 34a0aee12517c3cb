use crate::error::ModelError;
use crate::error::ModelResult;

/// A document id, version suffix, or part suffix, decoded once at the
/// boundary so DocStore, VectorStore and Keeper pass around a typed value
/// instead of re-parsing `"{id}@V{n}"` strings at every hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Document(String),
    /// `offset` 0 is current, positive is archived (1 = newest archived).
    Version(String, u32),
    /// 1-indexed part number.
    Part(String, u32),
}

impl EntityRef {
    #[must_use]
    pub fn doc_id(&self) -> &str {
        match self {
            EntityRef::Document(id) | EntityRef::Version(id, _) | EntityRef::Part(id, _) => id,
        }
    }

    /// The key used in the VectorStore: `{id}`, `{id}@v{n}`, `{id}@p{n}`.
    #[must_use]
    pub fn to_vector_key(&self) -> String {
        match self {
            EntityRef::Document(id) => id.clone(),
            EntityRef::Version(id, ordinal) => format!("{id}@v{ordinal}"),
            EntityRef::Part(id, part_num) => format!("{id}@p{part_num}"),
        }
    }
}

/// Parse a caller-supplied address, stripping a trailing `@V{n}` or `@P{n}`
/// suffix (case-insensitive, matching the surface syntax in spec §6.1).
pub fn parse_entity_ref(raw: &str) -> ModelResult<EntityRef> {
    if raw.is_empty() {
        return Err(ModelError::InvalidId("id must not be empty".into()));
    }

    if let Some(at) = raw.rfind('@') {
        let (id, suffix) = raw.split_at(at);
        let suffix = &suffix[1..];
        if id.is_empty() {
            return Err(ModelError::InvalidId(format!("malformed id: {raw}")));
        }
        let mut chars = suffix.chars();
        match chars.next() {
            Some('V') | Some('v') => {
                let ordinal: u32 = chars
                    .as_str()
                    .parse()
                    .map_err(|_| ModelError::InvalidId(format!("malformed version suffix: {raw}")))?;
                return Ok(EntityRef::Version(id.to_string(), ordinal));
            }
            Some('P') | Some('p') => {
                let part_num: u32 = chars
                    .as_str()
                    .parse()
                    .map_err(|_| ModelError::InvalidId(format!("malformed part suffix: {raw}")))?;
                if part_num == 0 {
                    return Err(ModelError::InvalidId(
                        "part numbers are 1-indexed".into(),
                    ));
                }
                return Ok(EntityRef::Part(id.to_string(), part_num));
            }
            _ => {
                // Not a recognized suffix (e.g. an `@` inside a uri id); fall through.
            }
        }
    }

    Ok(EntityRef::Document(raw.to_string()))
}

/// True for ids beginning with `.` — system docs (spec I8).
#[must_use]
pub fn is_system_id(id: &str) -> bool {
    id.starts_with('.')
}

/// Compute the hex digest used for content addressing and dedup (spec I4, I5).
///
/// Uses blake3 the way the spec's primary hash function is described
/// ("blake3-or-sha256"); sha2 remains available in `keeper-model::legacy_hash`
/// for stores migrating from a sha256-addressed collection.
#[must_use]
pub fn content_hash(normalized_text: &str) -> String {
    blake3::hash(normalized_text.as_bytes()).to_hex().to_string()
}

/// `"%" + first 12 hex chars of content_hash`, per spec §3.1 / I4.
#[must_use]
pub fn content_addressed_id(normalized_text: &str) -> String {
    let digest = content_hash(normalized_text);
    format!("%{}", &digest[..12])
}

/// sha256 hex digest, kept for stores that addressed content before the
/// engine moved to blake3; `content_hash` is authoritative for new writes.
#[must_use]
pub fn legacy_hash(normalized_text: &str) -> String {
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_document_id() {
        assert_eq!(
            parse_entity_ref("%abc123").expect("parse"),
            EntityRef::Document("%abc123".into())
        );
    }

    #[test]
    fn parses_version_suffix() {
        assert_eq!(
            parse_entity_ref("now@V2").expect("parse"),
            EntityRef::Version("now".into(), 2)
        );
    }

    #[test]
    fn parses_part_suffix() {
        assert_eq!(
            parse_entity_ref("%abc@P3").expect("parse"),
            EntityRef::Part("%abc".into(), 3)
        );
    }

    #[test]
    fn rejects_zero_part() {
        assert!(parse_entity_ref("%abc@P0").is_err());
    }

    #[test]
    fn uri_with_at_sign_falls_back_to_document() {
        let id = "https://example.com/a@b";
        assert_eq!(
            parse_entity_ref(id).expect("parse"),
            EntityRef::Document(id.into())
        );
    }

    #[test]
    fn content_addressing_is_deterministic() {
        let a = content_addressed_id("rate limit is 100 req/min");
        let b = content_addressed_id("rate limit is 100 req/min");
        assert_eq!(a, b);
        assert!(a.starts_with('%'));
        assert_eq!(a.len(), 13);
    }

    #[test]
    fn system_ids_start_with_dot() {
        assert!(is_system_id(".meta/todo"));
        assert!(!is_system_id("now"));
    }
}
