use keeper_model::Tags;
use keeper_model::TagFilter;

/// One line of a `.meta/*` or `.prompt/*` body (spec §4.5): an equality
/// filter, a "fill from the current document's own tag" filter, or a
/// prerequisite that gates the whole doc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaClause {
    Equals { key: String, value: String },
    FillFromCurrent { key: String },
    Prerequisite { key: String },
}

/// Parse one line: `key=value`, `key=`, or `key=*`. Blank lines and lines
/// without `=` are ignored (e.g. the `## Prompt` heading and prose).
#[must_use]
pub fn parse_clause(line: &str) -> Option<MetaClause> {
    let line = line.trim();
    if line.is_empty() || !line.contains('=') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }
    match value {
        "*" => Some(MetaClause::Prerequisite { key: key.to_string() }),
        "" => Some(MetaClause::FillFromCurrent { key: key.to_string() }),
        _ => Some(MetaClause::Equals {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parse every clause line in `body`, in order.
#[must_use]
pub fn parse_clauses(body: &str) -> Vec<MetaClause> {
    body.lines().filter_map(parse_clause).collect()
}

/// Evaluate a `.meta/NAME` body against the current document's tags (spec
/// §4.5): prerequisite lines must all be satisfied or the whole doc is
/// skipped; every remaining line becomes its own OR'd [`TagFilter`].
/// Returns `None` when a prerequisite is unmet.
#[must_use]
pub fn build_query_filters(body: &str, current_tags: &Tags) -> Option<Vec<TagFilter>> {
    let clauses = parse_clauses(body);
    for clause in &clauses {
        if let MetaClause::Prerequisite { key } = clause
            && !current_tags.contains_key(key)
        {
            return None;
        }
    }

    let mut filters = Vec::new();
    for clause in &clauses {
        match clause {
            MetaClause::Equals { key, value } => {
                filters.push(TagFilter::new().equals(key.clone(), value.clone()));
            }
            MetaClause::FillFromCurrent { key } => {
                if let Some(value) = current_tags.get(key) {
                    filters.push(TagFilter::new().equals(key.clone(), value.to_string()));
                }
            }
            MetaClause::Prerequisite { .. } => {}
        }
    }
    Some(filters)
}

/// How many of `clauses` are satisfied by `tags` (spec §4.5 prompt
/// selection: "the one with the most satisfied match rules"). A
/// prerequisite line counts as satisfied when the key is present; an
/// equality line, when the value matches; a fill line, when the current
/// doc and the candidate agree (trivially true, since it is filled from
/// the same tags it is compared against, so it is counted as satisfied
/// whenever the key is present).
#[must_use]
pub fn count_satisfied(clauses: &[MetaClause], tags: &Tags) -> usize {
    clauses
        .iter()
        .filter(|clause| match clause {
            MetaClause::Equals { key, value } => tags.get(key) == Some(value.as_str()),
            MetaClause::FillFromCurrent { key } | MetaClause::Prerequisite { key } => {
                tags.contains_key(key)
            }
        })
        .count()
}

/// Split a `.prompt/*` body on a `## Prompt` heading line: everything
/// before is match rules, everything after is the override text.
#[must_use]
pub fn split_prompt_body(body: &str) -> (Vec<MetaClause>, String) {
    if let Some(idx) = body.find("## Prompt") {
        let rules = parse_clauses(&body[..idx]);
        let prompt_text = body[idx + "## Prompt".len()..].trim_start_matches('\n').to_string();
        (rules, prompt_text)
    } else {
        (parse_clauses(body), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_all_three_clause_kinds() {
        assert_eq!(
            parse_clause("topic=api"),
            Some(MetaClause::Equals {
                key: "topic".to_string(),
                value: "api".to_string()
            })
        );
        assert_eq!(
            parse_clause("topic="),
            Some(MetaClause::FillFromCurrent {
                key: "topic".to_string()
            })
        );
        assert_eq!(
            parse_clause("topic=*"),
            Some(MetaClause::Prerequisite {
                key: "topic".to_string()
            })
        );
    }

    #[test]
    fn prerequisite_gates_whole_doc() {
        let mut tags = Tags::new();
        tags.set("other", "x");
        let result = build_query_filters("topic=*\nspeaker=Kate", &tags);
        assert!(result.is_none());
    }

    #[test]
    fn fill_line_substitutes_current_tag_value() {
        let mut tags = Tags::new();
        tags.set("speaker", "Kate");
        let filters = build_query_filters("speaker=", &tags).expect("prereqs met");
        assert_eq!(filters.len(), 1);
        let mut candidate = Tags::new();
        candidate.set("speaker", "Kate");
        assert!(candidate.matches_filter(&filters[0]));
    }

    #[test]
    fn split_prompt_body_separates_rules_from_text() {
        let body = "topic=api\n## Prompt\nUse a terse tone.";
        let (rules, text) = split_prompt_body(body);
        assert_eq!(rules.len(), 1);
        assert_eq!(text, "Use a terse tone.");
    }

    #[test]
    fn count_satisfied_counts_matching_equals() {
        let mut tags = Tags::new();
        tags.set("topic", "api");
        let clauses = vec![
            MetaClause::Equals {
                key: "topic".to_string(),
                value: "api".to_string(),
            },
            MetaClause::Equals {
                key: "topic".to_string(),
                value: "billing".to_string(),
            },
        ];
        assert_eq!(count_satisfied(&clauses, &tags), 1);
    }
}
