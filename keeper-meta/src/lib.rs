#![deny(clippy::print_stdout, clippy::print_stderr)]
//! The MetaResolver component of spec §4.5: evaluates `.tag/K` declarations,
//! `.meta/NAME` contextual queries, and `.prompt/{category}/NAME` overrides
//! at read time and at write time (prompt selection, constrained-tag
//! validation).

mod dsl;
mod error;
mod prompt;
mod resolver;
mod tag_declaration;

pub use dsl::MetaClause;
pub use dsl::build_query_filters;
pub use dsl::count_satisfied;
pub use dsl::parse_clause;
pub use dsl::parse_clauses;
pub use dsl::split_prompt_body;
pub use error::MetaError;
pub use error::MetaResult;
pub use prompt::PromptCategory;
pub use prompt::SelectedPrompt;
pub use prompt::select_prompt;
pub use resolver::MetaQueryMatch;
pub use resolver::applicable_meta_queries;
pub use tag_declaration::TagDeclaration;
pub use tag_declaration::edge_keys;
pub use tag_declaration::load_tag_declaration;
pub use tag_declaration::validate_constrained_tag;
