use chrono::Utc;
use keeper_model::TagFilter;
use keeper_model::Tags;

use crate::error::KeeperResult;
use crate::keeper::Keeper;
use crate::model::MoveResult;
use crate::model::PutInput;

fn now_id(scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("now:{scope}"),
        None => "now".to_string(),
    }
}

impl Keeper {
    /// The nowdoc singleton (spec §3.1 "Nowdoc"): auto-created empty on
    /// first read, one per optional scope.
    pub async fn get_now(&self, scope: Option<&str>) -> KeeperResult<keeper_docstore::Document> {
        let id = now_id(scope);
        if let Some(doc) = self.docstore.get(&id).await? {
            self.docstore.touch_accessed(&id, Utc::now()).await?;
            return Ok(doc);
        }
        self.put(PutInput::content(String::new()).with_id(id)).await
    }

    /// Append a new state to the nowdoc; each call archives the previous
    /// state as a version, building up the intentions trail (spec §3.1).
    pub async fn set_now(
        &self,
        scope: Option<&str>,
        content: impl Into<String>,
        tags: Tags,
    ) -> KeeperResult<keeper_docstore::Document> {
        let id = now_id(scope);
        self.put(PutInput::content(content).with_id(id).with_tags(tags)).await
    }

    /// Transplant `source`'s current state (and, unless `only_current`, its
    /// full version history, oldest first) onto `target`, replaying each
    /// matching state through `put` so `target` ends up with the same
    /// version density, then resets `source` by deleting it (spec §4.1
    /// `move`, scenario S6).
    pub async fn move_entries(
        &self,
        target: &str,
        source: &str,
        tag_filter: TagFilter,
        only_current: bool,
    ) -> KeeperResult<MoveResult> {
        let Some(current) = self.docstore.get(source).await? else {
            return Ok(MoveResult::default());
        };

        let mut states = Vec::new();
        if !only_current {
            let mut versions = self.docstore.list_versions(source).await?;
            versions.reverse();
            for version in versions {
                states.push((version.tags, version.summary, version.created_at));
            }
        }
        states.push((current.tags.clone(), current.summary.clone(), current.created_at));

        let mut moved = 0usize;
        for (tags, summary, created_at) in states {
            if !tag_filter.is_empty() && !tags.matches_filter(&tag_filter) {
                continue;
            }
            let input = PutInput {
                id: Some(target.to_string()),
                content: Some(summary.clone()),
                uri: None,
                summary: Some(summary),
                tags: tags.strip_system(),
                created_at: Some(created_at),
            };
            self.put(input).await?;
            moved += 1;
        }

        self.delete(source, true).await?;
        Ok(MoveResult { moved })
    }
}
