//! Integration tests exercising the concrete scenarios and quantified
//! invariants named in the spec's "testable properties" section end to end
//! through the public `Keeper` surface, rather than unit-testing any single
//! crate in isolation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use keeper_core::Keeper;
use keeper_core::PutInput;
use keeper_core::StoreConfig;
use keeper_core::WorkerPool;
use keeper_core::FindInput;
use keeper_docstore::DocumentStore;
use keeper_docstore::InMemoryDocumentStore;
use keeper_docstore::NewDocument;
use keeper_model::Tags;
use keeper_model::TagFilter;
use keeper_providers::EmbeddingProvider;
use keeper_providers::ProviderIdentity;
use keeper_providers::ProviderResult;
use keeper_providers::ProviderRouter;
use keeper_queue::InMemoryPendingQueue;
use keeper_vectorstore::InMemoryVectorStore;
use pretty_assertions::assert_eq;

/// A deterministic bag-of-words embedder: same text always yields the same
/// vector, and documents sharing words get nonzero cosine overlap, which is
/// enough to exercise ranking and decay without a real model.
struct BagOfWordsEmbedder {
    name: &'static str,
    dimension: usize,
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        for word in text.split_whitespace() {
            let hash = word
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
            vector[(hash as usize) % self.dimension] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        Ok(vector)
    }

    fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            name: self.name.to_string(),
            model: "v1".to_string(),
            dimension: self.dimension,
        }
    }
}

fn keeper_with_dimension(dimension: usize) -> Arc<Keeper> {
    let providers = ProviderRouter::new().with_embedding_provider(Arc::new(BagOfWordsEmbedder {
        name: "bow",
        dimension,
    }));
    Arc::new(Keeper::new(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryPendingQueue::new()),
        Arc::new(providers),
        StoreConfig::default(),
    ))
}

async fn drain(keeper: &Arc<Keeper>) {
    let pool = WorkerPool::new(Arc::clone(keeper));
    while pool.process_one().await.expect("process_one") {}
}

/// S1: a short text `put` gets a `%`-prefixed content-addressed id, an
/// `_source=inline` tag, no `_content_type`, and a verbatim summary.
#[tokio::test]
async fn s1_put_content_addressed_inline_summary() {
    let keeper = keeper_with_dimension(8);
    let mut tags = Tags::new();
    tags.set("topic", "api");

    let doc = keeper
        .put(PutInput::content("rate limit is 100 req/min").with_tags(tags))
        .await
        .expect("put");

    assert!(doc.id.starts_with('%'));
    assert_eq!(doc.tags.get("_source"), Some("inline"));
    assert_eq!(doc.tags.get("_content_type"), None);
    assert_eq!(doc.summary, "rate limit is 100 req/min");
    assert_eq!(doc.tags.get("topic"), Some("api"));
}

/// S2: re-`put`-ting the same content under a different tag set keeps the
/// id, archives exactly one version carrying the old tag, and leaves the
/// current vector untouched (dedup hit on the unchanged content hash).
#[tokio::test]
async fn s2_tag_only_change_archives_one_version_and_dedupes_vector() {
    let keeper = keeper_with_dimension(8);

    let mut first_tags = Tags::new();
    first_tags.set("topic", "api");
    let first = keeper
        .put(PutInput::content("rate limit is 100 req/min").with_tags(first_tags))
        .await
        .expect("first put");

    let mut second_tags = Tags::new();
    second_tags.set("topic", "quota");
    let second = keeper
        .put(PutInput::content("rate limit is 100 req/min").with_tags(second_tags))
        .await
        .expect("second put");

    assert_eq!(first.id, second.id);
    assert_eq!(second.tags.get("topic"), Some("quota"));

    let versions = keeper.list_versions(&second.id).await.expect("list_versions");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].tags.get("topic"), Some("api"));

    // `acquire_vector`'s dedup probe only fires for unrelated documents
    // sharing a hash, but since this is the same id, the vector was merely
    // re-upserted untouched: confirm the stored vector is still valid at the
    // original dimension rather than a fresh zero placeholder.
    let find_result = keeper
        .find(FindInput::text("rate limit is 100 req/min"))
        .await
        .expect("find");
    assert_eq!(find_result.items.first().map(|i| i.id.as_str()), Some(second.id.as_str()));
}

/// Property 1 (content addressing + dedup): two unrelated documents with the
/// same content get different ids only if given explicit ids, but identical
/// content with no caller id always yields the same id, and a third write of
/// genuinely new content elsewhere copies the already-computed vector on
/// dedup rather than re-embedding.
#[tokio::test]
async fn content_addressing_is_deterministic() {
    let keeper = keeper_with_dimension(8);
    let a = keeper.put(PutInput::content("hello world")).await.expect("put a");
    let b = keeper.put(PutInput::content("hello world")).await.expect("put b");
    assert_eq!(a.id, b.id);

    let different = keeper.put(PutInput::content("something else entirely")).await.expect("put c");
    assert_ne!(different.id, a.id);
}

/// Property 2 / I2: caller-supplied tag keys beginning with `_` are stripped
/// before merge; the system's own `_source`/`_created`/etc. still land.
#[tokio::test]
async fn tag_protection_strips_underscore_keys_from_callers() {
    let keeper = keeper_with_dimension(8);
    let mut tags = Tags::new();
    tags.set("topic", "api");
    tags.set("_error", "caller should not be able to set this");

    let doc = keeper.put(PutInput::content("doc body").with_tags(tags)).await.expect("put");
    assert_eq!(doc.tags.get("topic"), Some("api"));
    assert_eq!(doc.tags.get("_error"), None);
    assert_eq!(doc.tags.get("_source"), Some("inline"));
}

/// Property 3 / 4: version ordinals are dense and newest-first, and
/// `get_version(offset)` matches the state k updates back.
#[tokio::test]
async fn version_density_and_offset_round_trip() {
    let keeper = keeper_with_dimension(8);
    let id = "thread-1";
    keeper
        .put(PutInput::content("state zero").with_id(id))
        .await
        .expect("put 0");
    keeper
        .put(PutInput::content("state one").with_id(id))
        .await
        .expect("put 1");
    keeper
        .put(PutInput::content("state two").with_id(id))
        .await
        .expect("put 2");

    let versions = keeper.list_versions(id).await.expect("list_versions");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version_ordinal, 2);
    assert_eq!(versions[1].version_ordinal, 1);
    assert_eq!(versions[0].summary, "state one");
    assert_eq!(versions[1].summary, "state zero");

    let offset1 = keeper.get_version(id, 1).await.expect("get_version 1").expect("present");
    assert_eq!(offset1.summary, "state one");
    let offset2 = keeper.get_version(id, 2).await.expect("get_version 2").expect("present");
    assert_eq!(offset2.summary, "state zero");
}

/// S4 / Property 5: a tag key declared as an edge (`_inverse=said`) creates a
/// navigable inverse relation, and the target is auto-vivified the first
/// time a source points at it.
#[tokio::test]
async fn s4_edge_declaration_autovivifies_and_links_inverse() {
    let keeper = keeper_with_dimension(8);

    let mut decl_tags = Tags::new();
    decl_tags.set("_inverse", "said");
    keeper
        .put(PutInput::content("speaker tag").with_id(".tag/speaker").with_tags(decl_tags))
        .await
        .expect("declare edge key");

    let mut turn_a_tags = Tags::new();
    turn_a_tags.set("speaker", "Kate");
    keeper
        .put(PutInput::content("turn A").with_tags(turn_a_tags))
        .await
        .expect("put turn a");

    let mut turn_b_tags = Tags::new();
    turn_b_tags.set("speaker", "Kate");
    keeper
        .put(PutInput::content("turn B").with_tags(turn_b_tags))
        .await
        .expect("put turn b");

    let kate = keeper.get("Kate", None).await.expect("get Kate");
    let keeper_core::EntityView::Document(kate_doc) = &kate.entity else {
        panic!("expected document")
    };
    assert_eq!(kate_doc.tags.get("_source"), Some("auto-vivify"));

    assert_eq!(kate.inverse_edges.len(), 1);
    assert_eq!(kate.inverse_edges[0].verb, "said");
    assert_eq!(kate.inverse_edges[0].doc_ids.len(), 2);

    // Removing the tag removes the edge in the same write.
    let turn_a_id = kate.inverse_edges[0].doc_ids[0].clone();
    keeper.tag(&turn_a_id, {
        let mut t = Tags::new();
        t.set("speaker", "");
        t
    }).await.expect("untag");

    let kate_after = keeper.get("Kate", None).await.expect("get Kate again");
    assert_eq!(kate_after.inverse_edges[0].doc_ids.len(), 1);
}

/// S5 / Property 6: a constrained `.tag/K` accepts only values with a
/// matching `.tag/K/value` child document.
#[tokio::test]
async fn s5_constrained_tag_rejects_unknown_value() {
    let keeper = keeper_with_dimension(8);

    let mut constrained = Tags::new();
    constrained.set("_constrained", "true");
    keeper
        .put(PutInput::content("act tag").with_id(".tag/act").with_tags(constrained))
        .await
        .expect("declare constrained tag");

    for value in ["commitment", "request", "offer", "assertion", "assessment", "declaration"] {
        keeper
            .put(PutInput::content(value).with_id(format!(".tag/act/{value}")))
            .await
            .expect("declare vocabulary value");
    }

    let mut ok_tags = Tags::new();
    ok_tags.set("act", "commitment");
    let doc = keeper
        .put(PutInput::content("I'll fix it").with_tags(ok_tags))
        .await
        .expect("valid act value");
    assert_eq!(doc.tags.get("act"), Some("commitment"));

    let mut bad_tags = Tags::new();
    bad_tags.set("act", "blurb");
    let err = keeper
        .put(PutInput::content("I'll fix it too").with_tags(bad_tags))
        .await
        .unwrap_err();
    match err {
        keeper_core::KeeperError::ConstrainedTag { key, valid_values } => {
            assert_eq!(key, "act");
            assert!(valid_values.contains(&"commitment".to_string()));
        }
        other => panic!("expected ConstrainedTag, got {other:?}"),
    }
}

/// S6: `set_now` builds up the intentions trail as versions, and `move`
/// replays that history (oldest first) onto a new document, then resets the
/// nowdoc.
#[tokio::test]
async fn s6_set_now_and_move_replays_history() {
    let keeper = keeper_with_dimension(8);

    keeper.set_now(None, "working on auth", Tags::new()).await.expect("set_now 1");
    keeper.set_now(None, "decided OAuth2", Tags::new()).await.expect("set_now 2");
    keeper.set_now(None, "tests green", Tags::new()).await.expect("set_now 3");

    let result = keeper
        .move_entries("auth-log", "now", TagFilter::new(), false)
        .await
        .expect("move");
    assert_eq!(result.moved, 3);

    let versions = keeper.list_versions("auth-log").await.expect("list_versions");
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].summary, "decided OAuth2");
    assert_eq!(versions[1].summary, "working on auth");

    let current = keeper.get("auth-log", None).await.expect("get auth-log");
    let keeper_core::EntityView::Document(doc) = &current.entity else {
        panic!("expected document")
    };
    assert_eq!(doc.summary, "tests green");

    // `now` was deleted by the move; the next `get_now` recreates the
    // default empty nowdoc.
    let reset = keeper.get_now(None).await.expect("get_now after move");
    assert_eq!(reset.summary, "");
}

/// Property 8: `find`'s tag pre-filter never returns a document whose tag
/// value disagrees, no matter how strong the cosine match would otherwise
/// be.
#[tokio::test]
async fn pre_filter_soundness_excludes_wrong_tag_value() {
    let keeper = keeper_with_dimension(8);

    let mut tenant_a = Tags::new();
    tenant_a.set("tenant", "a");
    keeper
        .put(PutInput::content("shared vocabulary shared vocabulary").with_tags(tenant_a))
        .await
        .expect("put tenant a");

    let mut tenant_b = Tags::new();
    tenant_b.set("tenant", "b");
    keeper
        .put(PutInput::content("shared vocabulary shared vocabulary").with_id("doc-b").with_tags(tenant_b))
        .await
        .expect("put tenant b");

    let result = keeper
        .find(
            FindInput::text("shared vocabulary")
                .with_tag_filter(TagFilter::new().equals("tenant", "a"))
                .with_limit(10),
        )
        .await
        .expect("find");

    assert!(!result.items.is_empty());
    assert!(result.items.iter().all(|item| item.tags.get("tenant") == Some("a")));
}

/// Property 9: holding cosine fixed (identical text), effective score is
/// non-increasing in age; half-life=0 disables decay entirely.
#[tokio::test]
async fn decay_monotonicity_and_zero_half_life_disables_it() {
    let keeper = keeper_with_dimension(8);

    keeper
        .put(PutInput::content("steady state content").with_id("old-doc"))
        .await
        .expect("put old");

    // `find`/`get` compose `cosine * decay_factor(age, half_life)`; check the
    // shared helper's monotonicity directly, since only `updated_at` (always
    // "now" at write time) drives age, not `created_at`.
    let recent = keeper_vectorstore::decay_factor(0.0, 30.0 * 86_400.0);
    let older = keeper_vectorstore::decay_factor(60.0 * 86_400.0, 30.0 * 86_400.0);
    assert!(older < recent);

    let undecayed = keeper_vectorstore::decay_factor(60.0 * 86_400.0, 0.0);
    assert_eq!(undecayed, 1.0);

    let mut config = keeper.config().await;
    config.half_life_seconds = 0.0;
    keeper.update_config(config).await;

    let result = keeper
        .find(FindInput::text("steady state content"))
        .await
        .expect("find with decay disabled");
    let item = result.items.iter().find(|i| i.id == "old-doc").expect("found");
    assert!((item.effective_score - item.score).abs() < 1e-6);
}

/// S3 analogue: swapping the embedding provider to a new dimension flips the
/// store into "reindexing" and enqueues a `reembed` task per document; after
/// draining the queue, `find` returns the document with cosine close to 1.
#[tokio::test]
async fn dimension_swap_triggers_reindex_then_recovers() {
    let docstore = Arc::new(InMemoryDocumentStore::new());
    let vectorstore = Arc::new(InMemoryVectorStore::new());
    let queue = Arc::new(InMemoryPendingQueue::new());

    let small_providers = Arc::new(
        ProviderRouter::new().with_embedding_provider(Arc::new(BagOfWordsEmbedder {
            name: "bow",
            dimension: 4,
        })),
    );
    let keeper_small = Arc::new(Keeper::new(
        Arc::clone(&docstore) as Arc<dyn keeper_docstore::DocumentStore>,
        Arc::clone(&vectorstore) as Arc<dyn keeper_vectorstore::VectorStore>,
        Arc::clone(&queue) as Arc<dyn keeper_queue::PendingQueue>,
        Arc::clone(&small_providers),
        StoreConfig::default(),
    ));

    let doc = keeper_small.put(PutInput::content("X")).await.expect("put under small dim");

    let large_providers = ProviderRouter::new().with_embedding_provider(Arc::new(BagOfWordsEmbedder {
        name: "bow",
        dimension: 16,
    }));
    large_providers
        .seed_recorded_identity(ProviderIdentity {
            name: "bow".to_string(),
            model: "v1".to_string(),
            dimension: 4,
        })
        .await;
    let keeper_large = Arc::new(Keeper::new(
        docstore as Arc<dyn keeper_docstore::DocumentStore>,
        vectorstore as Arc<dyn keeper_vectorstore::VectorStore>,
        queue as Arc<dyn keeper_queue::PendingQueue>,
        Arc::new(large_providers),
        StoreConfig::default(),
    ));

    // Triggers the identity-changed path inside `find_semantic`'s embed call.
    let _ = keeper_large.find(FindInput::text("X")).await.expect("find triggers reindex");
    assert!(keeper_large.reindex_state().await.is_reindexing());

    drain(&keeper_large).await;
    assert_eq!(keeper_large.reindex_state().await, keeper_providers::ReindexState::Current);

    let result = keeper_large.find(FindInput::text("X")).await.expect("find after reindex");
    let found = result.items.iter().find(|i| i.id == doc.id).expect("doc present after reindex");
    assert!(found.score > 0.99, "expected cosine close to 1, got {}", found.score);
}

/// Property 7: export then import(merge) on an unchanged store skips every
/// record; import(replace) recreates an equivalent store and re-enqueues
/// `reembed` work since embeddings never travel in the export format.
#[tokio::test]
async fn idempotent_import_merge_is_a_no_op() {
    let keeper = keeper_with_dimension(8);
    let mut tags = Tags::new();
    tags.set("topic", "api");
    keeper
        .put(PutInput::content("exported content").with_tags(tags))
        .await
        .expect("put");

    let entries = keeper.export_iter(false).await.expect("export");
    let records: Vec<keeper_core::ExportRecord> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            keeper_core::ExportEntry::Record(record) => Some(*record),
            keeper_core::ExportEntry::Header(_) => None,
        })
        .collect();
    assert_eq!(records.len(), 1);

    let stats = keeper
        .import_data(&records, keeper_core::ImportMode::Merge)
        .await
        .expect("import merge");
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.created, 0);
    assert_eq!(stats.updated, 0);

    let replace_stats = keeper
        .import_data(&records, keeper_core::ImportMode::Replace)
        .await
        .expect("import replace");
    assert_eq!(replace_stats.updated, 1);
    assert_eq!(replace_stats.reembed_enqueued, 1);

    let doc = keeper.get(&records[0].id, None).await.expect("get after replace");
    let keeper_core::EntityView::Document(doc) = doc.entity else {
        panic!("expected document")
    };
    assert_eq!(doc.summary, "exported content");
}

/// `get` on an id with a tag filter that does not match returns NotFound,
/// and a matching filter succeeds (spec §4.1 read protocol step 4).
#[tokio::test]
async fn get_honors_tag_filter() {
    let keeper = keeper_with_dimension(8);
    let mut tags = Tags::new();
    tags.set("topic", "api");
    let doc = keeper.put(PutInput::content("filtered doc").with_tags(tags)).await.expect("put");

    let matching = keeper
        .get(&doc.id, Some(&TagFilter::new().equals("topic", "api")))
        .await;
    assert!(matching.is_ok());

    let mismatching = keeper
        .get(&doc.id, Some(&TagFilter::new().equals("topic", "billing")))
        .await;
    assert!(matches!(mismatching, Err(keeper_core::KeeperError::NotFound(_))));
}

/// `delete` removes the document and its embedding; a second delete reports
/// nothing existed.
#[tokio::test]
async fn delete_removes_document_and_vector() {
    let keeper = keeper_with_dimension(8);
    let doc = keeper.put(PutInput::content("to be deleted")).await.expect("put");

    let deleted = keeper.delete(&doc.id, true).await.expect("delete");
    assert!(deleted);

    let get_result = keeper.get(&doc.id, None).await;
    assert!(matches!(get_result, Err(keeper_core::KeeperError::NotFound(_))));

    let deleted_again = keeper.delete(&doc.id, true).await.expect("delete again");
    assert!(!deleted_again);
}

/// `revert` promotes the newest archived version back to current and drops
/// the tail by one; reverting with no versions is a no-op returning `None`.
#[tokio::test]
async fn revert_promotes_newest_version() {
    let keeper = keeper_with_dimension(8);
    let id = "revert-me";
    keeper.put(PutInput::content("v0").with_id(id)).await.expect("put v0");
    keeper.put(PutInput::content("v1").with_id(id)).await.expect("put v1");

    let reverted = keeper.revert(id).await.expect("revert").expect("had a version");
    assert_eq!(reverted.summary, "v0");
    assert!(keeper.list_versions(id).await.expect("list_versions").is_empty());

    let no_more = keeper.revert(id).await.expect("revert again");
    assert!(no_more.is_none());
}

/// Deep-find walks outbound edges breadth-first and stops re-visiting a node
/// already seen, even when the edge graph loops back on itself.
#[tokio::test]
async fn deep_find_expands_edges_and_tolerates_cycles() {
    let keeper = keeper_with_dimension(8);

    let mut decl_tags = Tags::new();
    decl_tags.set("_inverse", "linked_from");
    keeper
        .put(PutInput::content("links_to edge key").with_id(".tag/links_to").with_tags(decl_tags))
        .await
        .expect("declare edge key");

    keeper
        .put(PutInput::content("summary of node b").with_id("node-b"))
        .await
        .expect("put node b");
    let mut a_tags = Tags::new();
    a_tags.set("links_to", "node-b");
    keeper
        .put(PutInput::content("summary of node a").with_id("node-a").with_tags(a_tags))
        .await
        .expect("put node a");
    let mut b_tags = Tags::new();
    b_tags.set("links_to", "node-a");
    keeper
        .tag("node-b", b_tags)
        .await
        .expect("close the loop back to node a");

    let result = keeper
        .find(FindInput {
            deep: true,
            ..FindInput::text("summary of node a").with_limit(1)
        })
        .await
        .expect("deep find");
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].id, "node-a");

    assert!(result.deep_context.iter().any(|item| item.id == "node-b"));
    assert!(
        !result.deep_context.iter().any(|item| item.id == "node-a"),
        "the seed itself must not reappear via the cycle"
    );
}

/// Seeding a `.tag/K` declaration directly through the raw DocumentStore (as
/// an operator would when bootstrapping a store) is picked up by the write
/// path the same way a `put`-created declaration is.
#[tokio::test]
async fn seeded_tag_declaration_is_honored() {
    let docstore = InMemoryDocumentStore::new();
    docstore
        .create(NewDocument {
            id: ".tag/act".to_string(),
            summary: String::new(),
            tags: {
                let mut t = Tags::new();
                t.set("_constrained", "true");
                t
            },
            content_hash: None,
            created_at: Utc::now(),
        })
        .await
        .expect("seed decl");
    docstore
        .create(NewDocument {
            id: ".tag/act/commitment".to_string(),
            summary: String::new(),
            tags: Tags::new(),
            content_hash: None,
            created_at: Utc::now(),
        })
        .await
        .expect("seed child");

    let providers = ProviderRouter::new().with_embedding_provider(Arc::new(BagOfWordsEmbedder {
        name: "bow",
        dimension: 8,
    }));
    let keeper = Keeper::new(
        Arc::new(docstore),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryPendingQueue::new()),
        Arc::new(providers),
        StoreConfig::default(),
    );

    let mut tags = Tags::new();
    tags.set("act", "commitment");
    assert!(keeper.put(PutInput::content("ok").with_tags(tags)).await.is_ok());

    let mut bad_tags = Tags::new();
    bad_tags.set("act", "nonsense");
    assert!(keeper.put(PutInput::content("bad").with_tags(bad_tags)).await.is_err());
}
