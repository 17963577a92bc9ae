use std::sync::Arc;

use gmemory::{
    BranchMetadata, Content, Conversation, ConversationRepository, ConversationStatus,
    ForkRequest, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
    InMemoryConversationRepository, InMemoryIdempotencyStore, Item, ItemRating, ItemRole,
    MAIN_BRANCH, MemoryErrorKind, Pagination, SqliteConversationRepository, SqliteIdempotencyStore,
};
use gcommon::PrincipalId;

fn message(id: &str, role: ItemRole, text: &str) -> Item {
    Item::message(id, role, vec![Content::text(text)])
}

fn backends() -> Vec<(&'static str, Arc<dyn ConversationRepository>)> {
    vec![
        ("memory", Arc::new(InMemoryConversationRepository::new())),
        (
            "sqlite",
            Arc::new(SqliteConversationRepository::new_in_memory().expect("sqlite repository")),
        ),
    ]
}

async fn seeded(repo: &dyn ConversationRepository, id: &str) {
    repo.create(&Conversation::new(id, "user-1", Some("Trip".to_string())))
        .await
        .expect("create");
    repo.append_items(
        id,
        MAIN_BRANCH,
        vec![
            message("msg_a", ItemRole::User, "Plan a trip to Paris"),
            message("msg_b", ItemRole::Assistant, "Sure, when?"),
            message("msg_c", ItemRole::User, "In May"),
        ],
    )
    .await
    .expect("append");
}

#[tokio::test]
async fn create_then_find_round_trips_items() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let found = repo
            .find_by_public_id("conv_1")
            .await
            .expect("find")
            .expect("conversation should exist");
        assert_eq!(found.title.as_deref(), Some("Trip"), "{name}");
        assert_eq!(found.active_branch(), MAIN_BRANCH, "{name}");
        let items = found.active_branch_items();
        assert_eq!(items.len(), 3, "{name}");
        assert_eq!(items[1].role, Some(ItemRole::Assistant), "{name}");
        assert_eq!(items[2].sequence_number, 2, "{name}");
        assert_eq!(items[2].text(), "In May", "{name}");

        assert!(repo.find_by_public_id("conv_missing").await.expect("find").is_none());

        let err = repo
            .create(&Conversation::new("conv_1", "user-1", None))
            .await
            .expect_err("duplicate create must fail");
        assert_eq!(err.kind, MemoryErrorKind::Conflict, "{name}");
    }
}

#[tokio::test]
async fn appends_continue_the_sequence() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let stored = repo
            .append_items(
                "conv_1",
                MAIN_BRANCH,
                vec![
                    message("msg_d", ItemRole::Assistant, "Great"),
                    message("msg_e", ItemRole::User, "Thanks"),
                ],
            )
            .await
            .expect("append");

        assert_eq!(stored[0].sequence_number, 3, "{name}");
        assert_eq!(stored[1].sequence_number, 4, "{name}");
        assert_eq!(stored[1].conversation_id, "conv_1", "{name}");
        assert_eq!(
            repo.count_items("conv_1", MAIN_BRANCH).await.expect("count"),
            5,
            "{name}"
        );

        let err = repo
            .append_items("conv_1", "ghost", vec![message("msg_x", ItemRole::User, "x")])
            .await
            .expect_err("unknown branch must fail");
        assert_eq!(err.kind, MemoryErrorKind::NotFound, "{name}");
    }
}

#[tokio::test]
async fn list_items_pages_by_cursor() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let first = repo
            .list_items("conv_1", MAIN_BRANCH, Pagination::new(2))
            .await
            .expect("first page");
        assert_eq!(
            first.iter().map(|item| item.public_id.as_str()).collect::<Vec<_>>(),
            vec!["msg_a", "msg_b"],
            "{name}"
        );

        let second = repo
            .list_items("conv_1", MAIN_BRANCH, Pagination::new(2).after("msg_b"))
            .await
            .expect("second page");
        assert_eq!(second.len(), 1, "{name}");
        assert_eq!(second[0].public_id, "msg_c", "{name}");

        let unknown = repo
            .list_items("conv_1", MAIN_BRANCH, Pagination::new(2).after("msg_zzz"))
            .await
            .expect("unknown cursor");
        assert!(unknown.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn fork_copies_prefix_and_isolates_branches() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let meta = repo
            .fork_branch(
                "conv_1",
                ForkRequest::new(MAIN_BRANCH, "alt")
                    .from_item("msg_b")
                    .with_description("retry"),
            )
            .await
            .expect("fork");
        assert_eq!(meta.item_count, 2, "{name}");
        assert_eq!(meta.parent_branch.as_deref(), Some(MAIN_BRANCH), "{name}");
        assert_eq!(meta.forked_from_item_id.as_deref(), Some("msg_b"), "{name}");

        repo.set_active_branch("conv_1", "alt").await.expect("switch");
        repo.append_items("conv_1", "alt", vec![message("msg_z", ItemRole::User, "In June")])
            .await
            .expect("append to fork");
        repo.rate_item("conv_1", "msg_a", ItemRating::Like, Some("good".to_string()))
            .await
            .expect("rate");

        let conversation = repo
            .find_by_public_id("conv_1")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(conversation.active_branch(), "alt", "{name}");
        assert_eq!(conversation.branch_items(MAIN_BRANCH).len(), 3, "{name}");
        assert_eq!(conversation.branch_items(MAIN_BRANCH)[0].rating, None, "{name}");
        let alt = conversation.branch_items("alt");
        assert_eq!(alt.len(), 3, "{name}");
        assert_eq!(alt[2].sequence_number, 2, "{name}");
        assert_eq!(alt[2].branch, "alt", "{name}");
        assert_eq!(alt[0].rating, Some(ItemRating::Like), "{name}");

        assert_eq!(
            repo.get_item_rating("conv_1", "msg_a").await.expect("rating"),
            Some(ItemRating::Like),
            "{name}"
        );
        repo.remove_item_rating("conv_1", "msg_a")
            .await
            .expect("remove rating");
        assert_eq!(
            repo.get_item_rating("conv_1", "msg_a").await.expect("rating"),
            None,
            "{name}"
        );
    }
}

const CONCURRENT_WRITERS: usize = 24;

async fn append_concurrently(
    writers: Vec<Arc<dyn ConversationRepository>>,
    conversation_id: &'static str,
) -> Vec<usize> {
    let handles = (0..CONCURRENT_WRITERS)
        .map(|index| {
            let repo = Arc::clone(&writers[index % writers.len()]);
            tokio::spawn(async move {
                repo.append_items(
                    conversation_id,
                    MAIN_BRANCH,
                    vec![message(
                        &format!("msg_{index}"),
                        ItemRole::User,
                        &format!("retry {index}"),
                    )],
                )
                .await
                .expect("concurrent append")
            })
        })
        .collect::<Vec<_>>();

    let mut sequences = Vec::with_capacity(CONCURRENT_WRITERS);
    for handle in handles {
        let stored = handle.await.expect("append task");
        sequences.extend(stored.iter().map(|item| item.sequence_number));
    }
    sequences.sort_unstable();
    sequences
}

async fn assert_contiguous_branch(repo: &dyn ConversationRepository, name: &str) {
    assert_eq!(
        repo.count_items("conv_race", MAIN_BRANCH).await.expect("count"),
        CONCURRENT_WRITERS,
        "{name}"
    );
    let items = repo
        .list_items("conv_race", MAIN_BRANCH, Pagination::new(100))
        .await
        .expect("list");
    assert_eq!(
        items.iter().map(|item| item.sequence_number).collect::<Vec<_>>(),
        (0..CONCURRENT_WRITERS).collect::<Vec<_>>(),
        "{name}"
    );
    let conversation = repo
        .find_by_public_id("conv_race")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(
        conversation.branch(MAIN_BRANCH).map(|meta| meta.item_count),
        Some(CONCURRENT_WRITERS),
        "{name}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_assign_unique_contiguous_sequences() {
    for (name, repo) in backends() {
        repo.create(&Conversation::new("conv_race", "user-1", None))
            .await
            .expect("create");

        let sequences = append_concurrently(vec![Arc::clone(&repo)], "conv_race").await;
        assert_eq!(sequences, (0..CONCURRENT_WRITERS).collect::<Vec<_>>(), "{name}");
        assert_contiguous_branch(repo.as_ref(), name).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_writers_sharing_a_file_never_reuse_sequences() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("race.sqlite3");
    let writers: Vec<Arc<dyn ConversationRepository>> = vec![
        Arc::new(SqliteConversationRepository::new(&path).expect("first writer")),
        Arc::new(SqliteConversationRepository::new(&path).expect("second writer")),
    ];
    writers[0]
        .create(&Conversation::new("conv_race", "user-1", None))
        .await
        .expect("create");

    let sequences = append_concurrently(writers.clone(), "conv_race").await;
    assert_eq!(sequences, (0..CONCURRENT_WRITERS).collect::<Vec<_>>());
    assert_contiguous_branch(writers[1].as_ref(), "sqlite-shared").await;
}

#[tokio::test]
async fn fork_with_blank_item_id_records_no_fork_point() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let meta = repo
            .fork_branch("conv_1", ForkRequest::new(MAIN_BRANCH, "blank").from_item(""))
            .await
            .expect("fork");
        assert_eq!(meta.item_count, 0, "{name}");
        assert_eq!(meta.forked_from_item_id, None, "{name}");

        let conversation = repo
            .find_by_public_id("conv_1")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(
            conversation
                .branch("blank")
                .and_then(|meta| meta.forked_from_item_id.clone()),
            None,
            "{name}"
        );
    }
}

#[tokio::test]
async fn fork_rejects_invalid_requests() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let err = repo
            .fork_branch("conv_1", ForkRequest::new(MAIN_BRANCH, MAIN_BRANCH))
            .await
            .expect_err("duplicate name");
        assert_eq!(err.kind, MemoryErrorKind::Conflict, "{name}");

        let err = repo
            .fork_branch("conv_1", ForkRequest::new("ghost", "alt"))
            .await
            .expect_err("unknown source");
        assert_eq!(err.kind, MemoryErrorKind::NotFound, "{name}");

        let err = repo
            .fork_branch("conv_1", ForkRequest::new(MAIN_BRANCH, "alt").from_item("msg_zzz"))
            .await
            .expect_err("unknown item");
        assert_eq!(err.kind, MemoryErrorKind::NotFound, "{name}");
        assert!(
            repo.get_branch("conv_1", "alt").await.expect("lookup").is_none(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn branch_lifecycle_guards_main_and_active() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;
        repo.create_branch(
            "conv_1",
            BranchMetadata::new("scratch").with_description(Some("notes".to_string())),
        )
        .await
        .expect("create branch");

        let names = repo
            .list_branches("conv_1")
            .await
            .expect("list")
            .into_iter()
            .map(|meta| meta.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec![MAIN_BRANCH.to_string(), "scratch".to_string()], "{name}");

        let err = repo
            .delete_branch("conv_1", MAIN_BRANCH)
            .await
            .expect_err("main is protected");
        assert_eq!(err.kind, MemoryErrorKind::InvalidRequest, "{name}");

        repo.set_active_branch("conv_1", "scratch").await.expect("switch");
        let err = repo
            .delete_branch("conv_1", "scratch")
            .await
            .expect_err("active is protected");
        assert_eq!(err.kind, MemoryErrorKind::InvalidState, "{name}");

        repo.set_active_branch("conv_1", MAIN_BRANCH)
            .await
            .expect("switch back");
        repo.delete_branch("conv_1", "scratch").await.expect("delete");
        assert!(repo.get_branch("conv_1", "scratch").await.expect("get").is_none());

        let err = repo
            .set_active_branch("conv_1", "scratch")
            .await
            .expect_err("deleted branch");
        assert_eq!(err.kind, MemoryErrorKind::NotFound, "{name}");
    }
}

#[tokio::test]
async fn get_item_prefers_the_active_branch_copy() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;
        repo.fork_branch("conv_1", ForkRequest::new(MAIN_BRANCH, "alt").from_item("msg_c"))
            .await
            .expect("fork");

        let item = repo
            .get_item("conv_1", "msg_c")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(item.branch, MAIN_BRANCH, "{name}");

        repo.set_active_branch("conv_1", "alt").await.expect("switch");
        let item = repo
            .get_item("conv_1", "msg_c")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(item.branch, "alt", "{name}");
        assert!(repo.get_item("conv_1", "msg_zzz").await.expect("get").is_none());
    }
}

#[tokio::test]
async fn search_matches_case_insensitively() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;

        let hits = repo.search_items("conv_1", "paris").await.expect("search");
        assert_eq!(hits.len(), 1, "{name}");
        assert_eq!(hits[0].public_id, "msg_a", "{name}");
        assert!(repo.search_items("conv_1", "tokyo").await.expect("search").is_empty());
    }
}

#[tokio::test]
async fn list_by_owner_hides_deleted_and_pages() {
    for (name, repo) in backends() {
        for id in ["conv_1", "conv_2", "conv_3"] {
            repo.create(&Conversation::new(id, "user-1", None))
                .await
                .expect("create");
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        repo.create(&Conversation::new("conv_other", "user-2", None))
            .await
            .expect("create");
        repo.delete("conv_2").await.expect("delete");

        let owner = PrincipalId::from("user-1");
        let listed = repo
            .list_by_owner(&owner, Pagination::default())
            .await
            .expect("list");
        assert_eq!(
            listed.iter().map(Conversation::public_id).collect::<Vec<_>>(),
            vec!["conv_3", "conv_1"],
            "{name}"
        );

        let next = repo
            .list_by_owner(&owner, Pagination::new(1).after("conv_3"))
            .await
            .expect("next page");
        assert_eq!(next.len(), 1, "{name}");
        assert_eq!(next[0].public_id(), "conv_1", "{name}");

        let deleted = repo
            .find_by_public_id("conv_2")
            .await
            .expect("find")
            .expect("rows are retained");
        assert_eq!(deleted.status(), ConversationStatus::Deleted, "{name}");
        let err = repo.delete("conv_2").await.expect_err("already deleted");
        assert_eq!(err.kind, MemoryErrorKind::InvalidState, "{name}");
    }
}

#[tokio::test]
async fn update_writes_header_fields() {
    for (name, repo) in backends() {
        seeded(repo.as_ref(), "conv_1").await;
        let mut conversation = repo
            .find_by_public_id("conv_1")
            .await
            .expect("find")
            .expect("exists");
        conversation.set_title("Renamed");
        conversation
            .metadata
            .insert("topic".to_string(), "travel".to_string());
        repo.update(&conversation).await.expect("update");

        let reloaded = repo
            .find_by_public_id("conv_1")
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(reloaded.title.as_deref(), Some("Renamed"), "{name}");
        assert_eq!(
            reloaded.metadata.get("topic").map(String::as_str),
            Some("travel"),
            "{name}"
        );
        assert_eq!(reloaded.active_branch_items().len(), 3, "{name}");
    }
}

#[tokio::test]
async fn sqlite_repository_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("gantry.sqlite3");

    {
        let repo = SqliteConversationRepository::new(&path).expect("open");
        seeded(&repo, "conv_1").await;
    }

    let reopened = SqliteConversationRepository::new(&path).expect("reopen");
    let conversation = reopened
        .find_by_public_id("conv_1")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(conversation.active_branch_items().len(), 3);
    assert_eq!(conversation.owner().as_str(), "user-1");
}

#[tokio::test]
async fn idempotency_records_are_write_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let stores: Vec<(&str, Arc<dyn IdempotencyStore>)> = vec![
        ("memory", Arc::new(InMemoryIdempotencyStore::new())),
        (
            "sqlite",
            Arc::new(SqliteIdempotencyStore::new(dir.path().join("idem.sqlite3")).expect("open")),
        ),
    ];

    for (name, store) in stores {
        let key = IdempotencyKey::new("user-1", "POST", "/v1/chat/completions", "key-1");
        assert!(store.get(&key).await.expect("miss").is_none(), "{name}");

        store
            .save(
                IdempotencyRecord::new(key.clone(), 200, b"{\"id\":\"c1\"}".to_vec())
                    .with_content_type("application/json"),
            )
            .await
            .expect("save");

        let record = store.get(&key).await.expect("hit").expect("record");
        assert_eq!(record.status, 200, "{name}");
        assert_eq!(record.body, b"{\"id\":\"c1\"}".to_vec(), "{name}");
        assert_eq!(record.content_type.as_deref(), Some("application/json"), "{name}");

        let err = store
            .save(IdempotencyRecord::new(key.clone(), 500, b"other".to_vec()))
            .await
            .expect_err("second save must conflict");
        assert_eq!(err.kind, MemoryErrorKind::Conflict, "{name}");

        let other_user = IdempotencyKey::new("user-2", "POST", "/v1/chat/completions", "key-1");
        assert!(store.get(&other_user).await.expect("miss").is_none(), "{name}");
    }
}
