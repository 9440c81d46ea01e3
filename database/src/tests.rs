use std::env;

use reddalert_core::{AlertStatus, ContentType, SubredditStatus};
use uuid::Uuid;

use crate::content::{compute_content_hash, IngestOutcome, NewContent};
use crate::matches::NewMatch;
use crate::tenants::{NewKeyword, NewSubreddit};
use crate::Database;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_reddalert_{}.db", Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    let db = Database::connect(&db_url)
        .await
        .expect("failed to connect to test database");
    db.run_migrations().await.expect("failed to run migrations");
    db
}

fn content_item(source_id: &str, subreddit: &str, body: &str) -> NewContent {
    let normalized_text = body.to_lowercase();
    NewContent {
        source_id: source_id.to_string(),
        subreddit: subreddit.to_string(),
        content_type: ContentType::Post,
        title: Some("A title".to_string()),
        body: body.to_string(),
        author: "poster".to_string(),
        content_hash: compute_content_hash(&normalized_text),
        normalized_text,
        permalink: format!("https://reddit.com/r/{subreddit}/comments/{source_id}/"),
        is_media_post: false,
        created_at_remote: 1_700_000_000,
        is_deleted: false,
    }
}

fn match_item(tenant_id: Uuid, keyword_id: Uuid, content_id: Uuid) -> NewMatch {
    NewMatch {
        tenant_id,
        keyword_id,
        content_id,
        content_type: ContentType::Post,
        subreddit: "sportsbook".to_string(),
        matched_phrase: "arbitrage betting".to_string(),
        also_matched: vec![],
        snippet: "talking about arbitrage betting".to_string(),
        full_text: "talking about arbitrage betting today".to_string(),
        proximity_score: 1.0,
        reddit_url: "https://reddit.com/r/sportsbook/comments/abc/".to_string(),
        reddit_author: "poster".to_string(),
        is_deleted: false,
    }
}

async fn seed_tenant(db: &Database) -> (Uuid, Uuid) {
    let tenant = db
        .insert_tenant("tenant@example.com", 60, 1_700_000_000)
        .await
        .expect("insert tenant");
    let keyword_id = db
        .insert_keyword(
            &NewKeyword {
                tenant_id: tenant.id,
                phrases: vec!["arbitrage betting".to_string()],
                exclusions: vec![],
                proximity_window: 15,
                require_order: false,
                use_stemming: false,
            },
            1_700_000_000,
        )
        .await
        .expect("insert keyword");
    (tenant.id, keyword_id)
}

#[tokio::test]
async fn migrations_run_cleanly() {
    let _db = setup_test_db().await;
}

#[tokio::test]
async fn ingestion_dedup_keeps_one_row_per_body() {
    let db = setup_test_db().await;
    let now = 1_700_000_100;

    let first = db
        .upsert_content(&content_item("post1", "sportsbook", "Same body text"), now)
        .await
        .unwrap();
    let origin_id = match first {
        IngestOutcome::Inserted(content) => content.id,
        other => panic!("expected insert, got {other:?}"),
    };

    // Crosspost: different source id, same subreddit, same body.
    let second = db
        .upsert_content(&content_item("post2", "sportsbook", "Same body text"), now)
        .await
        .unwrap();
    match second {
        IngestOutcome::CrosspostRecorded { origin_id: origin } => assert_eq!(origin, origin_id),
        other => panic!("expected crosspost ref, got {other:?}"),
    }

    let rows = db.content_fetched_since(0).await.unwrap();
    assert_eq!(rows.len(), 1, "only one content row per body");
}

#[tokio::test]
async fn reingesting_same_source_id_refreshes() {
    let db = setup_test_db().await;

    let inserted = db
        .upsert_content(&content_item("post1", "sportsbook", "Body"), 100)
        .await
        .unwrap();
    assert!(matches!(inserted, IngestOutcome::Inserted(_)));

    let again = db
        .upsert_content(&content_item("post1", "sportsbook", "Body"), 200)
        .await
        .unwrap();
    assert!(matches!(again, IngestOutcome::Refreshed));

    let content = db.content_by_source_id("post1").await.unwrap().unwrap();
    assert_eq!(content.fetched_at, 200);
}

#[tokio::test]
async fn cross_subreddit_duplicate_links_origin() {
    let db = setup_test_db().await;

    let first = db
        .upsert_content(&content_item("post1", "sportsbook", "Shared body"), 100)
        .await
        .unwrap();
    let origin_id = match first {
        IngestOutcome::Inserted(content) => content.id,
        other => panic!("expected insert, got {other:?}"),
    };

    let second = db
        .upsert_content(&content_item("post2", "gambling", "Shared body"), 100)
        .await
        .unwrap();
    match second {
        IngestOutcome::Inserted(content) => {
            assert_eq!(content.crosspost_of, Some(origin_id));
        }
        other => panic!("expected insert with crosspost_of, got {other:?}"),
    }
}

#[tokio::test]
async fn three_way_crosspost_always_links_the_first_row() {
    let db = setup_test_db().await;

    let first = match db
        .upsert_content(&content_item("post1", "sportsbook", "Viral body"), 100)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };

    let second = match db
        .upsert_content(&content_item("post2", "gambling", "Viral body"), 200)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };
    assert_eq!(second.crosspost_of, Some(first.id));

    // The third copy points at the original, not the second copy.
    let third = match db
        .upsert_content(&content_item("post3", "soccerbetting", "Viral body"), 300)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };
    assert_eq!(third.crosspost_of, Some(first.id));
}

#[tokio::test]
async fn mark_content_deleted_flips_flag() {
    let db = setup_test_db().await;
    db.upsert_content(&content_item("post1", "sportsbook", "Body"), 100)
        .await
        .unwrap();

    assert!(db.mark_content_deleted("post1").await.unwrap());
    assert!(!db.mark_content_deleted("missing").await.unwrap());

    let content = db.content_by_source_id("post1").await.unwrap().unwrap();
    assert!(content.is_deleted);
}

#[tokio::test]
async fn match_dedup_is_enforced_by_unique_constraint() {
    let db = setup_test_db().await;
    let (tenant_id, keyword_id) = seed_tenant(&db).await;
    let content = match db
        .upsert_content(&content_item("post1", "sportsbook", "Body"), 100)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };

    let first = db
        .insert_match(&match_item(tenant_id, keyword_id, content.id), 200)
        .await
        .unwrap();
    assert!(first.is_some());

    let second = db
        .insert_match(&match_item(tenant_id, keyword_id, content.id), 201)
        .await
        .unwrap();
    assert!(second.is_none(), "duplicate triple must be a silent no-op");

    assert!(db
        .match_exists(&tenant_id, &keyword_id, &content.id)
        .await
        .unwrap());
    assert_eq!(db.pending_matches().await.unwrap().len(), 1);
}

#[tokio::test]
async fn status_transitions_are_single_shot() {
    let db = setup_test_db().await;
    let (tenant_id, keyword_id) = seed_tenant(&db).await;
    let content = match db
        .upsert_content(&content_item("post1", "sportsbook", "Body"), 100)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };
    let match_id = db
        .insert_match(&match_item(tenant_id, keyword_id, content.id), 200)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(db.mark_matches_sent(&[match_id], 300).await.unwrap(), 1);
    let sent = db.match_by_id(&match_id).await.unwrap().unwrap();
    assert_eq!(sent.alert_status, AlertStatus::Sent);
    assert_eq!(sent.alert_sent_at, Some(300));

    // Terminal: neither a repeat send nor a failure applies.
    assert_eq!(db.mark_matches_sent(&[match_id], 400).await.unwrap(), 0);
    assert_eq!(db.mark_matches_failed(&[match_id]).await.unwrap(), 0);
    let still_sent = db.match_by_id(&match_id).await.unwrap().unwrap();
    assert_eq!(still_sent.alert_status, AlertStatus::Sent);
    assert_eq!(still_sent.alert_sent_at, Some(300));
}

#[tokio::test]
async fn retention_deletes_old_rows() {
    let db = setup_test_db().await;
    let (tenant_id, keyword_id) = seed_tenant(&db).await;

    let old = match db
        .upsert_content(&content_item("old", "sportsbook", "Old body"), 100)
        .await
        .unwrap()
    {
        IngestOutcome::Inserted(content) => content,
        other => panic!("expected insert, got {other:?}"),
    };
    db.insert_match(&match_item(tenant_id, keyword_id, old.id), 100)
        .await
        .unwrap();

    db.upsert_content(&content_item("fresh", "sportsbook", "Fresh body"), 1000)
        .await
        .unwrap();

    let summary = db.delete_expired(500).await.unwrap();
    assert_eq!(summary.matches_deleted, 1);
    assert_eq!(summary.content_deleted, 1);

    let remaining = db.content_fetched_since(0).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].source_id, "fresh");
}

#[tokio::test]
async fn config_load_and_version_bump() {
    let db = setup_test_db().await;
    let tenant = db
        .insert_tenant("tenant@example.com", 30, 1_700_000_000)
        .await
        .unwrap();

    db.insert_keyword(
        &NewKeyword {
            tenant_id: tenant.id,
            phrases: vec!["arbitrage betting".to_string(), "arb tool".to_string()],
            exclusions: vec!["scam".to_string()],
            proximity_window: 10,
            require_order: true,
            use_stemming: true,
        },
        1_700_000_001,
    )
    .await
    .unwrap();
    db.insert_subreddit(&NewSubreddit {
        tenant_id: tenant.id,
        name: "r/SportsBook".to_string(),
        include_media_posts: false,
        dedupe_crossposts: true,
        filter_bots: true,
    })
    .await
    .unwrap();
    db.insert_webhook(
        &tenant.id,
        "https://discord.com/api/webhooks/1/abc",
        true,
    )
    .await
    .unwrap();

    let versions = db.config_versions().await.unwrap();
    assert_eq!(versions[&tenant.id], 3, "each write bumps the version");

    let configs = db.load_tenant_configs().await.unwrap();
    assert_eq!(configs.len(), 1);
    let config = &configs[0];
    assert_eq!(config.tenant.poll_interval_minutes, 30);
    assert_eq!(config.keywords.len(), 1);
    assert_eq!(config.keywords[0].phrases.len(), 2);
    assert_eq!(config.keywords[0].exclusions, vec!["scam"]);
    assert!(config.keywords[0].require_order);
    assert!(config.keywords[0].use_stemming);
    assert_eq!(config.subreddits[0].name, "sportsbook");
    assert!(!config.subreddits[0].include_media_posts);
    assert_eq!(config.subreddits[0].status, SubredditStatus::Active);
    assert!(config.primary_webhook().is_some());
}

#[tokio::test]
async fn subreddit_status_flips_and_recovers() {
    let db = setup_test_db().await;
    let tenant_a = db.insert_tenant("a@example.com", 60, 0).await.unwrap();
    let tenant_b = db.insert_tenant("b@example.com", 60, 0).await.unwrap();
    for tenant_id in [tenant_a.id, tenant_b.id] {
        db.insert_subreddit(&NewSubreddit {
            tenant_id,
            name: "sportsbook".to_string(),
            include_media_posts: true,
            dedupe_crossposts: true,
            filter_bots: false,
        })
        .await
        .unwrap();
    }

    db.set_subreddit_status("sportsbook", SubredditStatus::Private)
        .await
        .unwrap();
    let configs = db.load_tenant_configs().await.unwrap();
    for config in &configs {
        assert_eq!(config.subreddits[0].status, SubredditStatus::Private);
    }

    db.touch_subreddits_polled("sportsbook", 777).await.unwrap();
    let configs = db.load_tenant_configs().await.unwrap();
    for config in &configs {
        assert_eq!(config.subreddits[0].status, SubredditStatus::Active);
        assert_eq!(config.subreddits[0].last_polled_at, Some(777));
    }
}

#[tokio::test]
async fn inserting_a_new_primary_webhook_demotes_the_old_one() {
    let db = setup_test_db().await;
    let tenant = db.insert_tenant("a@example.com", 60, 0).await.unwrap();

    let old_primary = db
        .insert_webhook(&tenant.id, "https://discord.com/api/webhooks/1/a", true)
        .await
        .unwrap();
    let new_primary = db
        .insert_webhook(&tenant.id, "https://discord.com/api/webhooks/2/b", true)
        .await
        .unwrap();

    let configs = db.load_tenant_configs().await.unwrap();
    let webhooks = &configs[0].webhooks;
    assert_eq!(webhooks.len(), 2);
    assert_eq!(
        webhooks.iter().filter(|w| w.is_primary).count(),
        1,
        "at most one primary per tenant"
    );
    let primary = configs[0].primary_webhook().unwrap();
    assert_eq!(primary.id, new_primary);
    assert!(webhooks
        .iter()
        .any(|w| w.id == old_primary && !w.is_primary));
}

#[tokio::test]
async fn unique_tenant_subreddit_pair() {
    let db = setup_test_db().await;
    let tenant = db.insert_tenant("a@example.com", 60, 0).await.unwrap();
    let subreddit = NewSubreddit {
        tenant_id: tenant.id,
        name: "sportsbook".to_string(),
        include_media_posts: true,
        dedupe_crossposts: true,
        filter_bots: false,
    };
    db.insert_subreddit(&subreddit).await.unwrap();
    assert!(db.insert_subreddit(&subreddit).await.is_err());
}
