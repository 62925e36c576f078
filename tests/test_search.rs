mod common;

use common::{page, TestEnv};
use folio::db::repository::PageRepository;

#[tokio::test]
async fn search_ranks_title_hits_above_content_hits() {
    let env = TestEnv::start([
        page("a", None, "Welcome Home", "<p>hello world</p>", 10_000.0),
        page("b", None, "Contact", "<p>reach home office</p>", 20_000.0),
    ])
    .await;
    let server = env.server();

    let response = server.get("/api/v1/search").add_query_param("q", "home").await;

    response.assert_status_ok();
    let results: Vec<serde_json::Value> = response.json();
    let ids: Vec<&str> = results.iter().filter_map(|r| r["page_id"].as_str()).collect();
    assert_eq!(ids, vec!["a", "b"], "Results: {results:?}");
    assert_eq!(results[0]["title"], "Welcome <mark>Home</mark>");
    assert_eq!(results[1]["page_slug"], "b");
    for result in &results {
        let snippet = result["snippet"].as_str().unwrap().to_lowercase();
        assert!(snippet.contains("<mark>home</mark>"), "Snippet: {snippet}");
    }
}

#[tokio::test]
async fn search_matches_prefix_of_last_term() {
    let env = TestEnv::start([page(
        "k8s",
        None,
        "Kubernetes Deployment Guide",
        "<h1>Deploying</h1><p>How to deploy services to clusters.</p>",
        10_000.0,
    )])
    .await;
    let server = env.server();

    let results: Vec<serde_json::Value> = server
        .get("/api/v1/search")
        .add_query_param("q", "kubernetes deplo")
        .await
        .json();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["page_id"], "k8s");
}

#[tokio::test]
async fn search_with_empty_or_hostile_query_returns_empty_list() {
    let env = TestEnv::start([page("a", None, "Alpha", "alpha", 10_000.0)]).await;
    let server = env.server();

    for query in ["", "   ", "\"unbalanced", "title:(", "AND OR NOT", "*"] {
        let response = server.get("/api/v1/search").add_query_param("q", query).await;
        response.assert_status_ok();
        let results: Vec<serde_json::Value> = response.json();
        assert!(results.is_empty(), "query {query:?} returned {results:?}");
    }
}

#[tokio::test]
async fn title_search_returns_full_titles() {
    let env = TestEnv::start([
        page("a", None, "Deployment <Guide>", "nothing relevant", 10_000.0),
        page("b", None, "Release Notes", "deployment checklist", 20_000.0),
    ])
    .await;
    let server = env.server();

    let results: Vec<serde_json::Value> = server
        .get("/api/v1/search/titles")
        .add_query_param("q", "deploy")
        .await
        .json();
    assert_eq!(
        results,
        vec![serde_json::json!({ "page_id": "a", "page_title": "Deployment <Guide>" })]
    );
}

#[tokio::test]
async fn snippets_never_carry_page_markup() {
    let env = TestEnv::start([page(
        "x",
        None,
        "Scripts",
        "<p>the <b>quick</b> fox</p><script>alert('x')</script>",
        10_000.0,
    )])
    .await;

    let results = env.search.search("quick").await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].snippet, "the <mark>quick</mark> fox");
}

#[tokio::test]
async fn rebuild_matches_store_count() {
    let env = TestEnv::start([
        page("a", None, "Alpha", "", 10_000.0),
        page("b", None, "Beta", "", 20_000.0),
        page("c", Some("a"), "Gamma", "", 10_000.0),
    ])
    .await;

    assert_eq!(
        env.search.indexed_count().unwrap(),
        env.repo.count_pages().await.unwrap()
    );

    // Rows added behind the index's back are dropped by a forced rebuild.
    env.search.upsert(&page("stray", None, "Stray", "", 1.0)).await.unwrap();
    assert_eq!(env.search.indexed_count().unwrap(), 4);
    env.search.build_index(true).await.unwrap();
    assert_eq!(env.search.indexed_count().unwrap(), 3);
}

#[tokio::test]
async fn repeated_upserts_do_not_duplicate_results() {
    let env = TestEnv::start([page("z", None, "Zebra", "stripes", 10_000.0)]).await;
    let zebra = env.repo.get_page_by_id("z").await.unwrap().unwrap();

    for _ in 0..3 {
        env.search.upsert(&zebra).await.unwrap();
    }

    let results = env.search.search("stripes").await;
    assert_eq!(results.len(), 1);
    assert_eq!(env.search.indexed_count().unwrap(), 1);
}

#[tokio::test]
async fn closed_index_answers_with_empty_results() {
    let env = TestEnv::start([page("a", None, "Alpha", "", 10_000.0)]).await;
    let server = env.server();

    env.search.close();

    let results: Vec<serde_json::Value> = server
        .get("/api/v1/search")
        .add_query_param("q", "alpha")
        .await
        .json();
    assert!(results.is_empty());
}
