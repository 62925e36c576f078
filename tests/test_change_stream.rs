mod common;

use common::{eventually, page, TestEnv};

#[tokio::test]
async fn new_pages_become_searchable() {
    let env = TestEnv::start(Vec::new()).await;
    env.follow_changes().await;

    env.repo
        .insert_page(page("o", None, "Okapi", "<p>forest giraffe</p>", 10_000.0));

    let search = env.search.clone();
    eventually(|| {
        let search = search.clone();
        async move { search.search("giraffe").await.len() == 1 }
    })
    .await;
}

#[tokio::test]
async fn updated_pages_are_reindexed() {
    let env = TestEnv::start([page("p", None, "Pangolin", "scales", 10_000.0)]).await;
    env.follow_changes().await;

    env.repo
        .insert_page(page("p", None, "Pangolin", "ants and termites", 10_000.0));

    let search = env.search.clone();
    eventually(|| {
        let search = search.clone();
        async move {
            search.search("termites").await.len() == 1 && search.search("scales").await.is_empty()
        }
    })
    .await;
    assert_eq!(env.search.indexed_count().unwrap(), 1);
}

#[tokio::test]
async fn deleted_pages_leave_results() {
    let env = TestEnv::start([
        page("a", None, "Axolotl", "salamander", 10_000.0),
        page("b", None, "Newt", "salamander", 20_000.0),
    ])
    .await;
    env.follow_changes().await;

    env.repo.delete_page("a");

    let search = env.search.clone();
    eventually(|| {
        let search = search.clone();
        async move { search.indexed_count().unwrap() == 1 }
    })
    .await;

    let results = env.search.search("salamander").await;
    let ids: Vec<&str> = results.iter().map(|r| r.page_id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
}

#[tokio::test]
async fn hits_for_pages_deleted_before_the_event_are_dropped() {
    let env = TestEnv::start([page("a", None, "Axolotl", "salamander", 10_000.0)]).await;

    // No listener: the row stays in the index, the page is gone from the store.
    env.repo.delete_page("a");
    assert_eq!(env.search.indexed_count().unwrap(), 1);
    assert!(env.search.search("salamander").await.is_empty());
    assert_eq!(env.search.search_by_title("axolotl").await.len(), 1);
}

#[tokio::test]
async fn listener_resubscribes_after_disconnect() {
    let env = TestEnv::start(Vec::new()).await;
    env.follow_changes().await;
    assert_eq!(env.repo.subscription_count(), 1);

    env.repo.fail_next_subscriptions(2);
    env.repo.disconnect_subscribers();

    let repo = env.repo.clone();
    eventually(|| {
        let repo = repo.clone();
        async move { repo.subscription_count() == 2 }
    })
    .await;

    env.repo
        .insert_page(page("q", None, "Quokka", "marsupial", 10_000.0));
    let search = env.search.clone();
    eventually(|| {
        let search = search.clone();
        async move { search.search("marsupial").await.len() == 1 }
    })
    .await;
}

#[tokio::test]
async fn close_stops_following_changes() {
    let env = TestEnv::start(Vec::new()).await;
    env.follow_changes().await;

    env.search.close();
    env.search.close();

    env.repo
        .insert_page(page("x", None, "Xerus", "squirrel", 10_000.0));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(env.search.indexed_count().is_err());
    assert!(env.search.search("squirrel").await.is_empty());
}
