use std::sync::Arc;
use std::time::Duration;

use cryptid::app::notice::Notice;
use cryptid::app::session::Session;
use cryptid::app::state::AppState;
use cryptid::identity::Identity;
use cryptid::mirror;
use cryptid::model::{AuthorId, BookRequest, Character};
use cryptid::store::memory::{MemoryStore, StoreOptions};
use cryptid::store::{CollectionPath, DocumentStore, Fields};

fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn character(name: &str) -> Fields {
    fields(serde_json::json!({ "name": name, "icon": "🎨", "imageUrl": "data:image/png;base64,AAAA" }))
}

async fn wait_for(session: &Session, pred: impl Fn(&AppState) -> bool) -> AppState {
    let mut updates = session.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = updates.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            updates.changed().await.expect("session is running");
        }
    })
    .await
    .expect("state reached in time")
}

fn names(characters: &[Character]) -> Vec<&str> {
    let mut names: Vec<&str> = characters.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    names
}

#[tokio::test]
async fn unreadable_pages_blob_shows_an_empty_book() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(StoreOptions::default()));
    store
        .create(
            &CollectionPath::book_requests(),
            "r1",
            fields(serde_json::json!({
                "authorName": "Jane Doe",
                "title": "The Loch",
                "status": "ready",
                "pages": "not json",
            })),
        )
        .await?;

    let session = Session::start(store.clone(), Identity::anonymous(), None);
    let state = wait_for(&session, |s| !s.book_requests.is_empty()).await;

    let books: Vec<&BookRequest> = state.published_books().collect();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "The Loch");
    assert!(books[0].pages.is_empty());
    Ok(())
}

#[tokio::test]
async fn every_write_replaces_the_projection() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(StoreOptions::default()));
    let session = Session::start(store.clone(), Identity::anonymous(), None);
    let path = CollectionPath::book_requests();

    let request = fields(serde_json::json!({
        "authorName": "Jane Doe",
        "title": "Tea Time",
        "status": "pending",
        "pages": "[]",
    }));
    let id = store.add(&path, request).await?;
    wait_for(&session, |s| s.book_requests.len() == 1).await;

    store
        .update(&path, &id, fields(serde_json::json!({ "status": "ready" })))
        .await?;
    let state = wait_for(&session, |s| s.published_books().count() == 1).await;
    assert_eq!(state.book_requests.len(), 1);

    store.delete(&path, &id).await?;
    wait_for(&session, |s| s.book_requests.is_empty()).await;
    Ok(())
}

#[tokio::test]
async fn switching_author_only_shows_the_new_authors_characters() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(StoreOptions::default()));
    let jane = AuthorId::from_display_name("Jane Doe");
    let ollie = AuthorId::from_display_name("Ollie");
    store
        .add(&CollectionPath::characters(&jane), character("Glimmer"))
        .await?;
    store
        .add(&CollectionPath::characters(&ollie), character("Hootie"))
        .await?;

    let mut session = Session::start(store.clone(), Identity::anonymous(), Some("Jane Doe".into()));
    let state = wait_for(&session, |s| !s.custom_characters.is_empty()).await;
    assert_eq!(names(&state.custom_characters), vec!["Glimmer"]);
    assert_eq!(session.active_author_id(), Some(&jane));

    session.set_active_author(Some("Ollie".into()));
    let state = wait_for(&session, |s| {
        s.active_author.as_deref() == Some("Ollie") && !s.custom_characters.is_empty()
    })
    .await;
    assert_eq!(names(&state.custom_characters), vec!["Hootie"]);

    store
        .add(&CollectionPath::characters(&jane), character("Sparkly"))
        .await?;
    store
        .add(&CollectionPath::characters(&ollie), character("Moonbeam"))
        .await?;
    let state = wait_for(&session, |s| s.custom_characters.len() == 2).await;
    assert_eq!(names(&state.custom_characters), vec!["Hootie", "Moonbeam"]);

    let available = state.available_characters();
    assert_eq!(available.len(), 6 + 2);
    assert!(available[..6].iter().all(|c| c.is_preset));

    session.set_active_author(None);
    let state = wait_for(&session, |s| s.active_author.is_none()).await;
    assert!(state.custom_characters.is_empty());
    assert!(session.active_author_id().is_none());
    Ok(())
}

#[tokio::test]
async fn interrupted_subscription_reports_once_and_keeps_last_data() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(StoreOptions::default()));
    let path = CollectionPath::book_requests();
    store
        .create(
            &path,
            "r1",
            fields(serde_json::json!({
                "authorName": "Jane Doe",
                "title": "Night Flight",
                "status": "pending",
                "pages": "[]",
            })),
        )
        .await?;

    let session = Session::start(store.clone(), Identity::anonymous(), None);
    wait_for(&session, |s| s.book_requests.len() == 1).await;

    store.interrupt(&path, "network unreachable");
    let state = wait_for(&session, |s| s.notice.is_some()).await;
    assert_eq!(state.notice, Some(Notice::ConnectionInterrupted));
    assert_eq!(state.book_requests.len(), 1);

    session.dismiss_notice();
    wait_for(&session, |s| s.notice.is_none()).await;
    Ok(())
}

#[tokio::test]
async fn unsubscribed_mirror_stops_delivering() -> anyhow::Result<()> {
    let store = MemoryStore::new(StoreOptions::default());
    let path = CollectionPath::book_requests();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<usize>();

    let handle = mirror::spawn(
        &store,
        path.clone(),
        BookRequest::from_document,
        tx,
        |requests: Vec<BookRequest>| requests.len(),
        |_, _| usize::MAX,
    );
    assert_eq!(rx.recv().await, Some(0));
    assert_eq!(handle.collection(), &path);

    handle.unsubscribe();
    store
        .add(
            &path,
            fields(serde_json::json!({ "authorName": "A", "title": "B", "status": "pending" })),
        )
        .await?;

    let rest = tokio::time::timeout(Duration::from_secs(5), async {
        let mut rest = Vec::new();
        while let Some(n) = rx.recv().await {
            rest.push(n);
        }
        rest
    })
    .await
    .expect("channel closes after unsubscribe");
    assert!(rest.is_empty(), "{rest:?}");
    Ok(())
}

#[tokio::test]
async fn mirror_ends_when_the_consumer_is_gone() -> anyhow::Result<()> {
    let store = MemoryStore::new(StoreOptions::default());
    let path = CollectionPath::authors();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<usize>();
    let handle = mirror::spawn(
        &store,
        path.clone(),
        cryptid::model::Author::from_document,
        tx,
        |authors: Vec<cryptid::model::Author>| authors.len(),
        |_, _| usize::MAX,
    );
    drop(rx);

    store
        .add(&path, fields(serde_json::json!({ "displayName": "x", "magicWord": "abcd" })))
        .await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while handle.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("mirror task finished");
    Ok(())
}

async fn wait_for_subscribers(store: &MemoryStore, path: &CollectionPath, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count(path) != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{path} never reached {count} subscriber(s)"));
}

#[tokio::test]
async fn closing_a_session_releases_every_subscription() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new(StoreOptions::default()));
    let jane = AuthorId::from_display_name("Jane Doe");
    let ollie = AuthorId::from_display_name("Ollie");
    let requests = CollectionPath::book_requests();
    let authors = CollectionPath::authors();
    let jane_characters = CollectionPath::characters(&jane);
    let ollie_characters = CollectionPath::characters(&ollie);

    let mut session = Session::start(store.clone(), Identity::anonymous(), Some("Jane Doe".into()));
    assert_eq!(store.subscriber_count(&requests), 1);
    assert_eq!(store.subscriber_count(&authors), 1);
    assert_eq!(store.subscriber_count(&jane_characters), 1);

    session.set_active_author(Some("Ollie".into()));
    wait_for_subscribers(&store, &jane_characters, 0).await;
    assert_eq!(store.subscriber_count(&ollie_characters), 1);

    session.shutdown();
    wait_for_subscribers(&store, &requests, 0).await;
    wait_for_subscribers(&store, &authors, 0).await;
    wait_for_subscribers(&store, &ollie_characters, 0).await;

    store.add(&ollie_characters, character("Hootie")).await?;
    assert_eq!(store.subscriber_count(&ollie_characters), 0);
    Ok(())
}
