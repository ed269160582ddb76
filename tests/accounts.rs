use cryptid::app::accounts;
use cryptid::app::library::{self, NewCharacter};
use cryptid::app::notice::Notice;
use cryptid::model::AuthorId;
use cryptid::store::memory::{MemoryStore, StoreOptions};
use cryptid::store::{CollectionPath, DocumentStore};

#[tokio::test]
async fn names_that_normalize_alike_are_taken() {
    let store = MemoryStore::new(StoreOptions::default());

    let author = accounts::register(&store, "Jane Doe", "moonbeam")
        .await
        .expect("first registration");
    assert_eq!(author.id.as_str(), "jane-doe");
    assert_eq!(author.display_name, "Jane Doe");

    assert_eq!(
        accounts::register(&store, "jane   doe", "other-word").await,
        Err(Notice::NameTaken)
    );
    assert_eq!(
        accounts::register(&store, " JANE DOE ", "other-word").await,
        Err(Notice::NameTaken)
    );
}

#[tokio::test]
async fn short_fields_are_rejected_before_the_store() {
    let store = MemoryStore::new(StoreOptions::default());
    assert_eq!(
        accounts::register(&store, "Jane", "abc").await,
        Err(Notice::FieldsTooShort)
    );
    assert_eq!(
        accounts::register(&store, "   ", "abcd").await,
        Err(Notice::FieldsTooShort)
    );
    assert_eq!(
        accounts::login(&store, "Jane", "abc").await,
        Err(Notice::FieldsTooShort)
    );
}

#[tokio::test]
async fn login_checks_the_magic_word() {
    let store = MemoryStore::new(StoreOptions::default());
    accounts::register(&store, "Ollie Owl", "hoothoot")
        .await
        .expect("register");

    let author = accounts::login(&store, "ollie owl", "hoothoot")
        .await
        .expect("login");
    assert_eq!(author.display_name, "Ollie Owl");

    assert_eq!(
        accounts::login(&store, "Ollie Owl", "wrong-word").await,
        Err(Notice::IncorrectLogin)
    );
    assert_eq!(
        accounts::login(&store, "Nobody Here", "hoothoot").await,
        Err(Notice::IncorrectLogin)
    );
}

#[tokio::test]
async fn character_lab_saves_and_releases_creatures() -> anyhow::Result<()> {
    let store = MemoryStore::new(StoreOptions::default());
    let author = AuthorId::from_display_name("Jane Doe");

    assert_eq!(
        library::save_character(
            &store,
            &author,
            NewCharacter {
                name: "Glimmer".to_owned(),
                image: None,
            },
        )
        .await,
        Err(Notice::CharacterIncomplete)
    );
    assert_eq!(
        library::save_character(
            &store,
            &author,
            NewCharacter {
                name: "  ".to_owned(),
                image: Some("data:image/png;base64,AAAA".to_owned()),
            },
        )
        .await,
        Err(Notice::CharacterIncomplete)
    );

    let id = library::save_character(
        &store,
        &author,
        NewCharacter {
            name: "Glimmer".to_owned(),
            image: Some("data:image/png;base64,AAAA".to_owned()),
        },
    )
    .await
    .map_err(|notice| anyhow::anyhow!("{notice}"))?;

    let path = CollectionPath::characters(&author);
    let stored = store.get(&path, &id).await?.expect("saved");
    assert_eq!(stored.get("icon").and_then(|v| v.as_str()), Some("🎨"));
    assert!(stored.get("createdAt").is_some());

    library::delete_character(&store, &author, &id)
        .await
        .map_err(|notice| anyhow::anyhow!("{notice}"))?;
    assert!(store.get(&path, &id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn character_files_stay_inside_the_data_dir() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = MemoryStore::open(StoreOptions {
        persist_dir: Some(temp.path().join("data")),
        ..StoreOptions::default()
    })?;

    let author = accounts::register(&store, "../../../../../../escaped", "abcd")
        .await
        .map_err(|notice| anyhow::anyhow!("{notice}"))?;
    assert_eq!(
        library::save_character(
            &store,
            &author.id,
            NewCharacter {
                name: "Glimmer".to_owned(),
                image: Some("data:image/png;base64,AAAA".to_owned()),
            },
        )
        .await,
        Err(Notice::CharacterNotSaved)
    );
    assert!(!temp.path().join("escaped").exists());
    Ok(())
}
