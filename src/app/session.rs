use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::app::notice::Notice;
use crate::app::state::{AppState, Message, update};
use crate::identity::Identity;
use crate::mirror::{self, MirrorHandle};
use crate::model::{Author, AuthorId, BookRequest, Character};
use crate::store::{CollectionPath, DocumentStore};

/// One signed-in client: the live mirrors plus the update loop that folds
/// their messages into [`AppState`].
///
/// Must be started inside a tokio runtime. Dropping the session tears down
/// every subscription.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    identity: Identity,
    messages: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<AppState>,
    _requests: MirrorHandle,
    _authors: MirrorHandle,
    author: Option<AuthorId>,
    characters: Option<MirrorHandle>,
    event_loop: JoinHandle<()>,
}

impl Session {
    pub fn start(
        store: Arc<dyn DocumentStore>,
        identity: Identity,
        active_author: Option<String>,
    ) -> Self {
        let (messages, mut inbox) = mpsc::unbounded_channel::<Message>();
        let (state_tx, state) = watch::channel(AppState::default());

        let event_loop = tokio::spawn(async move {
            let mut current = AppState::default();
            while let Some(message) = inbox.recv().await {
                update(&mut current, message);
                state_tx.send_replace(current.clone());
            }
        });

        let requests = mirror::spawn(
            store.as_ref(),
            CollectionPath::book_requests(),
            BookRequest::from_document,
            messages.clone(),
            Message::BookRequests,
            subscription_failed,
        );
        let authors = mirror::spawn(
            store.as_ref(),
            CollectionPath::authors(),
            Author::from_document,
            messages.clone(),
            Message::Authors,
            subscription_failed,
        );

        tracing::info!(uid = identity.uid(), "session started");
        let mut session = Self {
            store,
            identity,
            messages,
            state,
            _requests: requests,
            _authors: authors,
            author: None,
            characters: None,
            event_loop,
        };
        session.set_active_author(active_author);
        session
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Latest folded state.
    pub fn state(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AppState> {
        self.state.clone()
    }

    pub fn notify(&self, notice: Notice) {
        let _ = self.messages.send(Message::Notify(notice));
    }

    pub fn dismiss_notice(&self) {
        let _ = self.messages.send(Message::DismissNotice);
    }

    pub fn active_author_id(&self) -> Option<&AuthorId> {
        self.author.as_ref()
    }

    /// Switches the signed-in author. The character subscription of the
    /// previous author is dropped before the new one is opened.
    pub fn set_active_author(&mut self, author: Option<String>) {
        let author = author
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let author_id = author.as_deref().map(AuthorId::from_display_name);
        if author_id.is_some()
            && author_id == self.author
            && self.characters.as_ref().is_some_and(MirrorHandle::is_active)
        {
            return;
        }

        if let Some(previous) = self.characters.take() {
            previous.unsubscribe();
        }
        self.author = author_id.clone();
        let _ = self.messages.send(Message::AuthorChanged(author));

        let Some(author_id) = author_id else {
            tracing::info!("signed out");
            return;
        };
        tracing::info!(author = %author_id, "active author changed");

        let owner = author_id.clone();
        self.characters = Some(mirror::spawn(
            self.store.as_ref(),
            CollectionPath::characters(&author_id),
            Character::from_document,
            self.messages.clone(),
            move |characters| Message::Characters {
                author: owner.clone(),
                characters,
            },
            subscription_failed,
        ));
    }

    pub fn shutdown(self) {
        tracing::info!(uid = self.identity.uid(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

fn subscription_failed(collection: &CollectionPath, _err: crate::store::StoreError) -> Message {
    Message::SubscriptionFailed {
        collection: collection.clone(),
    }
}
