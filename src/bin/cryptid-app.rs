use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use base64::Engine as _;
use clap::Parser;
use futures::Stream;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use cryptid::app::notice::Notice;
use cryptid::app::publish::{DraftingBook, PublishOutcome};
use cryptid::app::session::Session;
use cryptid::app::state::AppState;
use cryptid::app::{accounts, library, publish};
use cryptid::config::AppConfig;
use cryptid::genai::GenAiClient;
use cryptid::identity::Identity;
use cryptid::mirror;
use cryptid::model::{Author, AuthorId, BookRequest, Character, Page, preset_characters};
use cryptid::store::memory::MemoryStore;
use cryptid::store::{CollectionPath, Document, DocumentStore};

const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Where the document store keeps its JSON files.
    #[arg(long, default_value = "workspace-app")]
    data_dir: PathBuf,

    /// Static web assets directory (serve if exists).
    #[arg(long, default_value = "web/dist")]
    web_dir: PathBuf,
}

#[derive(Clone)]
struct ServerState {
    store: Arc<dyn DocumentStore>,
    genai: GenAiClient,
    admin_secret: Option<Arc<str>>,
    /// Author-less session backing the shared projections.
    library: Arc<Session>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    cryptid::logging::init_with_default(cryptid::logging::SERVER_FILTER)?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting cryptid-app");

    let config = AppConfig::from_env()?;
    if config.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; generation calls will be rejected upstream");
    }
    if config.admin_secret.is_none() {
        tracing::info!("CRYPTID_ADMIN_SECRET is not set; admin routes are disabled");
    }

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::open(
        config.store_options(Some(args.data_dir.clone())),
    )?);
    let identity = Identity::sign_in(None)?;
    let library = Arc::new(Session::start(Arc::clone(&store), identity, None));

    let state = ServerState {
        store,
        genai: config.genai_client()?,
        admin_secret: config.admin_secret.as_deref().map(Arc::from),
        library,
    };

    let mut app = router(state);

    let web_index = args.web_dir.join("index.html");
    if web_index.exists() {
        let static_files = ServeDir::new(args.web_dir).not_found_service(ServeFile::new(web_index));
        app = app.fallback_service(static_files);
    } else {
        app = app.fallback(|| async {
            Html(
                r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>Cryptid Creators</title></head>
  <body>
    <h1>Cryptid Creators</h1>
    <p>web assets not found. Build the web app into <code>web/dist</code> or run a dev server.</p>
  </body>
</html>
"#,
            )
        });
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/accounts/register", post(register))
        .route("/accounts/login", post(login))
        .route("/gallery", get(gallery))
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/:request_id/book.pdf", get(download_pdf))
        .route("/plot", post(suggest_plot))
        .route(
            "/authors/:author/characters",
            get(list_characters).post(save_character),
        )
        .route(
            "/authors/:author/characters/:character_id",
            delete(delete_character),
        )
        .route("/events", get(events))
        .route("/admin/requests", get(admin_requests))
        .route("/admin/authors", get(admin_authors))
        .route("/admin/requests/:request_id/draft", post(admin_draft))
        .route("/admin/requests/:request_id/illustrate", post(admin_illustrate))
        .route("/admin/requests/:request_id/publish", post(admin_publish))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

enum ApiError {
    Notice(Notice),
    Status(StatusCode),
}

impl From<Notice> for ApiError {
    fn from(notice: Notice) -> Self {
        Self::Notice(notice)
    }
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        Self::Status(status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Notice(notice) => (
                notice_status(notice),
                Json(serde_json::json!({ "code": notice, "message": notice.message() })),
            )
                .into_response(),
            Self::Status(status) => status.into_response(),
        }
    }
}

fn notice_status(notice: Notice) -> StatusCode {
    match notice {
        Notice::FieldsTooShort
        | Notice::MissingStoryDetails
        | Notice::CharacterIncomplete
        | Notice::NothingToPublish => StatusCode::BAD_REQUEST,
        Notice::IncorrectLogin | Notice::NotSignedIn => StatusCode::UNAUTHORIZED,
        Notice::NameTaken | Notice::AlreadyPublished => StatusCode::CONFLICT,
        Notice::QuillRanDry | Notice::DraftingFailed => StatusCode::BAD_GATEWAY,
        Notice::TooLargeForGallery => StatusCode::PAYLOAD_TOO_LARGE,
        Notice::DoorStuck
        | Notice::RequestNotSent
        | Notice::CharacterNotSaved
        | Notice::CharacterNotDeleted
        | Notice::PublishFailed
        | Notice::ConnectionInterrupted => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn require_admin(state: &ServerState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = state.admin_secret.as_deref() else {
        return Err(StatusCode::NOT_FOUND.into());
    };
    let provided = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided != Some(secret) {
        tracing::warn!("admin request with a wrong secret");
        return Err(StatusCode::UNAUTHORIZED.into());
    }
    Ok(())
}

fn identity_from(headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    Identity::sign_in(token).map_err(|err| {
        tracing::warn!(error = %err, "rejecting identity token");
        ApiError::Status(StatusCode::UNAUTHORIZED)
    })
}

async fn load_request(store: &dyn DocumentStore, request_id: &str) -> Result<BookRequest, ApiError> {
    let fields = store
        .get(&CollectionPath::book_requests(), request_id)
        .await
        .map_err(|err| {
            tracing::error!(request_id, error = %err, "load request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    BookRequest::from_document(&Document {
        id: request_id.to_string(),
        fields,
    })
    .ok_or(ApiError::Status(StatusCode::UNPROCESSABLE_ENTITY))
}

/// Signed-in authors only; the path segment may be a display name or an id.
async fn existing_author(store: &dyn DocumentStore, author: &str) -> Result<AuthorId, ApiError> {
    let author_id = AuthorId::from_display_name(author);
    match store.get(&CollectionPath::authors(), author_id.as_str()).await {
        Ok(Some(_)) => Ok(author_id),
        Ok(None) => Err(Notice::NotSignedIn.into()),
        Err(err) => {
            tracing::error!(author = %author_id, error = %err, "author lookup failed");
            Err(Notice::DoorStuck.into())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credentials {
    display_name: String,
    magic_word: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorView {
    id: AuthorId,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Author> for AuthorView {
    fn from(author: Author) -> Self {
        Self {
            id: author.id,
            display_name: author.display_name,
            created_at: author.created_at,
        }
    }
}

async fn register(
    State(state): State<ServerState>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<AuthorView>), ApiError> {
    let author = accounts::register(state.store.as_ref(), &body.display_name, &body.magic_word).await?;
    Ok((StatusCode::CREATED, Json(author.into())))
}

async fn login(
    State(state): State<ServerState>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthorView>, ApiError> {
    let author = accounts::login(state.store.as_ref(), &body.display_name, &body.magic_word).await?;
    Ok(Json(author.into()))
}

async fn gallery(State(state): State<ServerState>) -> Json<Vec<BookRequest>> {
    let current = state.library.state();
    Json(current.published_books().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct AuthorQuery {
    author: Option<String>,
}

async fn list_requests(
    State(state): State<ServerState>,
    Query(q): Query<AuthorQuery>,
) -> Result<Json<Vec<BookRequest>>, ApiError> {
    let author = q
        .author
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or(Notice::NotSignedIn)?;
    let current = state.library.state();
    Ok(Json(
        current
            .book_requests
            .iter()
            .filter(|r| r.author_name == author)
            .cloned()
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewRequest {
    #[serde(default)]
    author_name: String,
    #[serde(flatten)]
    form: library::StoryForm,
}

async fn create_request(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let identity = identity_from(&headers)?;
    let id = library::submit_request(state.store.as_ref(), &identity, &body.author_name, body.form)
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn suggest_plot(
    State(state): State<ServerState>,
    Json(form): Json<library::StoryForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let synopsis = library::suggest_plot(&state.genai, &form).await?;
    Ok(Json(serde_json::json!({ "synopsis": synopsis })))
}

async fn list_characters(
    State(state): State<ServerState>,
    Path(author): Path<String>,
) -> Result<Json<Vec<Character>>, ApiError> {
    let author_id = existing_author(state.store.as_ref(), &author).await?;
    let mut snapshots = mirror::records(
        state.store.as_ref(),
        &CollectionPath::characters(&author_id),
        Character::from_document,
    );
    let custom = match snapshots.next().await {
        Some(Ok(characters)) => characters,
        Some(Err(err)) => {
            tracing::error!(author = %author_id, error = %err, "character snapshot failed");
            return Err(Notice::ConnectionInterrupted.into());
        }
        None => Vec::new(),
    };
    let mut characters = preset_characters();
    characters.extend(custom);
    Ok(Json(characters))
}

async fn save_character(
    State(state): State<ServerState>,
    Path(author): Path<String>,
    Json(body): Json<library::NewCharacter>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let author_id = existing_author(state.store.as_ref(), &author).await?;
    let id = library::save_character(state.store.as_ref(), &author_id, body).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn delete_character(
    State(state): State<ServerState>,
    Path((author, character_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let author_id = existing_author(state.store.as_ref(), &author).await?;
    library::delete_character(state.store.as_ref(), &author_id, &character_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// What a connected client sees. Account secrets never leave the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientView {
    active_author: Option<String>,
    gallery: Vec<BookRequest>,
    my_requests: Vec<BookRequest>,
    characters: Vec<Character>,
    notice: Option<Notice>,
    message: Option<String>,
}

impl ClientView {
    fn of(state: &AppState) -> Self {
        Self {
            active_author: state.active_author.clone(),
            gallery: state.published_books().cloned().collect(),
            my_requests: state.user_requests().cloned().collect(),
            characters: state.available_characters(),
            notice: state.notice,
            message: state.notice.map(|n| n.message()),
        }
    }
}

/// Streams the client view on every change. The per-connection session is
/// torn down when the client disconnects.
async fn events(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(q): Query<AuthorQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let identity = identity_from(&headers)?;
    let session = Session::start(Arc::clone(&state.store), identity, q.author);
    let updates = session.watch();

    let stream = futures::stream::unfold(
        (session, updates, true),
        |(session, mut updates, first)| async move {
            if !first && updates.changed().await.is_err() {
                session.shutdown();
                return None;
            }
            let view = ClientView::of(&updates.borrow_and_update());
            let event = Event::default()
                .event("state")
                .json_data(&view)
                .unwrap_or_else(|err| {
                    tracing::error!(error = %err, "encode client view");
                    Event::default().event("error")
                });
            Some((Ok(event), (session, updates, false)))
        },
    );
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn admin_requests(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookRequest>>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(newest_first(state.library.state().book_requests)))
}

/// Undated requests go last.
fn newest_first(mut requests: Vec<BookRequest>) -> Vec<BookRequest> {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    requests
}

async fn admin_authors(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AuthorView>>, ApiError> {
    require_admin(&state, &headers)?;
    let authors = state.library.state().authors;
    Ok(Json(authors.into_iter().map(AuthorView::from).collect()))
}

async fn admin_draft(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    let request = load_request(state.store.as_ref(), &request_id).await?;
    let draft = publish::start_drafting(&state.genai, &request).await?;
    Ok(Json(serde_json::json!({ "pages": draft.pages })))
}

#[derive(Debug, Deserialize)]
struct IllustrateBody {
    pages: Vec<Page>,
    /// 0-based.
    page: usize,
}

async fn admin_illustrate(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<IllustrateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;
    let request = load_request(state.store.as_ref(), &request_id).await?;
    if body.page >= body.pages.len() {
        return Err(StatusCode::BAD_REQUEST.into());
    }
    let mut draft = DraftingBook::resume(request, body.pages)?;
    let illustrated = publish::illustrate_page(&state.genai, &mut draft, body.page).await;
    Ok(Json(serde_json::json!({
        "illustrated": illustrated,
        "pages": draft.pages,
    })))
}

#[derive(Debug, Deserialize)]
struct PublishBody {
    pages: Vec<Page>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishView {
    outcome: &'static str,
    notice: Option<Notice>,
    message: Option<String>,
    filename: Option<String>,
    pdf_base64: Option<String>,
}

async fn admin_publish(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<PublishBody>,
) -> Result<Json<PublishView>, ApiError> {
    require_admin(&state, &headers)?;
    let request = load_request(state.store.as_ref(), &request_id).await?;
    let draft = DraftingBook::resume(request, body.pages)?;

    let outcome = publish::publish(state.store.as_ref(), &draft).await;
    let label = match &outcome {
        PublishOutcome::Published { .. } => "published",
        PublishOutcome::PartiallyPublished { .. } => "partially_published",
        PublishOutcome::Failed { notice } => return Err((*notice).into()),
    };
    let artifact = outcome.artifact();
    Ok(Json(PublishView {
        outcome: label,
        notice: outcome.notice(),
        message: outcome.notice().map(|n| n.message()),
        filename: artifact.map(|a| a.filename.clone()),
        pdf_base64: artifact.map(|a| base64::engine::general_purpose::STANDARD.encode(&a.bytes)),
    }))
}

async fn download_pdf(
    State(state): State<ServerState>,
    Path(request_id): Path<String>,
) -> Result<Response, ApiError> {
    let request = load_request(state.store.as_ref(), &request_id).await?;
    if !request.is_ready() {
        return Err(StatusCode::CONFLICT.into());
    }
    if request.pages.is_empty() {
        return Err(StatusCode::NOT_FOUND.into());
    }
    let pages = request.pages.clone();
    let artifact = publish::render_artifact(&DraftingBook { request, pages })
        .await
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut resp = Response::new(axum::body::Body::from(artifact.bytes));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    resp.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", artifact.filename))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    Ok(resp)
}
