use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, error::panic_response, state::AppState};

pub mod auth;
pub mod blog;
pub mod companies;
pub mod documents;
pub mod health;
pub mod leaves;
pub mod notifications;
pub mod projects;
pub mod users;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let protected_auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/me/push-token", put(users::update_push_token))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let companies_routes = Router::new()
        .route("/", post(companies::create_company))
        .route(
            "/current",
            get(companies::get_current_company).put(companies::update_current_company),
        );

    let projects_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project).put(projects::update_project),
        )
        .route("/:id/users", post(projects::add_project_member))
        .route(
            "/:id/users/:user_id",
            delete(projects::remove_project_member),
        );

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/file", get(documents::download_document))
        .route("/:id/sign", post(documents::sign_document))
        .route("/:id/signatures", get(documents::list_document_signatures));

    let leaves_routes = Router::new()
        .route("/", get(leaves::list_leaves).post(leaves::submit_leave))
        .route("/:id/approve", put(leaves::approve_leave))
        .route("/:id/reject", put(leaves::reject_leave));

    let notifications_routes = Router::new()
        .route(
            "/",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route(
            "/scheduled",
            get(notifications::list_scheduled_notifications),
        )
        .route(
            "/scheduled/:id",
            delete(notifications::cancel_scheduled_notification),
        )
        .route("/:id/read", put(notifications::mark_notification_read));

    let blog_routes = Router::new()
        .route("/", get(blog::list_posts).post(blog::create_post))
        .route(
            "/:id",
            get(blog::get_post)
                .put(blog::update_post)
                .delete(blog::delete_post),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/auth", protected_auth_routes)
        .nest("/users", users_routes)
        .nest("/companies", companies_routes)
        .nest("/projects", projects_routes)
        .nest("/documents", documents_routes)
        .nest("/leaves", leaves_routes)
        .nest("/notifications", notifications_routes)
        .nest("/blog", blog_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/auth/login", post(auth::login))
        .route(
            "/auth/reset-password-request",
            post(auth::request_password_reset),
        )
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}
