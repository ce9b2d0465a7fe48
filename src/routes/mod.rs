pub mod auth;
pub mod feed;
pub mod identity;
pub mod media;
pub mod posts;
pub mod users;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::basic::require_basic_auth;
use crate::state::AppState;

/// The full application router.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::router())
        .merge(posts::router())
        .merge(feed::router())
        .merge(users::router())
        .merge(media::router(state.config.media.max_bytes))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    let mut app = Router::new()
        .nest("/api", api)
        .route("/media/{*path}", get(media::serve));

    if state.local_identity.is_some() {
        app = app.merge(identity::router());
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
