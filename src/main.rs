use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use backend::{
    AppState,
    chat,
    config::Config,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit},
    routes,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client.clone());

    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc,
        rooms: chat::RoomRegistry::new(),
    };

    let rate_limiter = Arc::new(RateLimiter::new(redis_client, config.clone()));

    let public_routes = Router::new()
        .route("/users/register", post(routes::user::register))
        .route("/users/login", post(routes::user::login));

    let protected_routes = Router::new()
        .route("/users/profile", get(routes::user::get_profile))
        .route("/users/update-profile", put(routes::user::update_profile))
        .route("/groups/create", post(routes::group::create_group))
        .route("/groups/by-id", get(routes::group::find_by_id))
        .route("/groups/by-name", get(routes::group::find_by_name))
        .route(
            "/groups/toggle-membership",
            post(routes::group::toggle_membership),
        )
        .route("/groups/{group_id}/members", get(routes::group::list_members))
        .route(
            "/groups/{group_id}/messages",
            get(routes::message::get_group_messages).post(routes::message::send_group_message),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // The WebSocket endpoint authenticates via query token inside the
    // handler, outside the Bearer middleware.
    let ws_routes = Router::new().route("/chat/ws", get(chat::ws_handler));

    let router = Router::new().nest(
        &config.api_base_uri.clone(),
        Router::new()
            .merge(public_routes)
            .merge(protected_routes)
            .merge(ws_routes),
    );

    let router = router.layer(axum::middleware::from_fn(log_errors)).layer(
        axum::middleware::from_fn_with_state(rate_limiter, rate_limit),
    );

    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        let cors = CorsLayer::permissive();
        router.layer(cors)
    };

    let app = router.with_state(state.clone());

    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
