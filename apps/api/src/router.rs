use std::sync::Arc;

use axum::{routing::get, Router};

use assistant_cell::router::assistant_routes;
use assistant_cell::DialogueService;

pub fn create_router(service: Arc<DialogueService>) -> Router {
    Router::new()
        .route("/", get(|| async { "Chatbot API is running!" }))
        .nest("/api/chatbot", assistant_routes(service))
}
