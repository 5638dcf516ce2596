use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers;
use crate::services::dialogue::DialogueService;

pub fn assistant_routes(service: Arc<DialogueService>) -> Router {
    Router::new()
        .route("/message", post(handlers::process_message))
        .route("/disponibilites", get(handlers::get_disponibilites))
        .route("/rendez-vous", post(handlers::book_rendez_vous))
        .route("/rendez-vous/{rdv_id}/annuler", patch(handlers::cancel_rendez_vous))
        .route("/cabinet/{cabinet_id}", get(handlers::get_cabinet))
        .with_state(service)
}
