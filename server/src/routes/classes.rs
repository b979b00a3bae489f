//! Class listing endpoint

use axum::{extract::State, Json};
use food_core::{food_classes, FoodClass};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct ClassesResponse {
    pub classes: Vec<FoodClass>,
}

/// GET /classes - Every configured class, in model output order
pub async fn list_classes(State(state): State<SharedState>) -> Json<ClassesResponse> {
    Json(ClassesResponse {
        classes: food_classes(&state.config.classes),
    })
}
