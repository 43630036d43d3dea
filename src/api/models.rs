use serde::{Deserialize, Serialize};

use crate::models::{FoodItem, MealPlan};

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct CrawlStatusResponse {
    pub is_running: bool,
}

#[derive(Serialize)]
pub struct CrawlResultsResponse {
    pub items: Vec<FoodItem>,
}

#[derive(Serialize)]
pub struct OperationStatusResponse {
    pub operation_type: String,
    pub is_done: bool,
}

#[derive(Deserialize)]
pub struct UpdateMealPlanRequest {
    pub meal_plan: MealPlan,
}
