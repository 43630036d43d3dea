use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A food listing extracted from a crawled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodItem {
    pub source_url: String,
    pub name: String,
    pub description: String,
    pub price: String,
    pub quantity: String,
}

/// The shape the model returns per item; `source_url` is attached afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFood {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub quantity: String,
}

impl ExtractedFood {
    pub fn into_item(self, source_url: &str) -> FoodItem {
        FoodItem {
            source_url: source_url.to_string(),
            name: self.name,
            description: self.description,
            price: self.price,
            quantity: self.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub ingredients: Vec<Ingredient>,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingList {
    pub items: Vec<Ingredient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMeal {
    /// Monday, Tuesday, ...
    pub day: String,
    #[serde(default)]
    pub meal: Option<String>,
    #[serde(default)]
    pub recipe_refs: Vec<String>,
}

/// Weekly meal plan produced from a video of food items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub shopping_list: ShoppingList,
    pub recipes: Vec<Recipe>,
    #[serde(default)]
    pub days: Vec<DayMeal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAnalysis {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub prompt_used: String,
    pub structured_result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub operation_type: String,
    pub is_done: bool,
    pub updated_at: DateTime<Utc>,
}
