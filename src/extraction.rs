//! Schema-constrained extraction on top of an [`Extractor`].
//!
//! The text path never fails: a missing credential, a vendor error or an
//! unparseable response all come back as an empty list, logged with the
//! cause. The media path reports those conditions to its caller instead.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::{AppError, Result};
use crate::llm::{Extractor, GenerationRequest, InlineMedia};
use crate::models::{ExtractedFood, FoodItem, MealPlan};

/// Output shapes the model can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSchema {
    FoodItems,
    MealPlan,
}

impl TargetSchema {
    pub fn response_schema(self) -> Value {
        match self {
            TargetSchema::FoodItems => json!({
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": {"type": "STRING"},
                        "description": {"type": "STRING"},
                        "price": {"type": "STRING"},
                        "quantity": {"type": "STRING"}
                    },
                    "required": ["name", "description", "price", "quantity"]
                }
            }),
            TargetSchema::MealPlan => {
                let ingredient = json!({
                    "type": "OBJECT",
                    "properties": {
                        "name": {"type": "STRING"},
                        "quantity": {"type": "NUMBER"},
                        "unit": {"type": "STRING"}
                    },
                    "required": ["name", "quantity", "unit"]
                });
                json!({
                    "type": "OBJECT",
                    "properties": {
                        "shopping_list": {
                            "type": "OBJECT",
                            "properties": {
                                "items": {"type": "ARRAY", "items": ingredient}
                            },
                            "required": ["items"]
                        },
                        "recipes": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "name": {"type": "STRING"},
                                    "ingredients": {"type": "ARRAY", "items": ingredient},
                                    "instructions": {"type": "ARRAY", "items": {"type": "STRING"}}
                                },
                                "required": ["name", "ingredients", "instructions"]
                            }
                        },
                        "days": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "day": {"type": "STRING"},
                                    "meal": {"type": "STRING", "nullable": true},
                                    "recipe_refs": {"type": "ARRAY", "items": {"type": "STRING"}}
                                },
                                "required": ["day", "recipe_refs"]
                            }
                        }
                    },
                    "required": ["shopping_list", "recipes", "days"]
                })
            }
        }
    }
}

pub const MEAL_PLAN_PROMPT: &str = "Analyze this video showing food items and create a simple meal plan.

Based on the food items visible in the video, generate:
1. ONE meal per day for each day of the week (Monday to Sunday)
2. For each meal, provide a simple recipe with ingredients list and basic instructions
3. A shopping list with any additional ingredients needed that weren't shown in the video

Keep everything simple and straightforward.";

/// Unit and container terms the extractor must translate, in prompt order.
pub const UNIT_TRANSLATIONS: &[(&str, &str)] = &[
    ("g", "grams"),
    ("kg", "kilograms"),
    ("ml", "milliliters"),
    ("l", "liters"),
    ("Stück", "piece (or \"pieces\" when plural)"),
    ("Packung", "pack"),
    ("Flasche", "bottle"),
    ("Dose", "can"),
];

pub fn build_food_prompt(page_text: &str) -> String {
    let mut conversions = String::new();
    for (from, to) in UNIT_TRANSLATIONS {
        conversions.push_str(&format!("- \"{}\" -> \"{}\"\n", from, to));
    }

    let mut result = String::with_capacity(page_text.len() + 2048);
    result.push_str(
        "Given the following TEXT, identify food items along with their details.

For each food item, extract the following fields:
- name: The exact name of the product as listed.
- description: A description that clearly explains what the product is. Translate it into English, keeping brand names and product names exactly as written.
- price: The price of the product in EUR.
- quantity: The quantity or size information if available, with German units and quantity terms converted to English.

Apply these conversions in the quantity field (and in the description where applicable):
",
    );
    result.push_str(&conversions);
    result.push_str(
        "
Ensure that:
- All units and quantity terms are fully converted to their English equivalents.
- The description never uses vague or generic terms such as \"Various kinds\" or \"Verschiedene Sorten\". State concretely what the product is, for example whether \"GAZI Grill- und Pfannenkäse\" is a processed cheese or a grillable cheese.
- The output is a JSON array of objects following the response schema.

Example:
[{\"name\": \"Rittersport\", \"description\": \"A milk chocolate bar with a smooth texture\", \"price\": \"2.99 EUR\", \"quantity\": \"100 grams\"}]

TEXT:
",
    );
    result.push_str(page_text);
    result
}

static METRIC_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d)\s*(kg|ml|g|l)\b").expect("Failed to compile unit pattern")
});

static CONTAINER_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(\d+)\s*)?\b(Stück|Packungen|Packung|Flaschen|Flasche|Dosen|Dose)\b")
        .expect("Failed to compile container pattern")
});

/// Apply the unit/container translation table to a free-text field.
///
/// Metric units are only rewritten after a number so that words such as
/// "l" in prose stay untouched.
pub fn normalize_units(text: &str) -> String {
    let metric = METRIC_UNIT.replace_all(text, |caps: &Captures| {
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "kg" => "kilograms",
            "ml" => "milliliters",
            "g" => "grams",
            _ => "liters",
        };
        format!("{} {}", &caps[1], unit)
    });

    CONTAINER_TERM
        .replace_all(&metric, |caps: &Captures| {
            let count = caps.get(1).map(|m| m.as_str());
            let term = &caps[2];
            let plural = count.is_some_and(|c| c.trim_start_matches('0') != "1")
                || matches!(term, "Packungen" | "Flaschen" | "Dosen");
            let english = match term {
                "Packung" | "Packungen" => ("pack", "packs"),
                "Flasche" | "Flaschen" => ("bottle", "bottles"),
                "Dose" | "Dosen" => ("can", "cans"),
                _ => ("piece", "pieces"),
            };
            let word = if plural { english.1 } else { english.0 };
            match count {
                Some(c) => format!("{} {}", c, word),
                None => word.to_string(),
            }
        })
        .into_owned()
}

/// Facade over an optional vendor; `None` models "no credential configured".
#[derive(Clone)]
pub struct ExtractionClient {
    extractor: Option<Arc<dyn Extractor>>,
}

impl ExtractionClient {
    pub fn new(extractor: Option<Arc<dyn Extractor>>) -> Self {
        Self { extractor }
    }

    pub fn disabled() -> Self {
        Self { extractor: None }
    }

    pub fn is_configured(&self) -> bool {
        self.extractor.is_some()
    }

    /// Extract food listings from page text. Never fails.
    pub async fn extract_food_items(&self, source_url: &str, page_text: &str) -> Vec<FoodItem> {
        let Some(extractor) = &self.extractor else {
            warn!(url = %source_url, "no extraction credential configured, skipping page");
            return Vec::new();
        };

        let request = GenerationRequest {
            prompt: build_food_prompt(page_text),
            media: None,
            schema: TargetSchema::FoodItems.response_schema(),
        };

        let value = match extractor.generate(&request).await {
            Ok(value) => value,
            Err(e) => {
                error!(url = %source_url, error = %e, "food extraction failed");
                return Vec::new();
            }
        };

        let extracted: Vec<ExtractedFood> = match serde_json::from_value(value) {
            Ok(items) => items,
            Err(e) => {
                error!(url = %source_url, error = %e, "extraction response does not match schema");
                return Vec::new();
            }
        };

        debug!(url = %source_url, count = extracted.len(), "extracted food items");
        extracted
            .into_iter()
            .map(|food| {
                let mut item = food.into_item(source_url);
                item.quantity = normalize_units(&item.quantity);
                item.description = normalize_units(&item.description);
                item
            })
            .collect()
    }

    /// Turn a video into a weekly meal plan.
    pub async fn analyze_media(&self, data: Vec<u8>, mime_type: &str) -> Result<MealPlan> {
        let extractor = self.extractor.as_ref().ok_or(AppError::MissingCredential)?;

        let request = GenerationRequest {
            prompt: MEAL_PLAN_PROMPT.to_string(),
            media: Some(InlineMedia {
                mime_type: mime_type.to_string(),
                data,
            }),
            schema: TargetSchema::MealPlan.response_schema(),
        };

        let value = extractor.generate(&request).await.map_err(|e| match e {
            AppError::LlmError(msg) => AppError::LlmError(msg),
            other => AppError::LlmError(other.to_string()),
        })?;

        serde_json::from_value(value)
            .map_err(|e| AppError::LlmError(format!("Meal plan does not match schema: {}", e)))
    }
}
