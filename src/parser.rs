use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::db::RecipeStore;
use crate::format::format_recipe;
use crate::recipe::Recipe;

pub const NO_REPLY: &str = "Error getting reply.";

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("fenced json pattern is valid")
});

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("no JSON value found")]
    Empty,

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("{field}[{index}] is not a string")]
    NotAString { field: &'static str, index: usize },
}

/// What the user gets back for one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Telegram HTML, ready to send with `ParseMode::Html`.
    Recipe(String),
    /// Plain text error message.
    Failure(String),
}

/// The four fields a model response is expected to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecipe {
    pub title: String,
    pub description: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
}

impl ParsedRecipe {
    pub fn to_record(&self) -> Recipe {
        Recipe {
            id: 0,
            title: self.title.clone(),
            description: self.description.clone(),
            ingredients: self.ingredients.join("\n"),
            instructions: self.instructions.join("\n"),
        }
    }

    pub fn render(&self) -> String {
        format_recipe(
            &self.title,
            &self.description,
            &self.ingredients,
            &self.instructions,
        )
    }
}

pub struct Processed {
    pub reply: Reply,
    /// Background save of the parsed recipe. Dropping it detaches the task.
    pub saving: Option<JoinHandle<()>>,
}

/// Returns the object inside a ```json fence, or the whole text when there is none.
pub fn extract_json(text: &str) -> &str {
    match FENCED_JSON.captures(text).and_then(|caps| caps.get(1)) {
        Some(object) => object.as_str(),
        None => text,
    }
}

/// Reads the first JSON value of the response. Text after it is ignored, text before it is not.
pub fn parse_recipe(text: &str) -> Result<ParsedRecipe, ParseError> {
    let value = serde_json::Deserializer::from_str(extract_json(text))
        .into_iter::<Value>()
        .next()
        .ok_or(ParseError::Empty)??;
    let object = match value.as_object() {
        Some(object) => object,
        None => return Err(ParseError::NotAnObject(json_type(&value))),
    };

    Ok(ParsedRecipe {
        title: string_field(object, "Title", "No title"),
        description: string_field(object, "Description", ""),
        ingredients: string_list(object, "Ingredients")?,
        instructions: string_list(object, "Instructions")?,
    })
}

fn string_field(object: &Map<String, Value>, field: &str, default: &str) -> String {
    object
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn string_list(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, ParseError> {
    let items = match object.get(field).and_then(Value::as_array) {
        Some(items) => items,
        None => return Ok(Vec::new()),
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| match item.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(ParseError::NotAString { field, index }),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Turns a raw model response into a reply, saving the recipe on the side.
///
/// `None` means the request itself failed. The save is spawned on the current runtime
/// and its outcome never changes the reply.
pub fn process_response(response: Option<&str>, store: &RecipeStore) -> Processed {
    let Some(text) = response else {
        return Processed {
            reply: Reply::Failure(NO_REPLY.to_string()),
            saving: None,
        };
    };

    let parsed = match parse_recipe(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::error!("JSON parsing error: {e}");
            return Processed {
                reply: Reply::Failure(format!("JSON parsing error: {e}")),
                saving: None,
            };
        }
    };

    let record = parsed.to_record();
    let store = store.clone();
    let saving = tokio::spawn(async move {
        let title = record.title.clone();
        match store.insert(record).await {
            Ok(id) => log::debug!("Recipe saved to DB as #{id}: {title}"),
            Err(e) => log::error!("Error saving recipe to DB: {e}"),
        }
    });

    Processed {
        reply: Reply::Recipe(parsed.render()),
        saving: Some(saving),
    }
}
