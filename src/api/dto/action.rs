use crate::models::{Action, ActionParameter};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub id: String,
    pub title: String,
    pub description: String,
}

impl From<Action> for ActionResponse {
    fn from(action: Action) -> Self {
        Self {
            id: action.id,
            title: action.title,
            description: action.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActionDetailResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub arguments: Vec<ActionParameter>,
    pub options: Vec<ActionParameter>,
}

impl From<Action> for ActionDetailResponse {
    fn from(action: Action) -> Self {
        Self {
            id: action.id,
            title: action.title,
            description: action.description,
            arguments: action.arguments,
            options: action.options,
        }
    }
}
