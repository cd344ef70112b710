//! `/api` route handlers.

use axum::{
    Form, Json,
    extract::{FromRequest, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::color::{BLUE, ColorValue, GREEN, RED};
use crate::devices::Device;
use crate::web::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Completed,
    Failed,
}

/// The `{message, updated, status}` envelope every mutating route answers with.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<Vec<&'static str>>,
    pub status: Status,
}

impl ApiResponse {
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            updated: None,
            status: Status::Completed,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            updated: None,
            status: Status::Failed,
        }
    }

    pub fn with_updated(mut self, updated: Vec<&'static str>) -> Self {
        self.updated = Some(updated);
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Request body fields, from either a JSON object or an urlencoded form.
/// Form values arrive as strings. Any other body is treated as empty.
pub struct Fields(pub Map<String, Value>);

impl<S: Send + Sync> FromRequest<S> for Fields {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("application/json") {
            let Json(fields) = Json::<Map<String, Value>>::from_request(req, state)
                .await
                .map_err(|e| malformed(&e.body_text()))?;
            Ok(Fields(fields))
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| malformed(&e.body_text()))?;
            Ok(Fields(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ))
        } else {
            Ok(Fields(Map::new()))
        }
    }
}

fn malformed(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        ApiResponse::failed(format!("Malformed request. {detail}")),
    )
        .into_response()
}

pub async fn get_color(State(state): State<AppState>) -> Json<ColorValue> {
    Json(state.color.get())
}

/// Only the RGB channels are accepted here; power goes through PUT/DELETE.
pub async fn set_color(State(state): State<AppState>, Fields(body): Fields) -> Response {
    let options: Map<String, Value> = body
        .into_iter()
        .filter(|(k, _)| [RED, GREEN, BLUE].contains(&k.as_str()))
        .collect();
    if options.is_empty() {
        return malformed("Did not get any parameters.");
    }

    let updated = state.color.set_fields(&options).await;
    let message = if updated.is_empty() {
        "No value change"
    } else {
        "Successfully changed the color"
    };
    ApiResponse::completed(message)
        .with_updated(updated)
        .into_response()
}

pub async fn power_off(State(state): State<AppState>) -> ApiResponse {
    let updated = state.color.power_off().await;
    ApiResponse::completed("Turned lights off").with_updated(updated)
}

pub async fn power_on(State(state): State<AppState>) -> ApiResponse {
    let updated = state.color.power_on().await;
    ApiResponse::completed("Turned lights on").with_updated(updated)
}

pub async fn available(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.devices.available())
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.devices.active_list())
}

fn ip_field(body: &Map<String, Value>) -> Option<String> {
    match body.get("ip")? {
        Value::String(ip) if !ip.trim().is_empty() => Some(ip.trim().to_string()),
        _ => None,
    }
}

pub async fn add_device(State(state): State<AppState>, Fields(body): Fields) -> Response {
    let Some(ip) = ip_field(&body) else {
        return malformed("Did not get an 'ip' parameter.");
    };
    if state.devices.add(&ip) {
        ApiResponse::completed(format!("'{ip}' has been added to the device list.")).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            ApiResponse::failed(format!(
                "'{ip}' could not be added because the address was not found."
            )),
        )
            .into_response()
    }
}

pub async fn remove_device(State(state): State<AppState>, Fields(body): Fields) -> Response {
    let Some(ip) = ip_field(&body) else {
        return malformed("Did not get an 'ip' parameter.");
    };
    if state.devices.remove(&ip) {
        ApiResponse::completed(format!("'{ip}' has been removed from the device list."))
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            ApiResponse::failed(format!(
                "'{ip}' could not be deleted because the address was not found."
            )),
        )
            .into_response()
    }
}
