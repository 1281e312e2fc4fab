//! Public giveaway routes under `/giveaway/`.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use service::giveaway::domain::{Address, LeaderboardRow, Task, User};
use service::storage::codec::hex_bytes;

use crate::errors::JsonApiError;
use crate::routes::AppState;

pub(crate) fn parse_address(raw: &str) -> Result<Address, JsonApiError> {
    raw.parse().map_err(|_| JsonApiError::bad_request("address is not a valid address"))
}

fn parse_signature(raw: &str) -> Result<Vec<u8>, JsonApiError> {
    hex_bytes::decode(raw).map_err(|_| JsonApiError::bad_request("signature is not valid hex"))
}

/// Query values that must all be present; a missing one is answered with 403.
fn required<'a>(values: &[&'a Option<String>]) -> Result<Vec<&'a str>, JsonApiError> {
    values
        .iter()
        .copied()
        .map(|v| v.as_deref().filter(|s| !s.is_empty()))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| JsonApiError::forbidden("Query params not set"))
}

pub async fn leaderboard(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<LeaderboardRow>>, JsonApiError> {
    let address = parse_address(&address)?;
    Ok(Json(state.service.leaderboard(&address).await?))
}

#[derive(Debug, Deserialize)]
pub struct AcceptMetadataQuery {
    pub address: Option<String>,
    pub request: Option<String>,
    pub signature: Option<String>,
}

pub async fn accept_metadata_request(
    State(state): State<AppState>,
    Query(q): Query<AcceptMetadataQuery>,
) -> Result<Json<Value>, JsonApiError> {
    let params = required(&[&q.address, &q.request, &q.signature])?;
    let address = parse_address(params[0])?;
    let signature = parse_signature(params[2])?;
    state.service.accept_metadata_request(address, params[1], &signature).await?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginUrl {
    pub url: String,
}

pub async fn login_with_x(
    State(state): State<AppState>,
    Query(q): Query<AddressQuery>,
) -> Result<Json<LoginUrl>, JsonApiError> {
    let address = parse_address(q.address.as_deref().unwrap_or_default())?;
    let url = state.service.start_x_login(address).await?;
    Ok(Json(LoginUrl { url }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

pub async fn callback_x(
    State(state): State<AppState>,
    Query(q): Query<CallbackQuery>,
) -> Result<Redirect, JsonApiError> {
    let params = required(&[&q.state, &q.code])
        .map_err(|_| JsonApiError::forbidden("Callback query params not set"))?;
    state.service.finish_x_login(params[0], params[1]).await?;
    Ok(Redirect::to(&state.service.x_redirects().success_uri))
}

pub async fn tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, JsonApiError> {
    Ok(Json(state.service.tasks().await?))
}

pub async fn user(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<User>, JsonApiError> {
    let address = parse_address(&address)?;
    Ok(Json(state.service.user(&address).await?))
}

#[derive(Debug, Deserialize)]
pub struct DroplistQuery {
    pub address: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DroplistSlot {
    pub address: Address,
    pub slot: Option<usize>,
}

pub async fn register_droplist(
    State(state): State<AppState>,
    Query(q): Query<DroplistQuery>,
) -> Result<Json<DroplistSlot>, JsonApiError> {
    let params = required(&[&q.address, &q.signature])?;
    let address = parse_address(params[0])?;
    let signature = parse_signature(params[1])?;
    let slot = state.service.register_droplist(address, signature).await?;
    Ok(Json(DroplistSlot { address, slot: Some(slot) }))
}

pub async fn droplist_slot(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<DroplistSlot>, JsonApiError> {
    let address = parse_address(&address)?;
    let slot = state.service.droplist_slot(&address).await?;
    Ok(Json(DroplistSlot { address, slot }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn required_rejects_missing_and_empty() {
        let present = Some("a".to_string());
        let empty = Some(String::new());
        let missing: Option<String> = None;

        assert_eq!(required(&[&present, &present]).map_err(|e| e.status).ok(), Some(vec!["a", "a"]));
        assert_eq!(required(&[&present, &empty]).err().map(|e| e.status), Some(StatusCode::FORBIDDEN));
        assert_eq!(required(&[&missing]).err().map(|e| e.status), Some(StatusCode::FORBIDDEN));
    }

    #[test]
    fn bad_address_is_400() {
        let err = parse_address("0x1234").err().map(|e| e.status);
        assert_eq!(err, Some(StatusCode::BAD_REQUEST));
        assert!(parse_address("0x5B38Da6a701c568545dCfcB03FcB875f56beddC4").is_ok());
    }
}
