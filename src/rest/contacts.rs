//! Contact form intake (public) and the admin JSON view of stored contacts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{parse_id, ApiJson, AppState, Deleted, Paged, Row};
use crate::error::ApiError;
use crate::models::{AdminSession, Contact, ContactInput};
use crate::notify::NotifyReport;
use crate::storage::PageRequest;

#[derive(Serialize)]
pub struct ContactCreated {
    pub ok: bool,
    pub id: u64,
    pub notify: NotifyReport,
}

#[derive(Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        PageRequest::parse(self.page.as_deref(), self.limit.as_deref())
    }
}

/// Validates and stores the submission, then notifies. The contact is
/// persisted before any channel runs, and channel failures only show up in
/// the `notify` report.
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<ContactInput>,
) -> Result<(StatusCode, Json<ContactCreated>), ApiError> {
    let contact = input.validate()?;
    let stored = state.stores.contacts.insert(contact).await?;
    tracing::info!(id = stored.id, "contact received");

    let notify = state.notifications.dispatch(&stored).await;

    Ok((
        StatusCode::CREATED,
        Json(ContactCreated {
            ok: true,
            id: stored.id,
            notify,
        }),
    ))
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paged<Contact>>, ApiError> {
    let page = state.stores.contacts.page(query.request()).await?;
    Ok(Json(Paged { ok: true, page }))
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Row<Contact>>, ApiError> {
    let id = parse_id(&id)?;
    let row = state
        .stores
        .contacts
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Contatto non trovato".into()))?;
    Ok(Json(Row { ok: true, row }))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AdminSession>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let id = parse_id(&id)?;
    let deleted = state.stores.contacts.delete_by_id(id).await?;
    tracing::info!(id, deleted, admin = %session.user, "contact deleted");
    Ok(Json(Deleted { ok: true, deleted }))
}
