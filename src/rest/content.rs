//! Admin CRUD and public listings for the editorial content (products and
//! incentives). Both kinds share the handlers below through [`ContentKind`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::{parse_id, ApiJson, Ack, AppState, Created, Deleted, Row, Rows};
use crate::error::ApiError;
use crate::models::{AdminSession, Incentive, IncentiveInput, Product, ProductInput, Record};
use crate::storage::RecordStore;
use crate::validation::ValidationError;

pub trait ContentKind: Record {
    type Input: DeserializeOwned + Send + Sync + 'static;

    /// Used in log lines.
    const KIND: &'static str;
    const NOT_FOUND: &'static str;

    fn store(state: &AppState) -> &Arc<dyn RecordStore<Self>>;

    fn build(input: Self::Input) -> Result<Self, ValidationError>;

    /// Validation of an update body, before the record is looked up.
    fn check(input: &Self::Input) -> Result<(), ValidationError>;

    fn merge(input: &Self::Input, record: &mut Self);
}

impl ContentKind for Product {
    type Input = ProductInput;

    const KIND: &'static str = "product";
    const NOT_FOUND: &'static str = "Prodotto non trovato";

    fn store(state: &AppState) -> &Arc<dyn RecordStore<Self>> {
        &state.stores.products
    }

    fn build(input: ProductInput) -> Result<Self, ValidationError> {
        input.into_product()
    }

    fn check(input: &ProductInput) -> Result<(), ValidationError> {
        input.check()
    }

    fn merge(input: &ProductInput, record: &mut Self) {
        input.merge_into(record)
    }
}

impl ContentKind for Incentive {
    type Input = IncentiveInput;

    const KIND: &'static str = "incentive";
    const NOT_FOUND: &'static str = "Incentivo non trovato";

    fn store(state: &AppState) -> &Arc<dyn RecordStore<Self>> {
        &state.stores.incentives
    }

    fn build(input: IncentiveInput) -> Result<Self, ValidationError> {
        input.into_incentive()
    }

    fn check(input: &IncentiveInput) -> Result<(), ValidationError> {
        input.check()
    }

    fn merge(input: &IncentiveInput, record: &mut Self) {
        input.merge_into(record)
    }
}

pub async fn list<K: ContentKind>(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Rows<K>>, ApiError> {
    let rows = K::store(&state).list().await?;
    Ok(Json(Rows { ok: true, rows }))
}

/// Same listing without authentication, for the public site.
pub async fn public_list<K: ContentKind>(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Rows<K>>, ApiError> {
    list::<K>(State(state)).await
}

pub async fn get<K: ContentKind>(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Row<K>>, ApiError> {
    let id = parse_id(&id)?;
    match K::store(&state).get_by_id(id).await? {
        Some(row) => Ok(Json(Row { ok: true, row })),
        None => Err(ApiError::NotFound(K::NOT_FOUND.into())),
    }
}

pub async fn create<K: ContentKind>(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AdminSession>,
    ApiJson(input): ApiJson<K::Input>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let record = K::build(input)?;
    let stored = K::store(&state).insert(record).await?;

    tracing::info!(kind = K::KIND, id = stored.id(), admin = %session.user, "content created");
    Ok((
        StatusCode::CREATED,
        Json(Created {
            ok: true,
            id: stored.id(),
        }),
    ))
}

/// Partial update: fields absent from the body keep their value.
pub async fn update<K: ContentKind>(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AdminSession>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<K::Input>,
) -> Result<Json<Ack>, ApiError> {
    let id = parse_id(&id)?;
    K::check(&input)?;

    let updated = K::store(&state)
        .update_by_id(id, Box::new(move |record: &mut K| K::merge(&input, record)))
        .await?;
    if updated.is_none() {
        return Err(ApiError::NotFound(K::NOT_FOUND.into()));
    }

    tracing::info!(kind = K::KIND, id, admin = %session.user, "content updated");
    Ok(Json(Ack { ok: true }))
}

pub async fn delete<K: ContentKind>(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AdminSession>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let id = parse_id(&id)?;
    let deleted = K::store(&state).delete_by_id(id).await?;

    tracing::info!(kind = K::KIND, id, deleted, admin = %session.user, "content deleted");
    Ok(Json(Deleted { ok: true, deleted }))
}
