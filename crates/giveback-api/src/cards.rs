use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        multipart::{Multipart, MultipartError},
    },
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::{info, warn};

use giveback_db::geo::valid_coordinates;
use giveback_db::models::{CardFilter, NewCard};
use giveback_types::api::{CardQuery, MessageBody, NearbyQuery};
use giveback_types::models::{Card, CardType};

use crate::db_call;
use crate::error::{ApiError, msg};
use crate::images::{self, MAX_IMAGE_SIZE};
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Search radius when the client sends none.
pub const DEFAULT_NEARBY_DISTANCE_M: f64 = 10_000.0;

struct UploadedImage {
    file_name: Option<String>,
    content_type: String,
    data: Bytes,
}

/// Text fields and the optional image of a card form.
#[derive(Default)]
struct CardForm {
    fields: HashMap<String, String>,
    image: Option<UploadedImage>,
}

impl CardForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "image" {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;

                // Browsers send an empty part when no file was picked.
                if data.is_empty() && file_name.as_deref().is_none_or(str::is_empty) {
                    continue;
                }
                if !images::is_image(&content_type) {
                    return Err(ApiError::validation(msg::IMAGES_ONLY));
                }
                if data.len() > MAX_IMAGE_SIZE {
                    return Err(ApiError::PayloadTooLarge(msg::IMAGE_TOO_LARGE.to_string()));
                }
                form.image = Some(UploadedImage {
                    file_name,
                    content_type,
                    data,
                });
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed value, `None` when absent or blank.
    fn text(&self, key: &str) -> Option<String> {
        nonblank(self.fields.get(key).map(String::as_str))
    }

    fn required(&self, key: &str) -> Result<String, ApiError> {
        self.text(key).ok_or_else(|| ApiError::validation(msg::field_required(key)))
    }

    fn card_type(&self) -> Result<Option<CardType>, ApiError> {
        self.text("cardType").map(|t| parse_card_type(&t)).transpose()
    }

    /// Both coordinates, or `None` unless both were given.
    fn location(&self) -> Result<Option<(f64, f64)>, ApiError> {
        match (self.text("longitude"), self.text("latitude")) {
            (Some(lng), Some(lat)) => parse_point(&lng, &lat).map(Some),
            _ => Ok(None),
        }
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(msg::IMAGE_TOO_LARGE.to_string())
    } else {
        warn!("Rejected multipart body: {}", e.body_text());
        ApiError::validation(msg::INVALID_FORM)
    }
}

fn nonblank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn parse_card_type(raw: &str) -> Result<CardType, ApiError> {
    raw.parse().map_err(|_| ApiError::validation(msg::INVALID_CARD_TYPE))
}

fn parse_point(lng: &str, lat: &str) -> Result<(f64, f64), ApiError> {
    let lng: f64 = lng.trim().parse().map_err(|_| ApiError::validation(msg::INVALID_COORDINATES))?;
    let lat: f64 = lat.trim().parse().map_err(|_| ApiError::validation(msg::INVALID_COORDINATES))?;
    if !valid_coordinates(lng, lat) {
        return Err(ApiError::validation(msg::INVALID_COORDINATES));
    }
    Ok((lng, lat))
}

async fn store_image(state: &AppState, image: Option<UploadedImage>) -> Result<Option<String>, ApiError> {
    match image {
        Some(image) => {
            let url = state
                .images
                .save(image.file_name.as_deref(), &image.content_type, &image.data)
                .await?;
            Ok(Some(url))
        }
        None => Ok(None),
    }
}

pub async fn create_card(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = CardForm::read(multipart).await?;

    let card_type = form
        .card_type()?
        .ok_or_else(|| ApiError::validation(msg::field_required("cardType")))?;
    let item_name = form.required("itemName")?;
    let description = form.required("description")?;
    let address = form.required("address")?;
    let (longitude, latitude) = form
        .location()?
        .ok_or_else(|| ApiError::validation(msg::COORDINATES_REQUIRED))?;

    let image_url = store_image(&state, form.image.take()).await?;

    let new_card = NewCard {
        card_type,
        item_name,
        description,
        phone_number: form.text("phoneNumber"),
        category: form.text("category"),
        image_url: image_url.clone(),
        longitude,
        latitude,
        address,
        user_id: current.id.to_string(),
    };

    let row = match db_call(&state.db, move |db| db.insert_card(&new_card)).await {
        Ok(row) => row,
        Err(e) => {
            if let Some(url) = &image_url {
                state.images.delete(url).await;
            }
            return Err(e);
        }
    };

    info!("{} ({}) created card {} '{}'", current.username, current.id, row.id, row.item_name);
    Ok((StatusCode::CREATED, Json(row.to_card(None))))
}

pub async fn list_cards(
    State(state): State<AppState>,
    Query(query): Query<CardQuery>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let filter = CardFilter {
        card_type: nonblank(query.card_type.as_deref())
            .map(|t| parse_card_type(&t))
            .transpose()?,
        category: nonblank(query.category.as_deref()),
        search: nonblank(query.search_query.as_deref()),
    };

    let rows = db_call(&state.db, move |db| db.list_cards(&filter)).await?;
    Ok(Json(rows.iter().map(|r| r.to_card(None)).collect()))
}

pub async fn nearby_cards(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let (Some(lng), Some(lat)) = (
        nonblank(query.longitude.as_deref()),
        nonblank(query.latitude.as_deref()),
    ) else {
        return Err(ApiError::validation(msg::COORDINATES_REQUIRED));
    };
    let (longitude, latitude) = parse_point(&lng, &lat)?;

    let distance = match nonblank(query.distance.as_deref()) {
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| ApiError::validation(msg::INVALID_DISTANCE))?,
        None => DEFAULT_NEARBY_DISTANCE_M,
    };

    let rows = db_call(&state.db, move |db| db.cards_within(longitude, latitude, distance)).await?;
    Ok(Json(rows.iter().map(|(r, d)| r.to_card(Some(*d))).collect()))
}

pub async fn my_cards(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Card>>, ApiError> {
    let user_id = current.id.to_string();
    let rows = db_call(&state.db, move |db| db.list_cards_by_user(&user_id)).await?;
    Ok(Json(rows.iter().map(|r| r.to_card(None)).collect()))
}

pub async fn get_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<Card>, ApiError> {
    let row = db_call(&state.db, move |db| db.get_card(&card_id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::CARD_NOT_FOUND))?;
    Ok(Json(row.to_card(None)))
}

/// Partial update: blank fields keep their stored value. The location only
/// moves when both coordinates are sent.
pub async fn update_card(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(card_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Card>, ApiError> {
    let id = card_id.clone();
    let mut row = db_call(&state.db, move |db| db.get_card(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::CARD_NOT_FOUND))?;

    if !current.can_modify(&row.user_id) {
        return Err(ApiError::forbidden(msg::CARD_UPDATE_FORBIDDEN));
    }

    let mut form = CardForm::read(multipart).await?;

    if let Some(card_type) = form.card_type()? {
        row.card_type = card_type.as_str().to_string();
    }
    if let Some((longitude, latitude)) = form.location()? {
        row.longitude = longitude;
        row.latitude = latitude;
        if let Some(address) = form.text("address") {
            row.address = address;
        }
    }
    if let Some(item_name) = form.text("itemName") {
        row.item_name = item_name;
    }
    if let Some(description) = form.text("description") {
        row.description = description;
    }
    if let Some(phone_number) = form.text("phoneNumber") {
        row.phone_number = Some(phone_number);
    }
    if let Some(category) = form.text("category") {
        row.category = Some(category);
    }

    let new_image = store_image(&state, form.image.take()).await?;
    let replaced_image = match &new_image {
        Some(url) => row.image_url.replace(url.clone()),
        None => None,
    };

    let id = card_id.clone();
    let updated = db_call(&state.db, move |db| {
        db.update_card(&row)?;
        db.get_card(&id)
    })
    .await
    .and_then(|card| card.ok_or_else(|| ApiError::not_found(msg::CARD_NOT_FOUND)));
    let updated = match updated {
        Ok(updated) => updated,
        Err(e) => {
            if let Some(url) = &new_image {
                state.images.delete(url).await;
            }
            return Err(e);
        }
    };

    if let Some(old) = replaced_image {
        state.images.delete(&old).await;
    }

    info!("{} ({}) updated card {}", current.username, current.id, card_id);
    Ok(Json(updated.to_card(None)))
}

/// Chats that reference the card are kept; they render without it.
pub async fn delete_card(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(card_id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    let id = card_id.clone();
    let row = db_call(&state.db, move |db| db.get_card(&id))
        .await?
        .ok_or_else(|| ApiError::not_found(msg::CARD_NOT_FOUND))?;

    if !current.can_modify(&row.user_id) {
        return Err(ApiError::forbidden(msg::CARD_DELETE_FORBIDDEN));
    }

    let id = card_id.clone();
    db_call(&state.db, move |db| db.delete_card(&id)).await?;

    if let Some(url) = &row.image_url {
        state.images.delete(url).await;
    }

    info!("{} ({}) deleted card {}", current.username, current.id, card_id);
    Ok(Json(MessageBody {
        message: msg::CARD_DELETED.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_absent() {
        assert_eq!(nonblank(Some("  sofa ")), Some("sofa".to_string()));
        assert_eq!(nonblank(Some("   ")), None);
        assert_eq!(nonblank(None), None);
    }

    #[test]
    fn points_must_be_numbers_in_range() {
        assert_eq!(parse_point("34.78", "32.08").unwrap(), (34.78, 32.08));
        assert!(parse_point("abc", "32.08").is_err());
        assert!(parse_point("34.78", "95").is_err());
        assert!(parse_point("NaN", "32").is_err());
    }

    #[test]
    fn card_type_parsing() {
        assert_eq!(parse_card_type("donation").unwrap(), CardType::Donation);
        assert_eq!(parse_card_type("request").unwrap(), CardType::Request);
        assert_eq!(parse_card_type("gift").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn form_location_needs_both_coordinates() {
        let mut form = CardForm::default();
        form.fields.insert("longitude".into(), "34.78".into());
        assert!(form.location().unwrap().is_none());

        form.fields.insert("latitude".into(), " 32.08 ".into());
        assert_eq!(form.location().unwrap(), Some((34.78, 32.08)));

        form.fields.insert("latitude".into(), "north".into());
        assert!(form.location().is_err());
    }
}
