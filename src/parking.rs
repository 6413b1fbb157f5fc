use actix_web::{get, post, put, web, HttpResponse};
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use serde::Deserialize;
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::schemas::{new_id, normalize_plate, ParkingRecord, PARKING_RECORDS};
use crate::AppState;

#[derive(Deserialize)]
struct EntryJson {
    license_plate: String,
    parking_area: String,
    parking_spot: String,
    coupon_id: Option<String>,
}

#[post("/parking")]
pub(crate) async fn record_entry(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<EntryJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    let plate = normalize_plate(&json.license_plate);
    if plate.is_empty() {
        return Err(ApiError::Invalid(
            "license plate must not be empty".to_string(),
        ));
    }

    let record = ParkingRecord {
        id: new_id(),
        user_id: Some(identity.user_id),
        license_plate: plate,
        parking_area: json.parking_area,
        parking_spot: json.parking_spot,
        coupon_id: json.coupon_id,
        entry_time: bson::DateTime::now(),
        exit_time: None,
    };
    state
        .collection::<ParkingRecord>(PARKING_RECORDS)
        .insert_one(&record, None)
        .await?;
    info!(record_id = %record.id, plate = %record.license_plate, "vehicle entered");

    Ok(HttpResponse::Created().json(record))
}

#[put("/parking/{id}/exit")]
pub(crate) async fn record_exit(
    state: web::Data<AppState>,
    _identity: Identity,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let records = state.collection::<ParkingRecord>(PARKING_RECORDS);
    let record = records
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("parking record"))?;
    if record.exit_time.is_some() {
        return Err(ApiError::Conflict(
            "vehicle has already exited".to_string(),
        ));
    }

    let exit_time = bson::DateTime::now();
    records
        .update_one(
            doc! { "id": &record.id },
            doc! { "$set": { "exit_time": exit_time } },
            None,
        )
        .await?;
    info!(record_id = %record.id, plate = %record.license_plate, "vehicle exited");

    Ok(HttpResponse::Ok().json(ParkingRecord {
        exit_time: Some(exit_time),
        ..record
    }))
}

#[get("/staff/parking")]
pub(crate) async fn all_records(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let options = FindOptions::builder().sort(doc! { "entry_time": 1 }).build();
    let records: Vec<ParkingRecord> = state
        .collection(PARKING_RECORDS)
        .find(doc! {}, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

#[get("/staff/parking/active")]
pub(crate) async fn active_records(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let options = FindOptions::builder().sort(doc! { "entry_time": 1 }).build();
    let records: Vec<ParkingRecord> = state
        .collection(PARKING_RECORDS)
        .find(doc! { "exit_time": Bson::Null }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

#[get("/staff/parking/{plate}")]
pub(crate) async fn active_record_by_plate(
    state: web::Data<AppState>,
    identity: Identity,
    plate: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let record = state
        .collection::<ParkingRecord>(PARKING_RECORDS)
        .find_one(
            doc! {
                "license_plate": normalize_plate(&plate),
                "exit_time": Bson::Null,
            },
            None,
        )
        .await?
        .ok_or(ApiError::NotFound("parking record"))?;
    Ok(HttpResponse::Ok().json(record))
}
