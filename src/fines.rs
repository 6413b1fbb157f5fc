use actix_web::{get, post, put, web, HttpResponse};
use bson::doc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use serde::Deserialize;
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::schemas::{
    new_id, normalize_plate, Fine, FinePayment, FineStatus, TransactionType, User, UserRole,
    FINES, FINE_PAYMENTS, USERS,
};
use crate::{transactions, AppState};

fn validate_amount(amount: f64) -> Result<(), ApiError> {
    if amount > 0.0 {
        Ok(())
    } else {
        Err(ApiError::Invalid("amount must be positive".to_string()))
    }
}

/// Checks applied before a fine is marked paid. A fine in any state other
/// than PENDING is a conflict, including one that is already paid.
fn validate_payment(fine: &Fine, user_id: &str, amount: f64) -> Result<(), ApiError> {
    if fine.user_id != user_id {
        return Err(ApiError::Forbidden(
            "this fine belongs to another user".to_string(),
        ));
    }
    if fine.status != FineStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "fine is already {}",
            match fine.status {
                FineStatus::Paid => "paid",
                FineStatus::Cancelled => "cancelled",
                FineStatus::Pending => "pending",
            }
        )));
    }
    if amount < fine.amount {
        return Err(ApiError::Invalid(
            "payment amount is less than the fine amount".to_string(),
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct IssueFineJson {
    license_plate: String,
    parking_area: String,
    parking_spot: Option<String>,
    amount: f64,
    notes: Option<String>,
}

#[post("/fines")]
pub(crate) async fn issue_fine(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<IssueFineJson>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let json = json.into_inner();
    validate_amount(json.amount)?;
    let plate = normalize_plate(&json.license_plate);
    if plate.is_empty() {
        return Err(ApiError::Invalid(
            "license plate must not be empty".to_string(),
        ));
    }

    // Unmatched plates leave user_id empty; the fine still stands against
    // the plate itself.
    let owner = state
        .collection::<User>(USERS)
        .find_one(doc! { "saved_plates": &plate }, None)
        .await?;

    let fine = Fine {
        id: new_id(),
        user_id: owner.map(|user| user.id).unwrap_or_default(),
        license_plate: plate,
        parking_area: json.parking_area,
        parking_spot: json.parking_spot.unwrap_or_default(),
        amount: json.amount,
        issued_by: identity.user_id,
        issued_at: bson::DateTime::now(),
        status: FineStatus::Pending,
        paid_at: None,
        notes: json.notes.unwrap_or_default(),
    };
    state
        .collection::<Fine>(FINES)
        .insert_one(&fine, None)
        .await?;
    info!(fine_id = %fine.id, plate = %fine.license_plate, amount = fine.amount, "fine issued");

    Ok(HttpResponse::Created().json(fine))
}

#[get("/fines")]
pub(crate) async fn my_fines(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder().sort(doc! { "issued_at": -1 }).build();
    let fines: Vec<Fine> = state
        .collection(FINES)
        .find(doc! { "user_id": &identity.user_id }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(fines))
}

#[get("/fines/unpaid")]
pub(crate) async fn unpaid_fines(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder().sort(doc! { "issued_at": -1 }).build();
    let fines: Vec<Fine> = state
        .collection(FINES)
        .find(
            doc! {
                "user_id": &identity.user_id,
                "status": bson::to_bson(&FineStatus::Pending)?,
            },
            options,
        )
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(fines))
}

#[get("/fines/{id}")]
pub(crate) async fn get_fine(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let fine = state
        .collection::<Fine>(FINES)
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?;
    match fine {
        Some(fine) if fine.user_id == identity.user_id || identity.role == UserRole::Staff => {
            Ok(HttpResponse::Ok().json(fine))
        }
        _ => Err(ApiError::NotFound("fine")),
    }
}

#[derive(Deserialize)]
struct PayFineJson {
    amount: f64,
    payment_method: String,
}

#[post("/fines/{id}/pay")]
pub(crate) async fn pay_fine(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
    json: web::Json<PayFineJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    let fines = state.collection::<Fine>(FINES);
    let fine = fines
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("fine"))?;

    validate_payment(&fine, &identity.user_id, json.amount)?;

    let transaction = transactions::record(
        &state,
        &identity.user_id,
        TransactionType::FinePayment,
        json.amount,
        &fine.id,
        &json.payment_method,
    )
    .await?;

    let now = bson::DateTime::now();
    let payment = FinePayment {
        id: new_id(),
        fine_id: fine.id.clone(),
        user_id: identity.user_id,
        amount: json.amount,
        payment_method: json.payment_method,
        transaction_id: transaction.id,
        payment_date: now,
    };
    state
        .collection::<FinePayment>(FINE_PAYMENTS)
        .insert_one(&payment, None)
        .await?;
    fines
        .update_one(
            doc! { "id": &fine.id },
            doc! { "$set": {
                "status": bson::to_bson(&FineStatus::Paid)?,
                "paid_at": now,
            }},
            None,
        )
        .await?;
    info!(fine_id = %fine.id, amount = payment.amount, "fine paid");

    Ok(HttpResponse::Ok().json(payment))
}

#[get("/staff/fines/{plate}")]
pub(crate) async fn fines_by_plate(
    state: web::Data<AppState>,
    identity: Identity,
    plate: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let options = FindOptions::builder().sort(doc! { "issued_at": -1 }).build();
    let fines: Vec<Fine> = state
        .collection(FINES)
        .find(
            doc! {
                "license_plate": normalize_plate(&plate),
                "status": bson::to_bson(&FineStatus::Pending)?,
            },
            options,
        )
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(fines))
}

#[put("/staff/fines/{id}/cancel")]
pub(crate) async fn cancel_fine(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let fines = state.collection::<Fine>(FINES);
    let fine = fines
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("fine"))?;
    if fine.status != FineStatus::Pending {
        return Err(ApiError::Conflict(
            "only pending fines can be cancelled".to_string(),
        ));
    }
    fines
        .update_one(
            doc! { "id": &fine.id },
            doc! { "$set": { "status": bson::to_bson(&FineStatus::Cancelled)? } },
            None,
        )
        .await?;
    info!(fine_id = %fine.id, "fine cancelled");
    Ok(HttpResponse::Ok().body("Fine cancelled"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fine(status: FineStatus) -> Fine {
        Fine {
            id: new_id(),
            user_id: "owner".to_string(),
            license_plate: "QS1234A".to_string(),
            parking_area: "Central".to_string(),
            parking_spot: "A-12".to_string(),
            amount: 50.0,
            issued_by: "staff-1".to_string(),
            issued_at: bson::DateTime::now(),
            status,
            paid_at: None,
            notes: String::new(),
        }
    }

    #[test]
    fn exact_payment_passes() {
        assert!(validate_payment(&fine(FineStatus::Pending), "owner", 50.0).is_ok());
    }

    #[test]
    fn overpayment_passes() {
        assert!(validate_payment(&fine(FineStatus::Pending), "owner", 60.0).is_ok());
    }

    #[test]
    fn underpayment_is_invalid() {
        let err = validate_payment(&fine(FineStatus::Pending), "owner", 49.99).unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[test]
    fn someone_elses_fine_is_forbidden() {
        let err = validate_payment(&fine(FineStatus::Pending), "intruder", 50.0).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn paying_twice_conflicts() {
        let err = validate_payment(&fine(FineStatus::Paid), "owner", 50.0).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn cancelled_fine_cannot_be_paid() {
        let err = validate_payment(&fine(FineStatus::Cancelled), "owner", 50.0).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn amounts_must_be_positive() {
        assert!(validate_amount(50.0).is_ok());
        assert!(validate_amount(0.0).is_err());
        assert!(validate_amount(-5.0).is_err());
    }
}
