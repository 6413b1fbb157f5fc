use actix_web::{get, post, web, HttpResponse};
use bson::doc;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::schemas::{
    new_id, normalize_plate, Coupon, CouponPackage, CouponUsage, TransactionType, User,
    COUPONS, COUPON_PACKAGES, COUPON_USAGES, USERS,
};
use crate::{transactions, AppState};

/// Staff verify a plate against usages no older than this.
const RECENT_USAGE_WINDOW_HOURS: i64 = 2;

fn expiry_after(now: DateTime<Utc>, validity_days: i64) -> bson::DateTime {
    bson::DateTime::from_chrono(now + Duration::days(validity_days))
}

/// The checks the kiosk and the app both apply before a coupon is spent.
/// The stored `is_active` flag may lag behind the expiry date, so expiry is
/// always re-checked here.
fn validate_redemption(
    coupon: &Coupon,
    user_id: &str,
    now: bson::DateTime,
) -> Result<(), ApiError> {
    if coupon.user_id != user_id {
        return Err(ApiError::Forbidden(
            "this coupon belongs to another user".to_string(),
        ));
    }
    if !coupon.is_active {
        return Err(ApiError::Conflict("coupon is no longer active".to_string()));
    }
    if coupon.remaining_uses <= 0 {
        return Err(ApiError::Conflict(
            "no remaining uses left on this coupon".to_string(),
        ));
    }
    if coupon.expiry_date < now {
        return Err(ApiError::Conflict("coupon has expired".to_string()));
    }
    Ok(())
}

#[get("/packages")]
pub(crate) async fn list_packages(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder().sort(doc! { "price": 1 }).build();
    let packages: Vec<CouponPackage> = state
        .collection(COUPON_PACKAGES)
        .find(doc! { "is_active": true }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(packages))
}

#[derive(Deserialize)]
struct PurchaseJson {
    payment_method: String,
}

#[post("/packages/{id}/purchase")]
pub(crate) async fn purchase_coupon(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
    json: web::Json<PurchaseJson>,
) -> Result<HttpResponse, ApiError> {
    let package = state
        .collection::<CouponPackage>(COUPON_PACKAGES)
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("coupon package"))?;
    if !package.is_active {
        return Err(ApiError::Conflict(
            "package is no longer available".to_string(),
        ));
    }

    let now = Utc::now();
    let coupon = Coupon {
        id: new_id(),
        user_id: identity.user_id.clone(),
        package_id: package.id.clone(),
        package_name: package.name.clone(),
        remaining_uses: package.usage_count,
        purchase_date: bson::DateTime::from_chrono(now),
        expiry_date: expiry_after(now, package.validity_days),
        is_active: true,
    };
    state
        .collection::<Coupon>(COUPONS)
        .insert_one(&coupon, None)
        .await?;
    transactions::record(
        &state,
        &identity.user_id,
        TransactionType::CouponPurchase,
        package.price,
        &coupon.id,
        &json.payment_method,
    )
    .await?;
    info!(coupon_id = %coupon.id, package = %package.name, "coupon purchased");

    Ok(HttpResponse::Created().json(coupon))
}

#[get("/coupons")]
pub(crate) async fn my_coupons(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let coupons: Vec<Coupon> = state
        .collection(COUPONS)
        .find(
            doc! { "user_id": &identity.user_id, "is_active": true },
            None,
        )
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(coupons))
}

#[get("/coupons/{id}")]
pub(crate) async fn get_coupon(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let coupon = state
        .collection::<Coupon>(COUPONS)
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?;
    // Someone else's coupon reads the same as a missing one.
    match coupon {
        Some(coupon) if coupon.user_id == identity.user_id => {
            Ok(HttpResponse::Ok().json(coupon))
        }
        _ => Err(ApiError::NotFound("coupon")),
    }
}

#[derive(Deserialize)]
struct RedeemJson {
    parking_area: String,
    parking_spot: String,
    license_plate: String,
}

#[post("/coupons/{id}/redeem")]
pub(crate) async fn redeem_coupon(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
    json: web::Json<RedeemJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    let plate = normalize_plate(&json.license_plate);
    if plate.is_empty() {
        return Err(ApiError::Invalid(
            "license plate must not be empty".to_string(),
        ));
    }

    let coupons = state.collection::<Coupon>(COUPONS);
    let coupon = coupons
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("coupon"))?;

    let now = bson::DateTime::now();
    validate_redemption(&coupon, &identity.user_id, now)?;

    let usage = CouponUsage {
        id: new_id(),
        coupon_id: coupon.id.clone(),
        user_id: identity.user_id.clone(),
        parking_area: json.parking_area,
        parking_spot: json.parking_spot,
        license_plate: plate,
        usage_time: now,
    };
    let remaining_uses = coupon.remaining_uses - 1;

    // The decrement and the usage record must land together; the backend's
    // multi-document transaction does the coordination.
    let mut session = state.client.start_session(None).await?;
    session.start_transaction(None).await?;
    coupons
        .update_one_with_session(
            doc! { "id": &coupon.id },
            doc! { "$set": {
                "remaining_uses": remaining_uses,
                "is_active": remaining_uses > 0,
            }},
            None,
            &mut session,
        )
        .await?;
    state
        .collection::<CouponUsage>(COUPON_USAGES)
        .insert_one_with_session(&usage, None, &mut session)
        .await?;
    session.commit_transaction().await?;
    info!(coupon_id = %coupon.id, remaining_uses, "coupon redeemed");

    Ok(HttpResponse::Ok().json(usage))
}

#[get("/coupons/usages")]
pub(crate) async fn usage_history(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder()
        .sort(doc! { "usage_time": -1 })
        .build();
    let usages: Vec<CouponUsage> = state
        .collection(COUPON_USAGES)
        .find(doc! { "user_id": &identity.user_id }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(usages))
}

#[derive(Serialize)]
struct CouponCheck {
    recently_used: bool,
    active_coupon: Option<Coupon>,
}

#[get("/staff/coupon-check/{plate}")]
pub(crate) async fn staff_coupon_check(
    state: web::Data<AppState>,
    identity: Identity,
    plate: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let plate = normalize_plate(&plate);

    let window_start = bson::DateTime::from_chrono(
        Utc::now() - Duration::hours(RECENT_USAGE_WINDOW_HOURS),
    );
    let recent_usage = state
        .collection::<CouponUsage>(COUPON_USAGES)
        .find_one(
            doc! { "license_plate": &plate, "usage_time": { "$gt": window_start } },
            None,
        )
        .await?;

    let owner = state
        .collection::<User>(USERS)
        .find_one(doc! { "saved_plates": &plate }, None)
        .await?;
    let active_coupon = match owner {
        Some(owner) => {
            state
                .collection::<Coupon>(COUPONS)
                .find_one(
                    doc! {
                        "user_id": &owner.id,
                        "is_active": true,
                        "remaining_uses": { "$gt": 0 },
                    },
                    None,
                )
                .await?
        }
        None => None,
    };

    Ok(HttpResponse::Ok().json(CouponCheck {
        recently_used: recent_usage.is_some(),
        active_coupon,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupon(remaining_uses: i32, is_active: bool, expires_in_days: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: new_id(),
            user_id: "owner".to_string(),
            package_id: new_id(),
            package_name: "Monthly".to_string(),
            remaining_uses,
            purchase_date: bson::DateTime::from_chrono(now),
            expiry_date: expiry_after(now, expires_in_days),
            is_active,
        }
    }

    #[test]
    fn valid_coupon_passes() {
        let coupon = coupon(10, true, 30);
        assert!(validate_redemption(&coupon, "owner", bson::DateTime::now()).is_ok());
    }

    #[test]
    fn someone_elses_coupon_is_forbidden() {
        let coupon = coupon(10, true, 30);
        let err = validate_redemption(&coupon, "intruder", bson::DateTime::now()).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn inactive_coupon_conflicts() {
        let coupon = coupon(10, false, 30);
        let err = validate_redemption(&coupon, "owner", bson::DateTime::now()).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn spent_coupon_conflicts() {
        let coupon = coupon(0, true, 30);
        let err = validate_redemption(&coupon, "owner", bson::DateTime::now()).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn expired_coupon_conflicts_even_while_flagged_active() {
        let coupon = coupon(10, true, -1);
        let err = validate_redemption(&coupon, "owner", bson::DateTime::now()).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn expiry_lands_validity_days_out() {
        let now = Utc::now();
        let expiry = expiry_after(now, 30).to_chrono();
        assert_eq!((expiry - now).num_days(), 30);
    }
}
