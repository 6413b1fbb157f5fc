use actix_web::{get, post, put, web, HttpResponse};
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use serde::Deserialize;
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::schemas::{new_id, Report, ReportStatus, ReportType, REPORTS};
use crate::AppState;

/// RESOLVED and CLOSED carry a resolution timestamp; reopening to any other
/// status clears it.
fn is_terminal(status: ReportStatus) -> bool {
    matches!(status, ReportStatus::Resolved | ReportStatus::Closed)
}

#[derive(Deserialize)]
struct SubmitReportJson {
    #[serde(rename = "type")]
    kind: ReportType,
    title: String,
    description: String,
    parking_area: Option<String>,
    parking_spot: Option<String>,
}

#[post("/reports")]
pub(crate) async fn submit_report(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<SubmitReportJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    if json.title.trim().is_empty() {
        return Err(ApiError::Invalid("title must not be empty".to_string()));
    }
    if json.description.trim().is_empty() {
        return Err(ApiError::Invalid(
            "description must not be empty".to_string(),
        ));
    }

    let now = bson::DateTime::now();
    let report = Report {
        id: new_id(),
        user_id: identity.user_id,
        kind: json.kind,
        title: json.title.trim().to_string(),
        description: json.description.trim().to_string(),
        parking_area: json.parking_area,
        parking_spot: json.parking_spot,
        status: ReportStatus::Submitted,
        submitted_at: now,
        updated_at: now,
        resolved_at: None,
        staff_notes: String::new(),
    };
    state
        .collection::<Report>(REPORTS)
        .insert_one(&report, None)
        .await?;
    info!(report_id = %report.id, "report submitted");

    Ok(HttpResponse::Created().json(report))
}

#[get("/reports")]
pub(crate) async fn my_reports(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder()
        .sort(doc! { "submitted_at": -1 })
        .build();
    let reports: Vec<Report> = state
        .collection(REPORTS)
        .find(doc! { "user_id": &identity.user_id }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[get("/staff/reports")]
pub(crate) async fn all_reports(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let options = FindOptions::builder()
        .sort(doc! { "submitted_at": -1 })
        .build();
    let reports: Vec<Report> = state
        .collection(REPORTS)
        .find(doc! {}, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(reports))
}

#[derive(Deserialize)]
struct StatusJson {
    status: ReportStatus,
    staff_notes: Option<String>,
}

#[put("/staff/reports/{id}/status")]
pub(crate) async fn update_report_status(
    state: web::Data<AppState>,
    identity: Identity,
    id: web::Path<String>,
    json: web::Json<StatusJson>,
) -> Result<HttpResponse, ApiError> {
    identity.require_staff()?;
    let json = json.into_inner();
    let reports = state.collection::<Report>(REPORTS);
    let report = reports
        .find_one(doc! { "id": id.into_inner() }, None)
        .await?
        .ok_or(ApiError::NotFound("report"))?;

    let now = bson::DateTime::now();
    let resolved_at = if is_terminal(json.status) {
        Bson::DateTime(now)
    } else {
        Bson::Null
    };
    let mut update = doc! {
        "status": bson::to_bson(&json.status)?,
        "updated_at": now,
        "resolved_at": resolved_at,
    };
    if let Some(notes) = json.staff_notes {
        update.insert("staff_notes", notes);
    }
    reports
        .update_one(doc! { "id": &report.id }, doc! { "$set": update }, None)
        .await?;
    info!(report_id = %report.id, status = ?json.status, "report status updated");

    let report = reports
        .find_one(doc! { "id": &report.id }, None)
        .await?
        .ok_or(ApiError::NotFound("report"))?;
    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_and_closed_are_terminal() {
        assert!(is_terminal(ReportStatus::Resolved));
        assert!(is_terminal(ReportStatus::Closed));
        assert!(!is_terminal(ReportStatus::Submitted));
        assert!(!is_terminal(ReportStatus::InReview));
    }
}
