use actix_web::{get, web, HttpResponse};
use bson::doc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::schemas::{
    new_id, Transaction, TransactionStatus, TransactionType, TRANSACTIONS,
};
use crate::AppState;

/// Every monetary operation leaves exactly one transaction row; coupon
/// purchase and fine payment both go through here.
pub async fn record(
    state: &AppState,
    user_id: &str,
    kind: TransactionType,
    amount: f64,
    reference_id: &str,
    payment_method: &str,
) -> Result<Transaction, ApiError> {
    let now = bson::DateTime::now();
    let transaction = Transaction {
        id: new_id(),
        user_id: user_id.to_string(),
        kind,
        amount,
        reference_id: reference_id.to_string(),
        payment_method: payment_method.to_string(),
        status: TransactionStatus::Completed,
        created_at: now,
        updated_at: now,
        notes: String::new(),
    };
    state
        .collection::<Transaction>(TRANSACTIONS)
        .insert_one(&transaction, None)
        .await?;
    Ok(transaction)
}

#[get("/transactions")]
pub(crate) async fn list_transactions(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .build();
    let transactions: Vec<Transaction> = state
        .collection(TRANSACTIONS)
        .find(doc! { "user_id": &identity.user_id }, options)
        .await?
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(transactions))
}
