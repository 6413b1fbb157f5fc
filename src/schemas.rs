use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

pub type UserId = String;

// Collection names, kept identical to the mobile client's backend.
pub const USERS: &str = "users";
pub const COUPON_PACKAGES: &str = "couponPackages";
pub const COUPONS: &str = "coupons";
pub const COUPON_USAGES: &str = "couponUsages";
pub const FINES: &str = "fines";
pub const FINE_PAYMENTS: &str = "finePayments";
pub const REPORTS: &str = "reports";
pub const TRANSACTIONS: &str = "transactions";
pub const PARKING_RECORDS: &str = "parkingRecords";

/// Documents carry their id in a plain `id` field as a hex ObjectId string.
pub fn new_id() -> String {
    ObjectId::new().to_hex()
}

/// Plates arrive from forms and plate readers in inconsistent shapes;
/// every boundary that accepts one stores and queries this form.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    User,
    Staff,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Staff => "STAFF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(UserRole::User),
            "STAFF" => Some(UserRole::Staff),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub role: UserRole,
    pub saved_plates: Vec<String>,
    pub password_hash: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Response projection of a user, without the password hash.
#[derive(Clone, Debug, Serialize)]
pub struct PublicUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub role: UserRole,
    pub saved_plates: Vec<String>,
    pub created_at: DateTime,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        PublicUser {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            role: user.role,
            saved_plates: user.saved_plates.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CouponPackage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub usage_count: i32,
    pub validity_days: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Coupon {
    pub id: String,
    pub user_id: UserId,
    pub package_id: String,
    pub package_name: String,
    pub remaining_uses: i32,
    pub purchase_date: DateTime,
    pub expiry_date: DateTime,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CouponUsage {
    pub id: String,
    pub coupon_id: String,
    pub user_id: UserId,
    pub parking_area: String,
    pub parking_spot: String,
    pub license_plate: String,
    pub usage_time: DateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Fine {
    pub id: String,
    /// Empty when the plate could not be matched to a registered user.
    pub user_id: UserId,
    pub license_plate: String,
    pub parking_area: String,
    pub parking_spot: String,
    pub amount: f64,
    pub issued_by: UserId,
    pub issued_at: DateTime,
    pub status: FineStatus,
    pub paid_at: Option<DateTime>,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FinePayment {
    pub id: String,
    pub fine_id: String,
    pub user_id: UserId,
    pub amount: f64,
    pub payment_method: String,
    pub transaction_id: String,
    pub payment_date: DateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    Issue,
    Feedback,
    Suggestion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Submitted,
    InReview,
    Resolved,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Report {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: ReportType,
    pub title: String,
    pub description: String,
    pub parking_area: Option<String>,
    pub parking_spot: Option<String>,
    pub status: ReportStatus,
    pub submitted_at: DateTime,
    pub updated_at: DateTime,
    pub resolved_at: Option<DateTime>,
    pub staff_notes: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CouponPurchase,
    FinePayment,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: f64,
    /// Coupon id or fine id, depending on the type.
    pub reference_id: String,
    pub payment_method: String,
    pub status: TransactionStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ParkingRecord {
    pub id: String,
    pub user_id: Option<UserId>,
    pub license_plate: String,
    pub parking_area: String,
    pub parking_spot: String,
    pub coupon_id: Option<String>,
    pub entry_time: DateTime,
    /// None while the vehicle is still parked.
    pub exit_time: Option<DateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates_normalize_to_uppercase_without_whitespace() {
        assert_eq!(normalize_plate(" qs 1234 a "), "QS1234A");
        assert_eq!(normalize_plate("QS1234A"), "QS1234A");
        assert_eq!(normalize_plate("qs\t1234"), "QS1234");
    }

    #[test]
    fn roles_round_trip_through_their_wire_form() {
        assert_eq!(UserRole::parse(UserRole::Staff.as_str()), Some(UserRole::Staff));
        assert_eq!(UserRole::parse(UserRole::User.as_str()), Some(UserRole::User));
        assert_eq!(UserRole::parse("ADMIN"), None);
    }

    #[test]
    fn statuses_serialize_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&ReportStatus::InReview).unwrap(),
            "\"IN_REVIEW\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionType::CouponPurchase).unwrap(),
            "\"COUPON_PURCHASE\""
        );
    }

    #[test]
    fn public_user_drops_the_password_hash() {
        let user = User {
            id: new_id(),
            username: "ali".to_string(),
            email: "ali@example.com".to_string(),
            phone_number: "0123456789".to_string(),
            role: UserRole::User,
            saved_plates: vec!["QS1234A".to_string()],
            password_hash: "$argon2id$...".to_string(),
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };
        let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "ali");
    }
}
