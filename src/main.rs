use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer};
use mongodb::{Client, Collection};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

mod auth;
mod config;
mod coupons;
mod error;
mod fines;
mod parking;
mod reports;
mod schemas;
mod transactions;

pub struct AppState {
    pub client: Client,
    pub config: Config,
}

impl AppState {
    pub fn collection<T>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.config.database).collection(name)
    }
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let port = config.port;
    info!("Connecting to {}", config.mongodb_uri);

    let client = Client::with_uri_str(&config.mongodb_uri)
        .await
        .expect("failed to connect");
    info!("Connected");

    let state = web::Data::new(AppState { client, config });

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .service(health)
            .service(auth::register)
            .service(auth::login)
            .service(auth::me)
            .service(auth::update_profile)
            .service(auth::update_password)
            .service(auth::get_plates)
            .service(auth::save_plate)
            .service(coupons::list_packages)
            .service(coupons::purchase_coupon)
            .service(coupons::my_coupons)
            // Registered before the `{id}` routes so the literal path wins.
            .service(coupons::usage_history)
            .service(coupons::get_coupon)
            .service(coupons::redeem_coupon)
            .service(coupons::staff_coupon_check)
            .service(fines::issue_fine)
            .service(fines::my_fines)
            .service(fines::unpaid_fines)
            .service(fines::get_fine)
            .service(fines::pay_fine)
            .service(fines::fines_by_plate)
            .service(fines::cancel_fine)
            .service(reports::submit_report)
            .service(reports::my_reports)
            .service(reports::all_reports)
            .service(reports::update_report_status)
            .service(transactions::list_transactions)
            .service(parking::record_entry)
            .service(parking::record_exit)
            .service(parking::all_records)
            .service(parking::active_records)
            .service(parking::active_record_by_plate)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
