#[macro_use]
extern crate diesel;

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use diesel::r2d2;
use diesel::PgConnection;
use dotenvy;

mod admin;
mod api;
mod booking;
mod error;
mod ledger;
mod models;
mod orders;
mod schema;
mod store;

use booking::Policy;
use models::Res;
use store::DbPool;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub policy: Policy,
    pub admin_token: String,
}

impl AppConfig {
    fn from_env() -> Self {
        let lead_time_days = std::env::var("LEAD_TIME_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        let store_utc_offset_minutes = std::env::var("STORE_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let admin_token = std::env::var("ADMIN_TOKEN").expect("ADMIN_TOKEN should be set");

        AppConfig {
            policy: Policy { lead_time_days, store_utc_offset_minutes },
            admin_token,
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // initialize DB pool outside of `HttpServer::new` so that it is shared across all workers
    let pool = initialize_db_pool();
    let config = web::Data::new(AppConfig::from_env());
    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    log::info!("starting HTTP server at http://{}", bind_addr);

    HttpServer::new(move || {
        App::new()
            // add DB pool handle to app data; enables use of `web::Data<DbPool>` extractor
            .app_data(web::Data::new(pool.clone()))
            .app_data(config.clone())
            .wrap(middleware::Logger::default())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let detail = err.to_string();
                let response = match err {
                    actix_web::error::JsonPayloadError::ContentType => {
                        HttpResponse::UnsupportedMediaType().body("Unsupported Media Type")
                    }
                    actix_web::error::JsonPayloadError::Deserialize(ref err) => {
                        HttpResponse::BadRequest().json(Res { message: err.to_string() })
                    }
                    _ => HttpResponse::BadRequest().json(Res { message: detail }),
                };
                actix_web::error::InternalError::from_response(err, response).into()
            }))
            .service(api::get_available_dates)
            .service(api::get_slots_for_date)
            .service(api::lookup_booking)
            .service(api::assign_booking)
            .service(api::order_finalized)
            .service(api::order_cancelled)
            .service(api::order_refunded)
            .service(api::order_failed)
            .service(admin::create_slot)
            .service(admin::list_slots)
            .service(admin::get_slot)
            .service(admin::update_slot)
            .service(admin::delete_slot)
            .service(admin::slot_bookings)
            .service(admin::assign_slot)
            .service(admin::change_slot)
    })
    .bind(bind_addr)?
    .run()
    .await
}

fn initialize_db_pool() -> DbPool {
    let conn_spec = std::env::var("DATABASE_URL").expect("DATABASE_URL should be set");
    let manager = r2d2::ConnectionManager::<PgConnection>::new(conn_spec);
    r2d2::Pool::builder()
        .build(manager)
        .expect("database URL should be a valid Postgres connection string")
}
