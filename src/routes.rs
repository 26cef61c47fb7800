use crate::{
    api::{attendance, location, offpremises, settings},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-scope limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let requests_per_min = requests_per_min.max(1);
        let per_ms = (60_000 / requests_per_min as u64).max(1);
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .unwrap_or_default();
        Governor::new(&cfg)
    }

    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/attendance")
                    // /attendance/checkin
                    .service(web::resource("/checkin").route(web::post().to(attendance::check_in)))
                    // /attendance/checkout
                    .service(web::resource("/checkout").route(web::post().to(attendance::check_out)))
                    // /attendance/today
                    .service(web::resource("/today").route(web::get().to(attendance::today))),
            )
            .service(
                web::scope("/offpremises")
                    .service(web::resource("/submit").route(web::post().to(offpremises::submit)))
                    .service(web::resource("/pending").route(web::get().to(offpremises::list_pending)))
                    // /offpremises/{id}
                    .service(web::resource("/{id}").route(web::get().to(offpremises::get_request)))
                    .service(web::resource("/{id}/approve").route(web::post().to(offpremises::approve)))
                    .service(web::resource("/{id}/reject").route(web::post().to(offpremises::reject)))
                    .service(web::resource("/{id}/revert").route(web::post().to(offpremises::revert))),
            )
            .service(
                web::scope("/settings").service(
                    web::resource("/device-radius")
                        .route(web::get().to(settings::get_device_radius))
                        .route(web::put().to(settings::update_device_radius)),
                ),
            )
            .service(
                web::scope("/location")
                    .service(web::resource("/samples").route(web::post().to(location::upload_samples)))
                    .service(web::resource("/status").route(web::get().to(location::status))),
            ),
    );
}
