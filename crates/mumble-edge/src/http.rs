//! Admin HTTP API (spec §6 `web_api.{enabled, port, cors}`), mirroring
//! `mumble_hub::http`'s pattern scaled down to what a single Edge can
//! answer locally: liveness and the client count, plus the shared
//! prometheus exposition.

use std::sync::Arc;

use actix_web::dev::ServiceRequest;
use actix_web::{web, App, Error, HttpResponse, HttpServer};
use actix_web_httpauth::extractors::basic::BasicAuth;
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Serialize;

use crate::client_manager::ClientManager;
use crate::hub_client::HubClient;

#[derive(Clone)]
struct Credentials {
    user: String,
    password: String,
}

async fn validator(req: ServiceRequest, creds: BasicAuth) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let expected = req.app_data::<web::Data<Credentials>>().cloned();
    match expected {
        Some(expected) if creds.user_id() == expected.user.as_str() && creds.password().map(|p| p == expected.password.as_str()).unwrap_or(false) => Ok(req),
        _ => {
            let err = actix_web::error::ErrorUnauthorized("invalid credentials");
            Err((err, req))
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    clients_online: usize,
    hub_connected: bool,
}

async fn healthz(clients: web::Data<Arc<ClientManager>>, hub: web::Data<HubClient>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { clients_online: clients.len(), hub_connected: hub.is_connected() })
}

async fn metrics_endpoint() -> HttpResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok().content_type("text/plain; version=0.0.4").body(buf)
}

#[allow(clippy::too_many_arguments)]
pub fn create_http_server(
    listen: String,
    enabled: bool,
    clients: Arc<ClientManager>,
    hub: HubClient,
    http_user: String,
    http_password: String,
) -> Option<actix_web::dev::Server> {
    if !enabled {
        return None;
    }

    let credentials = web::Data::new(Credentials { user: http_user, password: http_password });
    let clients_data = web::Data::new(clients);
    let hub_data = web::Data::new(hub);

    let server = HttpServer::new(move || {
        let auth = HttpAuthentication::basic(validator);
        App::new()
            .app_data(credentials.clone())
            .app_data(clients_data.clone())
            .app_data(hub_data.clone())
            .route("/metrics", web::get().to(metrics_endpoint))
            .service(web::scope("/api").wrap(auth).route("/healthz", web::get().to(healthz)))
    })
    .bind(listen)
    .ok()?
    .run();

    Some(server)
}
