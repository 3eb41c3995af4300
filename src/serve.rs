//! HTTP server for the viewer API
//!
//! `sediment serve` → read-only JSON endpoints over the store, consumed by
//! the external viewer UI. No endpoint mutates anything.

use crate::db::{Database, PayloadKind};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ListParams {
    #[serde(rename = "type")]
    kind: String,
}

/// Start the API server and handle requests until process termination
pub fn start(db: &Database, port: u16) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    log::info!("viewer API listening on http://{}", addr);

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(db, request) {
            log::error!("request error: {}", e);
        }
    }

    Ok(())
}

fn handle_request(db: &Database, request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    let method = request.method().clone();

    match (&method, path) {
        (&Method::Get, "/") => json_ok(
            request,
            &ApiResponse::success(serde_json::json!({
                "endpoints": ["/api/summary", "/api/payloads?type=<kind>", "/api/lineage"],
            })),
        ),

        (&Method::Get, "/api/summary") => match db.summary() {
            Ok(summary) => json_ok(request, &ApiResponse::success(summary)),
            Err(e) => json_error(request, e.to_string()),
        },

        (&Method::Get, "/api/payloads") => {
            let kind = match parse_kind(&url) {
                Ok(kind) => kind,
                Err(msg) => {
                    return json_response(
                        request,
                        &ApiResponse::<()>::failure(msg),
                        400,
                    );
                }
            };
            match db.list_payloads(kind) {
                Ok(payloads) => json_ok(request, &ApiResponse::success(payloads)),
                Err(e) => json_error(request, e.to_string()),
            }
        }

        (&Method::Get, "/api/lineage") => match db.list_transformations() {
            Ok(edges) => json_ok(request, &ApiResponse::success(edges)),
            Err(e) => json_error(request, e.to_string()),
        },

        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

fn parse_kind(url: &str) -> Result<PayloadKind, String> {
    let query = url
        .split('?')
        .nth(1)
        .ok_or_else(|| "missing 'type' query parameter".to_string())?;
    let params: ListParams =
        serde_urlencoded::from_str(query).map_err(|e| e.to_string())?;
    params.kind.parse()
}

fn json_ok<T: Serialize>(request: Request, body: &ApiResponse<T>) -> std::io::Result<()> {
    json_response(request, body, 200)
}

fn json_error(request: Request, error: String) -> std::io::Result<()> {
    json_response(request, &ApiResponse::<()>::failure(error), 500)
}

fn json_response<T: Serialize>(
    request: Request,
    body: &T,
    status: u16,
) -> std::io::Result<()> {
    let json = serde_json::to_string(body)?;
    let response = Response::from_string(json)
        .with_status_code(status)
        .with_header(Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap());
    request.respond(response)
}
