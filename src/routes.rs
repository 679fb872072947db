use actix_web::http::header::{self, ContentType};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};

use crate::error::ApiError;
use crate::models::*;
use crate::service::BoardService;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/threads/{board}")
                    .route(web::get().to(list_threads))
                    .route(web::post().to(create_thread))
                    .route(web::put().to(report_thread))
                    .route(web::delete().to(delete_thread)),
            )
            .service(
                web::resource("/replies/{board}")
                    .route(web::get().to(get_thread))
                    .route(web::post().to(create_reply))
                    .route(web::put().to(report_reply))
                    .route(web::delete().to(delete_reply)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState { pub service: BoardService }

/// Bodies arrive either as JSON or as a url-encoded HTML form. An empty body
/// is an empty field set so validation can name the first missing field.
fn decode_fields(req: &HttpRequest, body: &web::Bytes) -> Result<ThreadFields, ApiError> {
    if body.is_empty() {
        return Ok(ThreadFields::default());
    }
    if req.content_type().eq_ignore_ascii_case("application/json") {
        return serde_json::from_slice(body).map_err(|e| {
            log::debug!("rejecting json body: {e}");
            ApiError::InvalidBody
        });
    }
    let form = std::str::from_utf8(body).map_err(|_| ApiError::InvalidBody)?;
    web::Query::<ThreadFields>::from_query(form)
        .map(web::Query::into_inner)
        .map_err(|e| {
            log::debug!("rejecting form body: {e}");
            ApiError::InvalidBody
        })
}

fn redirect(location: String) -> HttpResponse {
    HttpResponse::Found().insert_header((header::LOCATION, location)).finish()
}

fn success() -> HttpResponse {
    HttpResponse::Ok().content_type(ContentType::plaintext()).body("success")
}

#[utoipa::path(
    get,
    path = "/api/threads/{board}",
    tag = "threads",
    params(("board" = String, Path, description = "Board name")),
    responses(
        (status = 200, description = "Up to 10 most recently bumped threads, 3 newest replies each", body = [ThreadView]),
        (status = 500, description = "Store unreachable or failed")
    )
)]
pub async fn list_threads(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let threads = data.service.list_recent_threads(&path).await?;
    Ok(HttpResponse::Ok().json(threads))
}

#[utoipa::path(
    post,
    path = "/api/threads/{board}",
    tag = "threads",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 302, description = "Thread created; redirects to the board view"),
        (status = 400, description = "text or delete_password missing"),
        (status = 500, description = "Store unreachable or failed")
    )
)]
pub async fn create_thread(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    let board = path.into_inner();
    data.service.create_thread(&board, &fields).await?;
    Ok(redirect(format!("/b/{}", urlencoding::encode(&board))))
}

#[utoipa::path(
    put,
    path = "/api/threads/{board}",
    tag = "threads",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 200, description = "Thread reported", body = String),
        (status = 400, description = "thread_id missing or malformed"),
        (status = 500, description = "Thread not found, or store failure")
    )
)]
pub async fn report_thread(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    data.service.report_thread(&path, &fields).await?;
    Ok(success())
}

#[utoipa::path(
    delete,
    path = "/api/threads/{board}",
    tag = "threads",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 200, description = "Thread removed", body = String),
        (status = 400, description = "Field missing or malformed, or incorrect password"),
        (status = 500, description = "Thread not found, or store failure")
    )
)]
pub async fn delete_thread(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    data.service.delete_thread(&path, &fields).await?;
    Ok(success())
}

#[utoipa::path(
    get,
    path = "/api/replies/{board}",
    tag = "replies",
    params(("board" = String, Path, description = "Board name"), ThreadQuery),
    responses(
        (status = 200, description = "Thread with every reply", body = ThreadView),
        (status = 400, description = "thread_id missing or malformed"),
        (status = 500, description = "Thread not found, or store failure")
    )
)]
pub async fn get_thread(req: HttpRequest, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let query = web::Query::<ThreadQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .map_err(|_| ApiError::Malformed("thread_id"))?;
    let thread = data.service.get_thread(&path, &query).await?;
    Ok(HttpResponse::Ok().json(thread))
}

#[utoipa::path(
    post,
    path = "/api/replies/{board}",
    tag = "replies",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 302, description = "Reply added; redirects to the thread view"),
        (status = 400, description = "Field missing or malformed"),
        (status = 500, description = "Thread not found, or store failure")
    )
)]
pub async fn create_reply(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    let board = path.into_inner();
    let (thread_id, _reply) = data.service.create_reply(&board, &fields).await?;
    Ok(redirect(format!("/b/{}/{}", urlencoding::encode(&board), thread_id)))
}

#[utoipa::path(
    put,
    path = "/api/replies/{board}",
    tag = "replies",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 200, description = "Reply reported", body = String),
        (status = 400, description = "thread_id or reply_id missing or malformed"),
        (status = 500, description = "Reply not found, or store failure")
    )
)]
pub async fn report_reply(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    data.service.report_reply(&path, &fields).await?;
    Ok(success())
}

#[utoipa::path(
    delete,
    path = "/api/replies/{board}",
    tag = "replies",
    params(("board" = String, Path, description = "Board name")),
    request_body = ThreadFields,
    responses(
        (status = 200, description = "Reply text replaced with the deletion marker", body = String),
        (status = 400, description = "Field missing or malformed, or incorrect password"),
        (status = 500, description = "Reply not found, or store failure")
    )
)]
pub async fn delete_reply(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    data.service.ready()?;
    let fields = decode_fields(&req, &body)?;
    data.service.delete_reply(&path, &fields).await?;
    Ok(success())
}
