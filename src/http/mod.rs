pub mod callback;
mod http_error;
mod info;
mod page;

use self::http_error::HttpError;
use self::info::{CommandInfo, RunInfo};
use self::page::Page;
use crate::database::{Command, Database};
use crate::executor::Executor;
use actix_web::dev::Server;
use actix_web::http::{header, Method};
use actix_web::middleware::{Compress, DefaultHeaders};
use actix_web::web::{self, Bytes, Data, Json, PayloadConfig, Path, Query, ServiceConfig};
use actix_web::{get, App, HttpRequest, HttpResponse, HttpServer, Responder};
use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DASHBOARD_RUNS: i64 = 20;
const RUNS_PER_PAGE: i64 = 10;

pub struct AppState {
    pub db: Arc<Database>,
    pub executor: Arc<dyn Executor>,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<String>,
}

fn load_command(db: &Database, slug: &str) -> Result<Command, HttpError> {
    db.get_command(slug)?.ok_or(HttpError::NotFound)
}

fn load_commands(db: &Database) -> Result<Vec<CommandInfo>> {
    db.get_commands()?
        .into_iter()
        .map(|command| CommandInfo::load(db, command))
        .collect()
}

/// Load a page of runs, optionally restricted to a single command
fn load_runs(
    db: &Database,
    slug: Option<&str>,
    requested_page: Option<&str>,
) -> Result<(Page, Vec<RunInfo>)> {
    let page = Page::select(db.count_runs(slug)?, RUNS_PER_PAGE, requested_page);
    let runs = db
        .get_runs(slug, page.offset(), page.limit())?
        .into_iter()
        .map(RunInfo::from)
        .collect();
    Ok((page, runs))
}

#[get("/")]
async fn dashboard(data: Data<AppState>) -> Result<impl Responder, HttpError> {
    let runs = data
        .db
        .get_runs(None, 0, DASHBOARD_RUNS)?
        .into_iter()
        .map(RunInfo::from)
        .collect::<Vec<_>>();
    Ok(Json(json!({
        "commands": load_commands(&data.db)?,
        "runs": runs,
    })))
}

#[get("/commands/")]
async fn command_list(data: Data<AppState>) -> Result<impl Responder, HttpError> {
    let commands = load_commands(&data.db)?;
    if commands.is_empty() {
        return Err(HttpError::NotFound);
    }
    Ok(Json(commands))
}

#[get("/commands/{slug}/")]
async fn command_detail(
    slug: Path<String>,
    query: Query<PageQuery>,
    data: Data<AppState>,
) -> Result<impl Responder, HttpError> {
    let command = load_command(&data.db, &slug)?;
    let (page, runs) = load_runs(&data.db, Some(command.slug.as_str()), query.page.as_deref())?;
    Ok(Json(json!({
        "command": CommandInfo::load(&data.db, command)?,
        "runs": runs,
        "page": page,
    })))
}

#[get("/runs/")]
async fn run_list(query: Query<PageQuery>, data: Data<AppState>) -> Result<impl Responder, HttpError> {
    let (page, runs) = load_runs(&data.db, None, query.page.as_deref())?;
    Ok(Json(json!({
        "runs": runs,
        "page": page,
    })))
}

#[get("/commands/{slug}/run/")]
async fn run_command(slug: Path<String>, data: Data<AppState>) -> Result<HttpResponse, HttpError> {
    let command = load_command(&data.db, &slug)?;
    let run = data.executor.execute(&command).await?;
    Ok(HttpResponse::Found()
        .insert_header((header::LOCATION, run.url()))
        .finish())
}

#[get("/commands/{slug}/{run_id}/")]
async fn run_detail(
    path: Path<(String, String)>,
    data: Data<AppState>,
) -> Result<impl Responder, HttpError> {
    let (slug, run_id) = path.into_inner();
    let run_id = run_id.parse::<i32>().map_err(|_| HttpError::NotFound)?;
    let command = load_command(&data.db, &slug)?;
    let run = data
        .db
        .get_run(&command.slug, run_id)?
        .ok_or(HttpError::NotFound)?;
    Ok(Json(json!({
        "command": CommandInfo::load(&data.db, command)?,
        "run": RunInfo::from(run),
    })))
}

// Registered for every method so that the callback itself can reject anything other than POST
async fn run_hook(
    req: HttpRequest,
    path: Path<(String, String)>,
    body: Bytes,
    data: Data<AppState>,
) -> Result<HttpResponse, HttpError> {
    let (slug, run_id) = path.into_inner();
    let Ok(run_id) = run_id.parse::<i32>() else {
        // A run id that isn't a number can't match any run
        return Err(if req.method() == Method::POST {
            HttpError::NotFound
        } else {
            HttpError::MethodNotAllowed
        });
    };
    callback::handle(&data.db, req.method(), &slug, run_id, &body)?;
    Ok(HttpResponse::Ok().finish())
}

/// Register all of the routes
/// Webhook bodies larger than `max_result_size` bytes are rejected with 413 Payload Too Large.
pub fn configure(max_result_size: usize) -> impl FnOnce(&mut ServiceConfig) {
    move |config| {
        config
            .service(dashboard)
            .service(command_list)
            .service(run_list)
            .service(command_detail)
            // Must be registered before `run_detail`, which would otherwise match `run` as a run id
            .service(run_command)
            .service(run_detail)
            .service(
                web::resource("/commands/{slug}/{run_id}/hook/")
                    .app_data(PayloadConfig::new(max_result_size))
                    .route(web::route().to(run_hook)),
            );
    }
}

fn default_headers() -> DefaultHeaders {
    DefaultHeaders::new().add(("X-Powered-By", "asteroid"))
}

/// Create the HTTP server
pub fn create_server(
    state: AppState,
    host: &str,
    port: u16,
    max_result_size: usize,
) -> Result<Server> {
    let data = Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::clone(&data))
            .wrap(default_headers())
            .wrap(Compress::default())
            .configure(configure(max_result_size))
    })
    .bind((host, port))
    .with_context(|| format!("Failed to bind HTTP server to {host}:{port}"))?
    .run();
    info!("Listening on http://{host}:{port}");
    Ok(server)
}
