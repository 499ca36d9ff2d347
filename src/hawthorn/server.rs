// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref,
    clippy::useless_vec
)]

use actix_web::http::StatusCode;
use actix_web::middleware::DefaultHeaders;
use actix_web::{App, HttpResponse, HttpServer, Responder, middleware, web};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use stib::realtime::{StopResult, make_http_client};
use stib::{AggregationError, EngineConfig, RealtimeEngine, duration_since_unix_epoch};
use tracing::{info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

type Engine = RealtimeEngine<reqwest::Client>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, env = "HAWTHORN_BIND", default_value = "127.0.0.1:17420")]
    bind: String,
    #[arg(long, env = "HAWTHORN_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Seconds between directory rebuilds.
    #[arg(long, env = "REBUILD_INTERVAL_SECS", default_value_t = 3600)]
    rebuild_interval_secs: u64,
}

fn advisory_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Cache-Control", "no-cache"))
        .add(("Age", "0"))
        .add(("X-RateLimit-Limit", "256"))
        .add(("X-RateLimit-Remaining", "255"))
        .add(("X-RateLimit-Reset", "0"))
        .add(("X-Poll-Interval", "0"))
        .add(("X-Frame-Options", "deny"))
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Xss-Protection", "1; mode=block"))
        .add(("Content-Security-Policy", "default-src 'none'"))
        .add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubdomains; preload",
        ))
        .add(("Access-Control-Allow-Origin", "*"))
        .add((
            "Access-Control-Expose-Headers",
            "X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, X-Poll-Interval",
        ))
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn error_status(error: &AggregationError) -> StatusCode {
    match error {
        AggregationError::UnknownStop { .. } => StatusCode::NOT_FOUND,
        AggregationError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
        AggregationError::AllSourcesFailed { .. } | AggregationError::BatchFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        AggregationError::BudgetExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
    }
}

fn respond<T: Serialize>(result: Result<T, AggregationError>) -> HttpResponse {
    let now = http_date();

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => error_status(e),
    };

    let mut builder = HttpResponse::build(status);
    builder
        .insert_header(("Date", now.clone()))
        .insert_header(("Last-Modified", now));

    match result {
        Ok(body) => builder.json(body),
        Err(e) => builder.json(e),
    }
}

#[derive(Deserialize)]
struct HaltQuery {
    halt: String,
    attempts: Option<usize>,
}

#[derive(Deserialize)]
struct AttemptsQuery {
    attempts: Option<usize>,
}

#[derive(Deserialize)]
struct BatchQuery {
    stops: String,
    attempts: Option<usize>,
}

#[derive(Deserialize)]
struct NearestParams {
    lat: f64,
    lon: f64,
    k: Option<usize>,
    attempts: Option<usize>,
    budget: Option<usize>,
}

#[derive(Serialize)]
struct BatchResponse<'a> {
    results: Vec<&'a StopResult>,
    failed: &'a BTreeMap<String, AggregationError>,
}

#[derive(Serialize)]
struct Health {
    stops: usize,
    positioned: usize,
    time_ms: u128,
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain"))
        .body("Hello World from the STIB-MIVB Hawthorn HTTP endpoint!")
}

#[actix_web::get("/getwaitingtimes")]
async fn getwaitingtimes(
    engine: web::Data<Engine>,
    query: web::Query<HaltQuery>,
) -> impl Responder {
    respond(engine.waiting_times_for_halt(&query.halt, query.attempts).await)
}

#[actix_web::get("/realtime/{stop_id}")]
async fn realtime_stop(
    engine: web::Data<Engine>,
    path: web::Path<String>,
    query: web::Query<AttemptsQuery>,
) -> impl Responder {
    let stop_id = path.into_inner();
    respond(engine.aggregate(&stop_id, query.attempts).await)
}

#[actix_web::get("/realtime")]
async fn realtime_batch(
    engine: web::Data<Engine>,
    query: web::Query<BatchQuery>,
) -> impl Responder {
    let stop_ids = query
        .stops
        .split(',')
        .map(String::from)
        .collect::<Vec<String>>();

    match engine.aggregate_many(&stop_ids, query.attempts).await {
        Ok(batch) => respond::<BatchResponse>(Ok(BatchResponse {
            results: batch.in_requested_order(),
            failed: &batch.failed,
        })),
        Err(e) => respond::<BatchResponse>(Err(e)),
    }
}

#[actix_web::get("/nearest")]
async fn nearest(engine: web::Data<Engine>, query: web::Query<NearestParams>) -> impl Responder {
    respond(
        engine
            .select_nearest(
                query.lat,
                query.lon,
                query.k.unwrap_or(1),
                query.attempts,
                query.budget,
            )
            .await,
    )
}

#[actix_web::get("/stops/{stop_id}")]
async fn stop_details(engine: web::Data<Engine>, path: web::Path<String>) -> impl Responder {
    let stop_id = path.into_inner();
    respond(engine.stop_details(&stop_id).await)
}

#[actix_web::post("/rebuild")]
async fn rebuild(engine: web::Data<Engine>) -> impl Responder {
    match engine.rebuild_directory().await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => HttpResponse::BadGateway().json(serde_json::json!({
            "error": "directory_rebuild_failed",
            "message": e.to_string(),
        })),
    }
}

#[actix_web::get("/health")]
async fn health(engine: web::Data<Engine>) -> impl Responder {
    let directory = engine.directory().snapshot().await;

    HttpResponse::Ok().json(Health {
        stops: directory.len(),
        positioned: directory.positioned_len(),
        time_ms: duration_since_unix_epoch().as_millis(),
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env()?;

    let engine = web::Data::new(RealtimeEngine::new(make_http_client(), config));

    if engine.rebuild_directory().await.is_err() {
        warn!("starting with an empty directory");
    }

    let rebuild_engine = engine.clone();
    let rebuild_every = Duration::from_secs(args.rebuild_interval_secs.max(1));

    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(rebuild_every);
        // the first tick fires immediately and startup already rebuilt
        interval.tick().await;

        loop {
            interval.tick().await;
            let _ = rebuild_engine.rebuild_directory().await;
        }
    });

    info!(bind = %args.bind, workers = args.workers, "hawthorn listening");

    HttpServer::new(move || {
        App::new()
            .wrap(advisory_headers())
            .wrap(middleware::Compress::default())
            .app_data(engine.clone())
            .route("/", web::get().to(index))
            .service(getwaitingtimes)
            .service(realtime_stop)
            .service(realtime_batch)
            .service(nearest)
            .service(stop_details)
            .service(rebuild)
            .service(health)
    })
    .workers(args.workers)
    .bind(args.bind.as_str())?
    .run()
    .await?;

    Ok(())
}
