use std::net::SocketAddr;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use prometheus::{Encoder, TextEncoder};

pub use nodepool_operator::{self, providers::StaticImageProvider, telemetry, Metrics, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Address the metrics and health endpoints listen on
    #[arg(long, env = "NODEPOOL_OPERATOR_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Maximum number of NodePools reconciled at once; 0 means unbounded
    #[arg(long, env = "NODEPOOL_OPERATOR_CONCURRENCY", default_value_t = 1)]
    concurrency: u16,

    /// Only reconcile NodePools in this namespace
    #[arg(long, env = "NODEPOOL_OPERATOR_WATCH_NAMESPACE", value_name = "NAMESPACE")]
    watch_namespace: Option<String>,

    /// Worker AMI used when a cluster's region has no explicit entry
    #[arg(long, env = "NODEPOOL_OPERATOR_DEFAULT_AMI", value_name = "AMI")]
    default_ami: Option<String>,

    /// Worker AMI for one region, as REGION=AMI. May be repeated
    #[arg(
        long = "region-ami",
        env = "NODEPOOL_OPERATOR_REGION_AMIS",
        value_name = "REGION=AMI",
        value_delimiter = ','
    )]
    region_amis: Vec<String>,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(err) = encoder.encode(&metrics, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }
    HttpResponse::Ok().body(buffer)
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let args: Arguments = Arguments::parse();

    let by_region = StaticImageProvider::parse_region_amis(&args.region_amis)
        .map_err(anyhow::Error::msg)
        .context("invalid --region-ami")?;
    let images = StaticImageProvider::new(args.default_ami, by_region);

    // Initiatilize Kubernetes controller state
    let state = State::new(args.watch_namespace, args.concurrency, images);
    let client = Client::try_default()
        .await
        .context("failed to create kube Client")?;
    let controller_metrics = Metrics::default().register(&state.registry)?;

    let controller = nodepool_operator::run(client, controller_metrics, state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
