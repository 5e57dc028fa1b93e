use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

use integration_operator::reconcilers::adapter::AdapterImages;
pub use integration_operator::{self, telemetry, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Registry the default adapter images are pulled from, as `<registry>/<kind>-adapter:<tag>`
    #[arg(
        long = "adapter-image-registry",
        env = "ADAPTER_IMAGE_REGISTRY",
        default_value = "ghcr.io/integrations"
    )]
    adapter_image_registry: String,

    /// Tag of the default adapter images
    #[arg(long = "adapter-image-tag", env = "ADAPTER_IMAGE_TAG", default_value = "latest")]
    adapter_image_tag: String,

    /// Number of components of each kind reconciled concurrently
    #[arg(long = "concurrency", env = "WORKER_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    #[arg(long = "bind-address", env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
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
    telemetry::init()?;

    let args: Arguments = Arguments::parse();

    // Initialize Kubernetes controller state
    let state = State::new(
        AdapterImages {
            registry: args.adapter_image_registry,
            tag: args.adapter_image_tag,
        },
        args.concurrency,
    );
    let controller = integration_operator::run(state.clone());
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
    .bind(&args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
