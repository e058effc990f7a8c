extern crate actix_web;
extern crate chrono;
#[macro_use]
extern crate serde;
extern crate serde_json;

use actix_cors::Cors;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_batteries::{prelude::*, OpenTelemetry, Sentry, Session};

#[macro_use]
mod macros;

mod api;
mod feeds;
mod models;
mod normalizer;
mod telemetry;
mod utils;

use actix_web::{App, HttpServer};
use telemetry::TracingLogger;

/// Serves a directory of feeds, normalizing request paths to lowercase and
/// redirecting directory-style paths to the feed they contain.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The directory containing the feeds (and any supporting files) to serve.
    ///
    /// A request for `/blog` is redirected to `/blog/feed.xml`, which is then served from
    /// `<public-dir>/blog/feed.xml`.
    #[arg(long, global = true, default_value = "public", env = "PUBLIC_DIR")]
    public_dir: PathBuf,

    /// The port to listen for incoming requests on.
    #[arg(short, long, global = true, default_value_t = 8000, env = "PORT")]
    port: u16,

    /// The name of the service which will be reported to OpenTelemetry endpoints.
    #[arg(long, env = "SERVICE_NAME", default_value = "feedroute")]
    service_name: String,

    /// The Sentry DSN to use for error reporting.
    #[arg(long, env = "SENTRY_DSN")]
    sentry_dsn: Option<String>,

    /// The environment to report to Sentry.
    #[arg(long, env = "SENTRY_ENVIRONMENT")]
    sentry_environment: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the feeds over HTTP. This is the default when no command is given.
    Serve,

    /// Pull new episodes into each feed from the upstream feeds listed alongside it.
    Update {
        /// The file, within each feed directory, listing upstream feed URLs (one per line).
        #[arg(long, default_value = feeds::SOURCE_FILE)]
        source_file: String,

        /// Only take episodes whose title contains this text, numbering them into a single
        /// season and applying the feed's OP3 prefix to their enclosures.
        #[arg(long)]
        title_contains: Option<String>,
    },

    /// Re-apply the channel metadata from each feed's `feed0.xml` template.
    Refresh,
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let session = Session::new(args.service_name, version!("v"))
        .with_battery(Sentry::new((
            args.sentry_dsn.unwrap_or_default(),
            sentry::ClientOptions {
                environment: args.sentry_environment.map(|v| v.into()),
                ..Default::default()
            },
        )))
        .with_battery(OpenTelemetry::new(""));

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&args.public_dir, args.port).await,
        Command::Update {
            source_file,
            title_contains,
        } => {
            update(
                &args.public_dir,
                feeds::UpdateOptions {
                    source_file,
                    title_filter: title_contains,
                },
            )
            .await
        }
        Command::Refresh => refresh(&args.public_dir).await,
    };

    session.shutdown();
    result
}

async fn serve(public_dir: &Path, port: u16) -> std::io::Result<()> {
    let state = models::GlobalState::new(public_dir);
    if !state.health().await.ok {
        warn!(
            "The public directory {} does not exist, all feed requests will fail",
            public_dir.display()
        );
    }

    info!("Serving feeds from {} on :{}", public_dir.display(), port);
    HttpServer::new(move || {
        App::new()
            .app_data(actix_web::web::Data::new(state.clone()))
            .wrap(TracingLogger)
            .wrap(Cors::default().allow_any_origin().send_wildcard())
            .configure(api::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
    .map_err(|err| {
        error!("The server exited unexpectedly: {}", err);
        sentry::capture_event(sentry::protocol::Event {
            message: Some(format!("Server Exited Unexpectedly: {}", err)),
            level: sentry::protocol::Level::Fatal,
            ..Default::default()
        });

        err
    })
}

async fn update(public_dir: &Path, options: feeds::UpdateOptions) -> std::io::Result<()> {
    let added = feeds::FeedUpdater::new(options)
        .map_err(std::io::Error::other)?
        .update_all(public_dir)
        .await
        .map_err(|err| {
            error!({ exception.message = %err }, "Failed to update the feeds in {}", public_dir.display());
            std::io::Error::other(err)
        })?;

    info!("Added {} new episodes across the feeds in {}", added, public_dir.display());
    Ok(())
}

async fn refresh(public_dir: &Path) -> std::io::Result<()> {
    let refreshed = feeds::refresh_all(public_dir).await.map_err(|err| {
        error!({ exception.message = %err }, "Failed to refresh the feeds in {}", public_dir.display());
        std::io::Error::other(err)
    })?;

    info!("Refreshed {} feeds in {}", refreshed, public_dir.display());
    Ok(())
}
