use std::{process, sync::Arc, time::Duration};

use storefront_cache::{
    config::{self, CheckArgs, InvalidateArgs, Settings},
    error::AppError,
    infra::{
        checker,
        error::InfraError,
        http::{
            self, AdminState, ContentRoot, HttpState, shutdown_signal, spawn_ctrl_c_listener,
            storefront_routes,
        },
        services::CacheServices,
        telemetry,
    },
    instrumentation::TracingSink,
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(error) => {
            report_application_error(&error);
            process::exit(1);
        }
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<i32, AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await.map(|()| 0),
        config::Command::Check(args) => Ok(run_check(settings, args).await),
        config::Command::Invalidate(args) => run_invalidate(settings, args).await.map(|()| 0),
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let services = CacheServices::from_settings(&settings, Arc::new(TracingSink))?;

    if !services.config.enabled {
        warn!(
            target = "storefront::serve",
            "response cache disabled; serving every request uncached"
        );
    }

    let http_state = HttpState {
        content: Arc::new(ContentRoot::new(settings.content.root.clone())),
        models: services.models.clone(),
        model_lifetime: services.config.lifetime(),
    };
    let admin_state = AdminState {
        store: services.store.clone(),
        invalidator: services.invalidator.clone(),
    };
    let cache_state = services
        .config
        .enabled
        .then(|| services.response_state(storefront_routes()));

    let public_router = http::build_router(http_state, cache_state);
    let admin_router = http::build_admin_router(admin_state);

    serve_http(&settings, public_router, admin_router).await
}

async fn serve_http(
    settings: &Settings,
    public_router: axum::Router,
    admin_router: axum::Router,
) -> Result<(), AppError> {
    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "storefront::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        content_root = %settings.content.root.display(),
        "listening"
    );

    let shutdown = spawn_ctrl_c_listener();
    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()));

    let servers = async {
        try_join!(public_server, admin_server)
            .map(|_| ())
            .map_err(|err| AppError::unexpected(format!("server error: {err}")))
    };

    tokio::select! {
        result = servers => result,
        () = drain_deadline(shutdown, settings.server.graceful_shutdown) => {
            warn!(
                target = "storefront::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

/// Resolves `grace` after shutdown was requested.
async fn drain_deadline(shutdown: watch::Receiver<bool>, grace: Duration) {
    shutdown_signal(shutdown).await;
    tokio::time::sleep(grace).await;
}

async fn run_check(settings: Settings, args: CheckArgs) -> i32 {
    let report = checker::run_checks(&settings).await;

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(target = "storefront::check", error = %err, "failed to encode report");
                return 1;
            }
        }
    } else {
        println!("{report}");
    }

    if report.has_failures() { 1 } else { 0 }
}

async fn run_invalidate(settings: Settings, args: InvalidateArgs) -> Result<(), AppError> {
    let services = CacheServices::from_settings(&settings, Arc::new(TracingSink))?;

    let evicted = match (args.pattern, args.entity, args.id) {
        (Some(pattern), _, _) => services.invalidator.invalidate(&pattern).await?,
        (None, Some(entity), Some(id)) => {
            services
                .invalidator
                .on_entity_mutated(&entity, &id)
                .await?
        }
        _ => {
            return Err(AppError::validation(
                "invalidate requires a pattern or --entity with --id",
            ));
        }
    };

    println!("evicted {evicted} key(s)");
    Ok(())
}
