mod admin;
mod middleware;
mod public;

pub use admin::{
    AdminState, HealthResponse, InvalidateRequest, InvalidateResponse, build_admin_router,
};
pub use middleware::RequestContext;
pub use public::{ContentError, ContentRoot, HttpState, build_router, storefront_routes};

use tokio::sync::watch;
use tracing::{info, warn};

/// Resolves once shutdown has been broadcast, for `with_graceful_shutdown`.
pub async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|requested| *requested).await;
}

/// Broadcast Ctrl-C to every listener.
pub fn spawn_ctrl_c_listener() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(target = "storefront::http", "shutdown requested"),
            Err(err) => {
                warn!(
                    target = "storefront::http",
                    error = %err,
                    "failed to listen for ctrl-c, graceful shutdown disabled"
                );
                std::future::pending::<()>().await;
            }
        }
        let _ = sender.send(true);
    });
    receiver
}
