use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::routes::{AppState, router};

/// Serve the API on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> Result<()> {
  let app = router(state);
  info!(addr = %listener.local_addr()?, "server listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;

  info!("server stopped");
  Ok(())
}
