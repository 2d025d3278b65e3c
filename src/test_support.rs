use axum::Router;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral localhost port and returns its base URL.
/// The server lives until the test runtime shuts down.
pub(crate) async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
