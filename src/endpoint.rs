use crate::shutdown::{ShutdownReason, ShutdownSignal};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    routing::any,
    Router,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// How long in-flight requests may run once shutdown has been requested.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub const QUIT_BODY: &str = "Shutting down...\n";
pub const HEALTH_BODY: &str = "OK\n";

/// `/quit` and `/health`; every other path falls through to axum's 404.
pub fn router(shutdown: ShutdownSignal) -> Router {
    Router::new()
        .route("/quit", any(quit))
        .route("/health", any(health))
        .layer(TraceLayer::new_for_http())
        .with_state(shutdown)
}

async fn quit(
    State(shutdown): State<ShutdownSignal>,
    request: Request,
) -> (StatusCode, &'static str) {
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(remote)) => {
            tracing::info!(remote = %remote, "received shutdown request")
        }
        None => tracing::info!("received shutdown request"),
    }
    shutdown.trigger(ShutdownReason::QuitRequest);
    (StatusCode::OK, QUIT_BODY)
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, HEALTH_BODY)
}

/// Bind `0.0.0.0:<port>` and serve until shutdown.
///
/// A bind failure is logged and ends the task; the other shutdown triggers
/// keep working without the HTTP surface.
pub async fn run(port: String, shutdown: ShutdownSignal, drain_timeout: Duration) {
    let addr = format!("0.0.0.0:{port}");
    tracing::info!("starting HTTP server on {addr}");

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "HTTP server error");
            return;
        }
    };

    serve(listener, shutdown, drain_timeout).await;
}

/// Serve on an already-bound listener. Once shutdown is requested, stop
/// accepting and give in-flight requests up to `drain_timeout` to finish.
pub async fn serve(listener: TcpListener, shutdown: ShutdownSignal, drain_timeout: Duration) {
    match listener.local_addr() {
        Ok(local_addr) => tracing::info!("HTTP server listening on {local_addr}"),
        Err(e) => tracing::debug!(error = %e, "could not read listener address"),
    }

    let app = router(shutdown.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let graceful = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.wait().await;
        }
    };
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            // Serving ended before anyone asked it to.
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
            return;
        }
        _ = shutdown.wait() => {}
    }

    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "HTTP server shutdown error"),
        Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server task failed during shutdown"),
        Err(_) => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs_f64(),
                "HTTP server shutdown error: drain timed out"
            );
            server.abort();
        }
    }
    tracing::info!("HTTP server stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Method;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    async fn send(shutdown: &ShutdownSignal, method: Method, uri: &str) -> (StatusCode, String) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router(shutdown.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_has_no_side_effects() {
        let shutdown = ShutdownSignal::new();
        let (status, body) = send(&shutdown, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK\n");
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_health_after_shutdown_still_ok() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger(ShutdownReason::StopFile);
        let (status, body) = send(&shutdown, Method::HEAD, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty() || body == "OK\n");
    }

    #[tokio::test]
    async fn test_quit_triggers_shutdown() {
        let shutdown = ShutdownSignal::new();
        let (status, body) = send(&shutdown, Method::GET, "/quit").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Shutting down...\n");
        assert_eq!(shutdown.reason(), Some(ShutdownReason::QuitRequest));
    }

    #[tokio::test]
    async fn test_quit_is_method_agnostic_and_repeatable() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger(ShutdownReason::StopFile);

        for method in [Method::POST, Method::GET, Method::PUT] {
            let (status, body) = send(&shutdown, method, "/quit").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, QUIT_BODY);
        }
        // The earlier trigger keeps its claim.
        assert_eq!(shutdown.reason(), Some(ShutdownReason::StopFile));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let shutdown = ShutdownSignal::new();
        for uri in ["/", "/quitnow", "/health/x", "/api/quit"] {
            let (status, _) = send(&shutdown, Method::GET, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
        assert!(!shutdown.is_triggered());
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serve_quit_over_tcp_then_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();

        let task = tokio::spawn(serve(
            listener,
            shutdown.clone(),
            Duration::from_secs(2),
        ));

        let health = raw_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("OK\n"));
        assert!(!shutdown.is_triggered());

        let quit = raw_get(addr, "/quit").await;
        assert!(quit.starts_with("HTTP/1.1 200"));
        assert!(quit.ends_with("Shutting down...\n"));

        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shutdown.reason(), Some(ShutdownReason::QuitRequest));
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_is_bounded_by_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();

        let task = tokio::spawn(serve(
            listener,
            shutdown.clone(),
            Duration::from_millis(200),
        ));

        // An idle keep-alive connection that never completes a request.
        let mut idle = tokio::net::TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET /health HTTP/1.1\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.trigger(ShutdownReason::StopFile);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_bind_failure_returns() {
        let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();
        let shutdown = ShutdownSignal::new();

        tokio::time::timeout(
            Duration::from_secs(1),
            run(port.to_string(), shutdown.clone(), DEFAULT_DRAIN_TIMEOUT),
        )
        .await
        .unwrap();
        assert!(!shutdown.is_triggered());
    }
}
