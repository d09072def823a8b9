//! Actix Web server exposing the viewer page, the MJPEG and SSE feeds, and
//! a few JSON/Prometheus endpoints.
//!
//! The server runs on its own thread with its own Actix system so the frame
//! pipeline never shares a runtime with client I/O.

use std::{net::SocketAddr, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    engagement::{
        publish::{FRAME_BOUNDARY, mjpeg_stream, stats_stream},
        shared::{FrameReader, StatsReader},
        telemetry,
    },
    html::VIEWER_HTML,
};

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) stats: StatsReader,
    pub(crate) frames: FrameReader,
    pub(crate) stats_period: Duration,
}

/// Handle for the server thread.
pub(crate) struct PreviewServer {
    addrs: Vec<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    pub(crate) fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Bind `bind:port`, start serving on a dedicated thread and wait until the
/// listener is up.
pub(crate) fn spawn_preview_server(
    state: ServerState,
    bind: &str,
    port: u16,
) -> Result<PreviewServer> {
    let addr = (bind.to_string(), port);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) =
        crossbeam_channel::bounded::<std::result::Result<Vec<SocketAddr>, String>>(1);

    let handle = telemetry::spawn_thread("engagement-http", move || {
        let _server_span = tracing::info_span!("http.server", bind = %addr.0, port = addr.1).entered();
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(configure)
            })
            .workers(2)
            .shutdown_timeout(5)
            .bind(&addr);

            let server = match server {
                Ok(server) => server,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("failed to bind {}:{}: {err}", addr.0, addr.1)));
                    return Ok(());
                }
            };
            let _ = ready_tx.send(Ok(server.addrs()));
            let server = server.run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;

    let addrs = match ready_rx.recv() {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(message)) => {
            let _ = handle.join();
            return Err(anyhow!(message));
        }
        Err(_) => {
            let _ = handle.join();
            return Err(anyhow!("HTTP server thread exited before binding"));
        }
    };
    info!("HTTP server listening on {addrs:?}");

    Ok(PreviewServer {
        addrs,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Register every route. `ServerState` must be provided as app data.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/video_feed", web::get().to(video_feed_handler))
        .route("/stats_feed", web::get().to(stats_feed_handler))
        .route("/stats", web::get().to(stats_handler))
        .route("/frame.jpg", web::get().to(frame_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Keeps `engagement_stream_clients{feed}` in step with open streams.
struct ClientGauge(&'static str);

impl ClientGauge {
    fn connect(feed: &'static str) -> Self {
        metrics::gauge!("engagement_stream_clients", "feed" => feed).increment(1.0);
        Self(feed)
    }
}

impl Drop for ClientGauge {
    fn drop(&mut self) {
        metrics::gauge!("engagement_stream_clients", "feed" => self.0).decrement(1.0);
    }
}

fn counted<S>(feed: &'static str, inner: S) -> impl Stream<Item = Result<Bytes, actix_web::Error>>
where
    S: Stream<Item = Result<Bytes, actix_web::Error>>,
{
    stream! {
        let _client = ClientGauge::connect(feed);
        let mut inner = Box::pin(inner);
        while let Some(chunk) = inner.next().await {
            yield chunk;
        }
    }
}

fn streaming_response(content_type: String) -> actix_web::HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONTENT_TYPE, content_type));
    builder
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(VIEWER_HTML)
}

/// Stream the annotated frames as multipart MJPEG.
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    let frames = counted("video", mjpeg_stream(state.frames.clone()));
    streaming_response(format!(
        "multipart/x-mixed-replace; boundary={FRAME_BOUNDARY}"
    ))
    .streaming(frames)
}

/// Stream stats snapshots as Server-Sent Events.
async fn stats_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
    let events = counted("stats", stats_stream(state.stats.clone(), state.stats_period));
    streaming_response("text/event-stream".to_string())
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(events)
}

/// Current stats snapshot as JSON.
async fn stats_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.stats.current().to_event())
}

/// Latest annotated frame, or 204 before the first one.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.frames.current() {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .insert_header(("X-Frame-Number", packet.frame_number.to_string()))
            .insert_header(("X-Timestamp-Ms", packet.timestamp_ms.to_string()))
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test as web_test};
    use ml_core::Label;

    use super::*;
    use crate::engagement::{
        data::{FramePacket, Level, StatsSnapshot},
        shared::{FrameWriter, StatsWriter, snapshot_cell},
    };

    fn state() -> (ServerState, StatsWriter, FrameWriter) {
        let (stats_tx, stats) = snapshot_cell(StatsSnapshot::default());
        let (frames_tx, frames) = snapshot_cell(None);
        let state = ServerState {
            stats,
            frames,
            stats_period: Duration::from_millis(200),
        };
        (state, stats_tx, frames_tx)
    }

    fn packet() -> FramePacket {
        FramePacket {
            jpeg: Bytes::from_static(b"\xff\xd8jpeg\xff\xd9"),
            frame_number: 7,
            timestamp_ms: 42,
        }
    }

    macro_rules! service {
        ($state:expr) => {
            web_test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn index_embeds_both_feeds() {
        let (state, _stats, _frames) = state();
        let app = service!(state);
        let resp = web_test::call_service(&app, web_test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = web_test::read_body(resp).await;
        let html = std::str::from_utf8(&body).unwrap();
        assert!(html.contains("/video_feed"));
        assert!(html.contains("/stats_feed"));
    }

    #[actix_web::test]
    async fn stats_reports_the_current_snapshot() {
        let (state, stats, _frames) = state();
        stats.publish(StatsSnapshot {
            fps: 25,
            level: Level::NoFace,
            modus: Some(Label(3)),
        });
        let app = service!(state);
        let req = web_test::TestRequest::get().uri("/stats").to_request();
        let json: serde_json::Value = web_test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            json,
            serde_json::json!({"fps": 25, "level": "No face detected", "modus": "3"})
        );
    }

    #[actix_web::test]
    async fn frame_endpoint_waits_for_the_first_frame() {
        let (state, _stats, frames) = state();
        let app = service!(state);

        let req = web_test::TestRequest::get().uri("/frame.jpg").to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        frames.publish(Some(packet()));
        let req = web_test::TestRequest::get().uri("/frame.jpg").to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("X-Frame-Number").unwrap(), "7");
        assert_eq!(web_test::read_body(resp).await, packet().jpeg);
    }

    #[actix_web::test]
    async fn video_feed_ends_with_the_pipeline() {
        let (state, _stats, frames) = state();
        frames.publish(Some(packet()));
        drop(frames);
        let app = service!(state);

        let req = web_test::TestRequest::get().uri("/video_feed").to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "multipart/x-mixed-replace; boundary=frame"
        );
        let body = web_test::read_body(resp).await;
        assert_eq!(
            &body[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8jpeg\xff\xd9\r\n"
        );
    }

    #[actix_web::test]
    async fn stats_feed_is_an_event_stream() {
        let (state, stats, _frames) = state();
        drop(stats);
        let app = service!(state);

        let req = web_test::TestRequest::get().uri("/stats_feed").to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert!(web_test::read_body(resp).await.is_empty());
    }

    #[actix_web::test]
    async fn metrics_render_prometheus_text() {
        telemetry::init_metrics_recorder();
        let (state, _stats, _frames) = state();
        let app = service!(state);
        let req = web_test::TestRequest::get().uri("/metrics").to_request();
        let resp = web_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn busy_ports_are_reported_as_bind_failures() {
        let (state, _stats, _frames) = state();
        let first = spawn_preview_server(state.clone(), "127.0.0.1", 0).unwrap();
        let port = first.addrs()[0].port();
        assert_ne!(port, 0);

        let err = spawn_preview_server(state, "127.0.0.1", port).err().unwrap();
        assert!(err.to_string().contains("failed to bind"));
        first.stop();
    }
}
