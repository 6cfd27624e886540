//! WebSocket endpoint feeding the realtime registry.
//!
//! Each socket gets a writer task draining its registry channel and a reader loop
//! answering pongs. Whichever side ends first tears the connection down.

use crate::error::GatewayError;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Uri},
    response::Response,
    Extension,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gateway_core::{
    context::{RequestContext, TENANT_ID_HEADER},
    realtime::{ConnectionRegistry, OutboundFrame, RealtimeMessage, Registration},
    runtime::GatewayRuntime,
};
use serde_json::json;
use std::sync::Arc;
use url::form_urlencoded;

/// Query parameter naming the tenant when the client cannot set headers.
const TENANT_QUERY_PARAM: &str = "tenant_id";

/// Upgrades to a realtime socket. Requests that are not valid upgrades get a 400 envelope.
pub async fn ws_handler(
    State(runtime): State<Arc<GatewayRuntime>>,
    Extension(mut context): Extension<RequestContext>,
    headers: HeaderMap,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            return GatewayError::BadRequest(rejection.body_text())
                .into_response_for(&context, runtime.config().is_production());
        }
    };

    if !headers.contains_key(TENANT_ID_HEADER) {
        if let Some(tenant) = tenant_from_query(uri.query()) {
            context.assign_tenant(tenant);
        }
    }

    let registry = runtime.registry().clone();
    upgrade.on_upgrade(move |socket| handle_socket(socket, registry, context))
}

fn tenant_from_query(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == TENANT_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|tenant| !tenant.is_empty())
}

async fn handle_socket(socket: WebSocket, registry: Arc<ConnectionRegistry>, context: RequestContext) {
    let Registration { id, mut outbound } =
        registry.register(&context.tenant_id, context.correlation_id.clone());

    registry.send_to(
        id,
        &RealtimeMessage::new(
            "connected",
            json!({
                "connection_id": id.to_string(),
                "tenant_id": context.tenant_id,
                "correlation_id": context.correlation_id.as_str(),
            }),
        ),
    );

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text.into()),
                OutboundFrame::Ping => Message::Ping(Bytes::new()),
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = {
        let registry = registry.clone();
        async move {
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Pong(_) => {
                        registry.record_pong(id);
                    }
                    Message::Close(_) => break,
                    Message::Text(text) => {
                        tracing::debug!(connection_id = %id, len = text.as_str().len(), "ignoring inbound realtime text");
                    }
                    Message::Binary(_) | Message::Ping(_) => {}
                }
            }
        }
    };

    tokio::select! {
        () = reader => {}
        _ = &mut writer => {}
    }

    registry.deregister(id);
    writer.abort();
}
