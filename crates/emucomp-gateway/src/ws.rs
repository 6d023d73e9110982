//! WebSocket side of the stream bridge.
//!
//! Binary and text frames from the client become bytes on the component's
//! socket; bytes from the socket go back as binary frames.

use axum::extract::ws::{CloseFrame as WsCloseFrame, Message, WebSocket};
use bytes::Bytes;
use emucomp_core::{
    BridgeMessage, Capability, ClientMessage, CloseFrame, ComponentManager, StreamBridge,
};
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;

/// Reason sent when the component cannot be bridged.
pub const COMPONENT_GONE: &str = "component is gone";

fn from_client(message: Result<Message, axum::Error>) -> Option<ClientMessage> {
    match message {
        Ok(Message::Binary(data)) => Some(ClientMessage::Data(Bytes::from(data))),
        Ok(Message::Text(text)) => Some(ClientMessage::Data(Bytes::from(text))),
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(ClientMessage::Close),
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket receive failed");
            Some(ClientMessage::Close)
        }
    }
}

fn to_client(message: BridgeMessage) -> Message {
    match message {
        BridgeMessage::Data(data) => Message::Binary(data.to_vec()),
        BridgeMessage::Close(frame) => Message::Close(Some(close_frame(frame))),
    }
}

fn close_frame(frame: CloseFrame) -> WsCloseFrame<'static> {
    WsCloseFrame {
        code: frame.code,
        reason: frame.reason.into(),
    }
}

/// Bridge an upgraded socket to connector `protocol` of `component_id`.
pub async fn serve(
    socket: WebSocket,
    manager: Arc<ComponentManager>,
    component_id: String,
    protocol: String,
) {
    let (mut sink, stream) = socket.split();
    let request_id = uuid::Uuid::new_v4().simple().to_string();

    let opened = match manager
        .get_component_by_id(&component_id, Capability::Any)
        .await
    {
        Ok(component) => StreamBridge::open(&component, &protocol, &request_id).await,
        Err(e) => Err(e),
    };
    let bridge = match opened {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::warn!(
                component_id = %component_id,
                protocol = %protocol,
                error = %e,
                "Cannot bridge WebSocket"
            );
            let close = Message::Close(Some(close_frame(CloseFrame::going_away(COMPONENT_GONE))));
            if let Err(e) = sink.send(close).await {
                tracing::debug!(error = %e, "Failed to send close frame");
            }
            return;
        }
    };

    tracing::info!(
        component_id = %component_id,
        protocol = %protocol,
        request_id = %request_id,
        "WebSocket bridge opened"
    );

    let inbound = stream.filter_map(|m| future::ready(from_client(m)));
    let outbound = sink.with(|m| future::ready(Ok::<_, axum::Error>(to_client(m))));
    let end = bridge.run(inbound, outbound).await;

    tracing::info!(
        component_id = %component_id,
        protocol = %protocol,
        request_id = %request_id,
        reason = %end,
        "WebSocket bridge closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_mapping() {
        assert_eq!(
            from_client(Ok(Message::Binary(vec![1, 2]))),
            Some(ClientMessage::Data(Bytes::from_static(&[1, 2])))
        );
        assert_eq!(
            from_client(Ok(Message::Text("info\n".into()))),
            Some(ClientMessage::Data(Bytes::from_static(b"info\n")))
        );
        assert_eq!(from_client(Ok(Message::Ping(vec![]))), None);
        assert_eq!(from_client(Ok(Message::Close(None))), Some(ClientMessage::Close));
    }

    #[test]
    fn test_outbound_close_frame() {
        match to_client(BridgeMessage::Close(CloseFrame::going_away(COMPONENT_GONE))) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason, COMPONENT_GONE);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(matches!(
            to_client(BridgeMessage::Data(Bytes::from_static(b"x"))),
            Message::Binary(data) if data == b"x"
        ));
    }
}
