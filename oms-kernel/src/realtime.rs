/**
 * REALTIME CHANNEL - WebSocket sessions on /ws
 *
 * ROLE:
 * One task pair per client. The reader parses `{"event","data"}` frames and
 * applies them (room joins/leaves, manual overrides, device and vehicle
 * reports). The writer drains the connection's room queue into the socket.
 *
 * A frame that fails to parse or to apply is logged and dropped; the session
 * stays up. A writer that cannot send within SEND_TIMEOUT ends the session:
 * the reader stops and the connection leaves every room.
 */

use crate::error::KernelError;
use crate::events::ClientMessage;
use crate::rooms::{ConnectionId, EventReceiver, Room};
use crate::state::SharedState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: SharedState) {
    let (conn, events) = state.rooms.connect();
    let (sink, stream) = socket.split();
    run_session(&state, conn, events, stream, sink).await;
}

/// Reads frames until the client leaves or the writer gives up, then drops
/// the connection from every room.
async fn run_session<R, W, E>(
    state: &SharedState,
    conn: ConnectionId,
    events: EventReceiver,
    mut stream: R,
    sink: W,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
{
    let mut writer = tokio::spawn(write_events(conn, sink, events));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(state, conn, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%conn, "websocket read error: {}", e);
                    break;
                }
            },
            _ = &mut writer => {
                tracing::debug!(%conn, "writer stopped, ending session");
                break;
            }
        }
    }

    state.rooms.disconnect(conn);
    writer.abort();
}

async fn write_events<W>(conn: ConnectionId, mut sink: W, mut events: EventReceiver)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(event) = events.recv().await {
        let text = match serde_json::to_string(&*event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(%conn, event = event.name(), "failed to encode event: {}", e);
                continue;
            }
        };
        match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%conn, "websocket send failed: {}", e);
                break;
            }
            Err(_) => {
                tracing::warn!(%conn, "websocket send timed out, closing");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn handle_frame(state: &SharedState, conn: ConnectionId, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(%conn, "dropping malformed client frame: {}", e);
            return;
        }
    };
    if let Err(e) = handle_client_message(state, conn, msg).await {
        tracing::warn!(%conn, "client event rejected: {}", e);
    }
}

/// Applies one client event on behalf of `conn`.
pub async fn handle_client_message(
    state: &SharedState,
    conn: ConnectionId,
    msg: ClientMessage,
) -> Result<(), KernelError> {
    match msg {
        ClientMessage::JoinBus(id) => join(state, conn, Room::Bus(id)),
        ClientMessage::JoinRoute(id) => join(state, conn, Room::Route(id)),
        ClientMessage::JoinStation(id) => join(state, conn, Room::Station(id)),
        ClientMessage::JoinAdmin => join(state, conn, Room::Admin),
        ClientMessage::JoinGuard => join(state, conn, Room::Guard),
        ClientMessage::LeaveBus(id) => leave(state, conn, Room::Bus(id)),
        ClientMessage::LeaveRoute(id) => leave(state, conn, Room::Route(id)),
        ClientMessage::LeaveStation(id) => leave(state, conn, Room::Station(id)),
        ClientMessage::LeaveAdmin => leave(state, conn, Room::Admin),
        ClientMessage::LeaveGuard => leave(state, conn, Room::Guard),
        ClientMessage::ManualOccupancy(req) => {
            state.pipeline.manual_override(req).await?;
        }
        ClientMessage::CameraStatus(report) => {
            state.pipeline.camera_status(report)?;
        }
        ClientMessage::BusLocation(report) => {
            state.pipeline.bus_location(report);
        }
        ClientMessage::ArrivalUpdate(report) => {
            state.pipeline.arrival_update(report);
        }
        ClientMessage::SystemStatus(report) => {
            state.pipeline.system_status(report);
        }
    }
    Ok(())
}

fn join(state: &SharedState, conn: ConnectionId, room: Room) {
    if state.rooms.join(conn, room.clone()) {
        tracing::info!(%conn, %room, "client joined");
    }
}

fn leave(state: &SharedState, conn: ConnectionId, room: Room) {
    if state.rooms.leave(conn, &room) {
        tracing::info!(%conn, %room, "client left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::events::ServerEvent;
    use crate::models::OccupancySource;
    use crate::state::KernelState;
    use oms_devkit::OmsMessageBuilder;

    fn parse(value: serde_json::Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_join_and_leave_frames() {
        let state = KernelState::new(KernelConfig::default());
        let (conn, _rx) = state.rooms.connect();

        for frame in [
            OmsMessageBuilder::client_frame("join:bus", "TJ001".into()),
            OmsMessageBuilder::client_frame("join:admin", serde_json::Value::Null),
            OmsMessageBuilder::client_frame("join:station", "ST01".into()),
        ] {
            handle_client_message(&state, conn, parse(frame)).await.unwrap();
        }
        assert_eq!(
            state.rooms.rooms_of(conn),
            vec![Room::Bus("TJ001".into()), Room::Station("ST01".into()), Room::Admin]
        );

        let leave = OmsMessageBuilder::client_frame("leave:bus", "TJ001".into());
        handle_client_message(&state, conn, parse(leave)).await.unwrap();
        assert_eq!(state.rooms.member_count(&Room::Bus("TJ001".into())), 0);
    }

    #[tokio::test]
    async fn test_guard_override_reaches_bus_room() {
        let state = KernelState::new(KernelConfig::default());
        let (guard, _guard_rx) = state.rooms.connect();
        let (rider, mut rider_rx) = state.rooms.connect();
        state.rooms.join(rider, Room::Bus("TJ001".into()));

        let frame = OmsMessageBuilder::client_frame(
            "occupancy:manual",
            OmsMessageBuilder::manual_override_v1("TJ001", 12, "guard-1"),
        );
        handle_client_message(&state, guard, parse(frame)).await.unwrap();

        assert_eq!(state.store.get("TJ001").unwrap().source, OccupancySource::Manual);
        let ev = rider_rx.try_recv().unwrap();
        match &*ev {
            ServerEvent::BusOccupancyUpdate(u) => assert_eq!(u.occupancy_count, 12),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_override_is_rejected() {
        let state = KernelState::new(KernelConfig::default());
        let (conn, _rx) = state.rooms.connect();
        let frame = OmsMessageBuilder::client_frame(
            "occupancy:manual",
            OmsMessageBuilder::manual_override_v1("", 5, "guard-1"),
        );
        let res = handle_client_message(&state, conn, parse(frame)).await;
        assert!(matches!(res, Err(KernelError::Validation(_))));
        assert_eq!(state.store.len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let state = KernelState::new(KernelConfig::default());
        let (conn, _rx) = state.rooms.connect();
        handle_frame(&state, conn, "{\"event\":\"join:bus\"").await;
        handle_frame(&state, conn, "{\"event\":\"teleport\",\"data\":1}").await;
        assert!(state.rooms.rooms_of(conn).is_empty());
    }

    #[tokio::test]
    async fn test_camera_status_frame() {
        let state = KernelState::new(KernelConfig::default());
        let (admin, mut admin_rx) = state.rooms.connect();
        state.rooms.join(admin, Room::Admin);
        let (device, _rx) = state.rooms.connect();

        handle_frame(
            &state,
            device,
            r#"{"event":"camera:status","data":{"deviceId":"CAM001","status":"online","busId":"TJ001"}}"#,
        )
        .await;
        assert!(state.devices.get("CAM001").is_some());
        assert_eq!(admin_rx.try_recv().unwrap().name(), "camera:status:update");
    }

    #[tokio::test]
    async fn test_system_status_frame_reaches_admin() {
        let state = KernelState::new(KernelConfig::default());
        let (admin, mut admin_rx) = state.rooms.connect();
        state.rooms.join(admin, Room::Admin);
        let (ops, _rx) = state.rooms.connect();

        handle_frame(
            &state,
            ops,
            r#"{"event":"system:status","data":{"status":"ok","message":"all depots online"}}"#,
        )
        .await;
        let json = serde_json::to_value(&*admin_rx.try_recv().unwrap()).unwrap();
        assert_eq!(json["event"], "system:status:update");
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["message"], "all depots online");
        assert!(json["data"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_failed_writer_ends_session() {
        let state = KernelState::new(KernelConfig::default());
        let (conn, events) = state.rooms.connect();
        state.rooms.join(conn, Room::Admin);
        state.pipeline.system_status(crate::events::SystemStatusReport {
            status: "ok".into(),
            message: String::new(),
        });

        // client never sends, socket refuses every write
        let incoming = futures::stream::pending::<Result<Message, std::io::Error>>();
        let outgoing = Box::pin(futures::sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>(std::io::Error::other("peer gone"))
        }));

        tokio::time::timeout(
            Duration::from_secs(2),
            run_session(&state, conn, events, incoming, outgoing),
        )
        .await
        .expect("session ends once the writer stops");
        assert_eq!(state.rooms.member_count(&Room::Admin), 0);
        assert!(state.rooms.rooms_of(conn).is_empty());
    }
}
