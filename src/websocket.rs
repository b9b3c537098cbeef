//! # WebSocket Bridge Relay Handler
//!
//! Turns raw WebSocket upgrade requests into registered, forwarding call
//! legs. Two endpoint families, one per role:
//!
//! - `GET /ws/voice/{call_id}` - the voice provider's media leg
//! - `GET /ws/browser/{call_id}` - the browser's media leg
//!
//! ## Connection-Accept Protocol:
//! 1. The call ID comes from the request path; the call-setup collaborator
//!    assigned it before either leg connected, so both legs rendezvous here
//! 2. On upgrade the leg registers with the Session Registry and receives a
//!    `welcome` control message (role, call ID, server timestamp)
//! 3. Binary frames are forwarded to the counterpart leg if present, and
//!    dropped silently if not - a missing counterpart means "no listener
//!    yet", never an error
//! 4. Text frames are a small control envelope: `join` and provider
//!    notifications pass through to the counterpart, `end-call` tears the
//!    whole session down, anything else is logged and dropped
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor with its own read loop.
//! Forwarding is one `do_send` into the counterpart's mailbox per inbound
//! frame; the mailbox preserves per-sender order, so frames are delivered
//! in the order received with no batching or reordering.

use crate::config::RelayConfig;
use crate::relay::codec;
use crate::relay::completion::CompletionTracker;
use crate::relay::registry::{DetachOutcome, LegRole, SessionRegistry};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The registry instantiated with actor addresses as leg handles.
pub type BridgeRegistry = SessionRegistry<Addr<BridgeSocket>>;

/// Classified inbound control message.
///
/// The closed set of `type`/`event` tags the relay recognizes, with an
/// explicit unclassified fallback instead of speculative field access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Session-join handshake from either leg; delivered to the counterpart
    Join,
    /// Provider's "connected" notification; delivered, not interpreted
    Connected,
    /// DTMF digit event from the provider; delivered to the browser
    Dtmf,
    /// Explicit hang-up request from a leg
    EndCall,
    /// A peer announcing the call is over; treated like a hang-up
    CallEnded,
    /// Valid JSON with a tag the relay doesn't recognize
    Unclassified(Option<String>),
}

impl ControlMessage {
    /// Classify a text frame by its `type` (or the provider's `event`) tag.
    ///
    /// Returns `Err` only for frames that aren't JSON at all; a missing or
    /// unknown tag classifies as [`ControlMessage::Unclassified`].
    pub fn classify(text: &str) -> Result<ControlMessage, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .or_else(|| value.get("event"))
            .and_then(|v| v.as_str());

        Ok(match tag {
            Some("join") => ControlMessage::Join,
            Some("connected") | Some("websocket:connected") => ControlMessage::Connected,
            Some("dtmf") | Some("websocket:dtmf") => ControlMessage::Dtmf,
            Some("end-call") => ControlMessage::EndCall,
            Some("call-ended") => ControlMessage::CallEnded,
            other => ControlMessage::Unclassified(other.map(String::from)),
        })
    }

    /// Messages the relay delivers to the counterpart without interpreting.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            ControlMessage::Join | ControlMessage::Connected | ControlMessage::Dtmf
        )
    }

    /// Messages that end the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControlMessage::EndCall | ControlMessage::CallEnded)
    }
}

/// Control messages the relay itself emits.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundControl {
    /// Registration acknowledgment sent on every new connection, so the
    /// remote peer can confirm registration before streaming audio
    #[serde(rename_all = "camelCase")]
    Welcome {
        role: String,
        call_id: String,
        timestamp: String,
    },

    /// Sent to a leg when its call is over (hang-up, peer loss, or a
    /// connection for an already-completed call)
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String, reason: String },
}

impl OutboundControl {
    fn welcome(role: LegRole, call_id: &str) -> Self {
        OutboundControl::Welcome {
            role: role.as_str().to_string(),
            call_id: call_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn call_ended(call_id: &str, reason: &str) -> Self {
        OutboundControl::CallEnded {
            call_id: call_id.to_string(),
            reason: reason.to_string(),
        }
    }

    fn to_json(&self) -> String {
        // Serialization of these variants cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Forward a binary audio frame to this leg.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForwardFrame(pub Bytes);

/// Forward a control message (already-serialized JSON) to this leg.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForwardControl(pub String);

/// Ask this leg to close its socket and stop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseLeg;

/// WebSocket actor for one call leg.
pub struct BridgeSocket {
    /// Call this leg belongs to; assigned by the call-setup collaborator
    call_id: String,

    /// Which side of the bridge this connection is
    role: LegRole,

    /// Shared session registry
    registry: BridgeRegistry,

    /// Shared completed-call set
    completions: CompletionTracker,

    /// Shared application state (relay counters)
    state: AppState,

    /// Relay settings snapshotted at accept time
    relay_config: RelayConfig,

    /// Last time the peer answered a ping (or sent anything)
    last_heartbeat: Instant,

    /// Whether this leg made it into the registry (welcome sent)
    attached: bool,
}

impl BridgeSocket {
    pub fn new(
        call_id: String,
        role: LegRole,
        registry: BridgeRegistry,
        completions: CompletionTracker,
        state: AppState,
    ) -> Self {
        let relay_config = state.get_config().relay;
        Self {
            call_id,
            role,
            registry,
            completions,
            state,
            relay_config,
            last_heartbeat: Instant::now(),
            attached: false,
        }
    }

    /// True when this leg converts between float and PCM16 at its boundary.
    ///
    /// Only ever the browser leg; the provider leg is always PCM16
    /// (`audio/l16;rate=16000` per the voice contract).
    fn converts_audio(&self) -> bool {
        self.role == LegRole::Browser && self.relay_config.browser_float_samples
    }

    /// Periodic liveness check for this leg.
    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.relay_config.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.relay_config.heartbeat_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(
                    call_id = %act.call_id,
                    role = %act.role,
                    "Heartbeat timeout, closing leg"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Handle one inbound binary audio frame.
    ///
    /// Frames are forwarded in arrival order; if no counterpart is attached
    /// yet the frame is dropped without buffering and without blocking this
    /// leg's read loop.
    fn handle_audio_frame(&mut self, data: Bytes) {
        let Some(counterpart) = self.registry.counterpart(&self.call_id, self.role) else {
            self.state.record_frame_dropped();
            return;
        };

        let frame = if self.converts_audio() {
            // Float-mode browser leg: decode the raw f32 frame and re-encode
            // as PCM16 for the provider side.
            match codec::bytes_to_float_samples(&data) {
                Ok(samples) => Bytes::from(codec::float_samples_to_pcm16(&samples)),
                Err(err) => {
                    warn!(
                        call_id = %self.call_id,
                        role = %self.role,
                        error = %err,
                        "Dropping undecodable audio frame"
                    );
                    return;
                }
            }
        } else {
            data
        };

        counterpart.do_send(ForwardFrame(frame));
        self.state.record_frame_forwarded();
    }

    /// Handle one inbound text (control) frame.
    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match ControlMessage::classify(text) {
            Ok(ControlMessage::EndCall) | Ok(ControlMessage::CallEnded) => {
                info!(call_id = %self.call_id, role = %self.role, "End-call received");
                self.finish_call("end-call requested", ctx);
            }
            Ok(
                msg @ (ControlMessage::Join | ControlMessage::Connected | ControlMessage::Dtmf),
            ) => {
                debug!(call_id = %self.call_id, role = %self.role, ?msg, "Relaying control message");
                if let Some(counterpart) = self.registry.counterpart(&self.call_id, self.role) {
                    counterpart.do_send(ForwardControl(text.to_string()));
                }
            }
            Ok(ControlMessage::Unclassified(tag)) => {
                warn!(
                    call_id = %self.call_id,
                    role = %self.role,
                    tag = tag.as_deref().unwrap_or("<none>"),
                    "Unclassified control message dropped"
                );
            }
            Err(err) => {
                // Malformed control JSON is dropped, never fatal to the leg
                warn!(
                    call_id = %self.call_id,
                    role = %self.role,
                    error = %err,
                    "Malformed control message dropped"
                );
            }
        }
    }

    /// Terminate the whole call: mark it completed, notify and close the
    /// counterpart, then close this leg. Detaching happens in `stopped()`.
    fn finish_call(&mut self, reason: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if self.completions.mark_completed(&self.call_id) {
            self.state.record_call_completed();
        }

        if let Some(counterpart) = self.registry.counterpart(&self.call_id, self.role) {
            counterpart.do_send(ForwardControl(
                OutboundControl::call_ended(&self.call_id, reason).to_json(),
            ));
            counterpart.do_send(CloseLeg);
        }

        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

impl Actor for BridgeSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Register the leg and acknowledge it before any audio flows.
    fn started(&mut self, ctx: &mut Self::Context) {
        // A leg connecting for a call that already ended gets told so and
        // is turned away; this keeps teardown idempotent.
        if self.completions.is_completed(&self.call_id) {
            info!(call_id = %self.call_id, role = %self.role, "Leg connected for completed call");
            ctx.text(OutboundControl::call_ended(&self.call_id, "call already completed").to_json());
            ctx.close(Some(ws::CloseCode::Normal.into()));
            ctx.stop();
            return;
        }

        match self
            .registry
            .attach_leg(&self.call_id, self.role, ctx.address())
        {
            Ok(result) => {
                if let Some(stale) = result.evicted {
                    // Duplicate or late reconnect: the old socket is closed,
                    // not left to leak alongside the new one.
                    warn!(call_id = %self.call_id, role = %self.role, "Evicting stale leg");
                    stale.do_send(CloseLeg);
                }

                self.attached = true;
                self.state.increment_active_legs();

                info!(
                    call_id = %self.call_id,
                    role = %self.role,
                    bridged = result.counterpart_present,
                    "Leg registered"
                );

                ctx.text(OutboundControl::welcome(self.role, &self.call_id).to_json());
                self.start_heartbeat(ctx);
            }
            Err(err) => {
                warn!(call_id = %self.call_id, role = %self.role, error = %err, "Attach refused");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(err.to_string()),
                }));
                ctx.stop();
            }
        }
    }

    /// Detach this leg; if it was the last live end of an active call,
    /// cascade a `call-ended` to the counterpart so a session never lingers
    /// with one dead leg consuming resources.
    fn stopped(&mut self, ctx: &mut Self::Context) {
        if !self.attached {
            return;
        }

        self.state.decrement_active_legs();

        match self
            .registry
            .detach_leg(&self.call_id, self.role, &ctx.address())
        {
            DetachOutcome::Removed {
                counterpart: Some(peer),
            } => {
                // Skip the notification when the call already completed -
                // the end-call path notified the peer once already.
                if !self.completions.is_completed(&self.call_id) {
                    info!(call_id = %self.call_id, role = %self.role, "Leg lost, closing counterpart");
                    peer.do_send(ForwardControl(
                        OutboundControl::call_ended(&self.call_id, "peer disconnected").to_json(),
                    ));
                    peer.do_send(CloseLeg);
                }
            }
            DetachOutcome::Removed { counterpart: None } => {
                debug!(call_id = %self.call_id, role = %self.role, "Last leg detached, session removed");
            }
            DetachOutcome::NotAttached => {
                // Already detached, or this leg was evicted by a reconnect;
                // either way there is nothing to clean up.
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BridgeSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio_frame(data);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_control(&text, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(call_id = %self.call_id, role = %self.role, ?reason, "Leg closed");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                // Fragmented frames are not part of either leg's protocol
                warn!(call_id = %self.call_id, role = %self.role, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    call_id = %self.call_id,
                    role = %self.role,
                    error = %err,
                    "WebSocket protocol error"
                );
                ctx.stop();
            }
        }
    }
}

/// Deliver an audio frame from the counterpart leg.
impl Handler<ForwardFrame> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, msg: ForwardFrame, ctx: &mut Self::Context) {
        if self.converts_audio() {
            // Float-mode browser leg: provider PCM16 goes out as raw f32.
            match codec::pcm16_to_float_samples(&msg.0) {
                Ok(samples) => ctx.binary(codec::float_samples_to_bytes(&samples)),
                Err(err) => {
                    warn!(
                        call_id = %self.call_id,
                        role = %self.role,
                        error = %err,
                        "Dropping undecodable outbound frame"
                    );
                }
            }
        } else {
            ctx.binary(msg.0);
        }
    }
}

/// Deliver a control message from the counterpart leg (or the relay itself).
impl Handler<ForwardControl> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, msg: ForwardControl, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Close this leg's socket. Detach and any cascade run in `stopped()`.
impl Handler<CloseLeg> for BridgeSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseLeg, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }
}

/// Provider-leg endpoint handler (`/ws/voice/{call_id}`).
pub async fn provider_leg(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
    registry: web::Data<BridgeRegistry>,
    completions: web::Data<CompletionTracker>,
) -> ActixResult<HttpResponse> {
    start_leg(LegRole::Provider, req, stream, path, state, registry, completions)
}

/// Browser-leg endpoint handler (`/ws/browser/{call_id}`).
pub async fn browser_leg(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
    registry: web::Data<BridgeRegistry>,
    completions: web::Data<CompletionTracker>,
) -> ActixResult<HttpResponse> {
    start_leg(LegRole::Browser, req, stream, path, state, registry, completions)
}

/// Shared upgrade path for both endpoint families.
fn start_leg(
    role: LegRole,
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
    registry: web::Data<BridgeRegistry>,
    completions: web::Data<CompletionTracker>,
) -> ActixResult<HttpResponse> {
    let call_id = path.into_inner();

    info!(
        call_id = %call_id,
        role = %role,
        peer = ?req.connection_info().peer_addr(),
        "WebSocket connection request"
    );

    let socket = BridgeSocket::new(
        call_id,
        role,
        registry.get_ref().clone(),
        completions.get_ref().clone(),
        state.get_ref().clone(),
    );

    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::App;
    use awc::ws as client_ws;
    use futures_util::{SinkExt, StreamExt};

    #[test]
    fn test_classify_recognized_types() {
        assert_eq!(
            ControlMessage::classify(r#"{"type":"join","callId":"c1"}"#).unwrap(),
            ControlMessage::Join
        );
        assert_eq!(
            ControlMessage::classify(r#"{"type":"end-call"}"#).unwrap(),
            ControlMessage::EndCall
        );
        assert_eq!(
            ControlMessage::classify(r#"{"type":"call-ended","reason":"hangup"}"#).unwrap(),
            ControlMessage::CallEnded
        );
    }

    #[test]
    fn test_classify_provider_event_field() {
        // The provider tags its notifications with `event` instead of `type`
        assert_eq!(
            ControlMessage::classify(r#"{"event":"websocket:connected","content-type":"audio/l16;rate=16000"}"#)
                .unwrap(),
            ControlMessage::Connected
        );
        assert_eq!(
            ControlMessage::classify(r#"{"event":"websocket:dtmf","digit":"5"}"#).unwrap(),
            ControlMessage::Dtmf
        );
    }

    #[test]
    fn test_classify_unknown_tag_is_unclassified() {
        let msg = ControlMessage::classify(r#"{"type":"offer","sdp":"..."}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unclassified(Some("offer".to_string())));
        assert!(!msg.is_pass_through());
        assert!(!msg.is_terminal());

        // JSON without any tag at all
        let msg = ControlMessage::classify(r#"{"digit":"5"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unclassified(None));
    }

    #[test]
    fn test_classify_malformed_json_is_error() {
        assert!(ControlMessage::classify("not json").is_err());
        assert!(ControlMessage::classify("").is_err());
    }

    #[test]
    fn test_terminal_and_pass_through_sets() {
        assert!(ControlMessage::EndCall.is_terminal());
        assert!(ControlMessage::CallEnded.is_terminal());
        assert!(ControlMessage::Join.is_pass_through());
        assert!(ControlMessage::Connected.is_pass_through());
        assert!(ControlMessage::Dtmf.is_pass_through());
        assert!(!ControlMessage::Join.is_terminal());
        assert!(!ControlMessage::EndCall.is_pass_through());
    }

    #[test]
    fn test_welcome_message_shape() {
        let json = OutboundControl::welcome(LegRole::Browser, "c1").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["role"], "browser");
        assert_eq!(value["callId"], "c1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_call_ended_message_shape() {
        let json = OutboundControl::call_ended("c1", "peer disconnected").to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "call-ended");
        assert_eq!(value["callId"], "c1");
        assert_eq!(value["reason"], "peer disconnected");

        // The relay's own call-ended classifies as terminal if echoed back
        assert!(ControlMessage::classify(&json).unwrap().is_terminal());
    }

    // End-to-end tests below run a real server with both leg routes and
    // drive it with WebSocket clients, so the attach/forward/teardown paths
    // are exercised the way live legs exercise them.

    fn bridge_server(
        state: AppState,
        registry: BridgeRegistry,
        completions: CompletionTracker,
    ) -> actix_test::TestServer {
        actix_test::start(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .app_data(web::Data::new(registry.clone()))
                .app_data(web::Data::new(completions.clone()))
                .route("/ws/voice/{call_id}", web::get().to(provider_leg))
                .route("/ws/browser/{call_id}", web::get().to(browser_leg))
        })
    }

    fn text_json(frame: client_ws::Frame) -> serde_json::Value {
        match frame {
            client_ws::Frame::Text(body) => serde_json::from_slice(&body).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    /// Actor teardown finishes shortly after the client observes the close
    /// frame; poll instead of racing it.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[actix_web::test]
    async fn test_legs_bridge_and_forward_audio_either_order() {
        let registry = BridgeRegistry::new(8);
        let mut srv = bridge_server(
            AppState::new(AppConfig::default()),
            registry.clone(),
            CompletionTracker::new(),
        );

        // Browser arrives first and is welcomed while still unpaired
        let mut browser = srv.ws_at("/ws/browser/c1").await.unwrap();
        let welcome = text_json(browser.next().await.unwrap().unwrap());
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["role"], "browser");
        assert_eq!(welcome["callId"], "c1");

        let mut provider = srv.ws_at("/ws/voice/c1").await.unwrap();
        let welcome = text_json(provider.next().await.unwrap().unwrap());
        assert_eq!(welcome["role"], "provider");

        // Audio now flows both ways, byte for byte
        browser
            .send(client_ws::Message::Binary(Bytes::from_static(&[1, 2, 3, 4])))
            .await
            .unwrap();
        match provider.next().await.unwrap().unwrap() {
            client_ws::Frame::Binary(data) => assert_eq!(&data[..], &[1, 2, 3, 4]),
            other => panic!("expected binary frame, got {:?}", other),
        }

        provider
            .send(client_ws::Message::Binary(Bytes::from_static(&[9, 9])))
            .await
            .unwrap();
        match browser.next().await.unwrap().unwrap() {
            client_ws::Frame::Binary(data) => assert_eq!(&data[..], &[9, 9]),
            other => panic!("expected binary frame, got {:?}", other),
        }

        assert_eq!(registry.active_call_count(), 1);
    }

    #[actix_web::test]
    async fn test_audio_without_counterpart_is_dropped_not_blocking() {
        let state = AppState::new(AppConfig::default());
        let mut srv = bridge_server(
            state.clone(),
            BridgeRegistry::new(8),
            CompletionTracker::new(),
        );

        let mut browser = srv.ws_at("/ws/browser/c1").await.unwrap();
        browser.next().await.unwrap().unwrap(); // welcome

        // No provider yet: the frame is dropped and counted, nothing buffers
        browser
            .send(client_ws::Message::Binary(Bytes::from_static(&[0u8; 8])))
            .await
            .unwrap();
        wait_until(|| state.get_metrics_snapshot().frames_dropped == 1).await;
        assert_eq!(state.get_metrics_snapshot().frames_dropped, 1);

        // The leg itself keeps serving
        browser
            .send(client_ws::Message::Ping(Bytes::new()))
            .await
            .unwrap();
        assert!(matches!(
            browser.next().await.unwrap().unwrap(),
            client_ws::Frame::Pong(_)
        ));
    }

    #[actix_web::test]
    async fn test_end_call_notifies_counterpart_and_removes_session() {
        let registry = BridgeRegistry::new(8);
        let completions = CompletionTracker::new();
        let mut srv = bridge_server(
            AppState::new(AppConfig::default()),
            registry.clone(),
            completions.clone(),
        );

        let mut provider = srv.ws_at("/ws/voice/c1").await.unwrap();
        provider.next().await.unwrap().unwrap(); // welcome
        let mut browser = srv.ws_at("/ws/browser/c1").await.unwrap();
        browser.next().await.unwrap().unwrap(); // welcome

        browser
            .send(client_ws::Message::Text(r#"{"type":"end-call"}"#.into()))
            .await
            .unwrap();

        // The provider is told the call ended, then closed
        let ended = text_json(provider.next().await.unwrap().unwrap());
        assert_eq!(ended["type"], "call-ended");
        assert_eq!(ended["callId"], "c1");
        assert!(matches!(
            provider.next().await.unwrap().unwrap(),
            client_ws::Frame::Close(_)
        ));

        // The requesting leg is closed too
        assert!(matches!(
            browser.next().await.unwrap().unwrap(),
            client_ws::Frame::Close(_)
        ));

        assert!(completions.is_completed("c1"));
        wait_until(|| registry.active_call_count() == 0).await;
        assert_eq!(registry.active_call_count(), 0);
    }

    #[actix_web::test]
    async fn test_abrupt_disconnect_cascades_to_counterpart() {
        let registry = BridgeRegistry::new(8);
        let mut srv = bridge_server(
            AppState::new(AppConfig::default()),
            registry.clone(),
            CompletionTracker::new(),
        );

        let provider = srv.ws_at("/ws/voice/c1").await.unwrap();
        let mut browser = srv.ws_at("/ws/browser/c1").await.unwrap();
        browser.next().await.unwrap().unwrap(); // welcome

        // Provider vanishes without an end-call
        drop(provider);

        let ended = text_json(browser.next().await.unwrap().unwrap());
        assert_eq!(ended["type"], "call-ended");
        assert_eq!(ended["reason"], "peer disconnected");
        assert!(matches!(
            browser.next().await.unwrap().unwrap(),
            client_ws::Frame::Close(_)
        ));

        wait_until(|| registry.active_call_count() == 0).await;
        assert_eq!(registry.active_call_count(), 0);
    }
}
