use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    runtime::{Handle, RuntimeFlavor},
    sync::{mpsc, watch},
    task::{self, JoinHandle},
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    events::{IncomingMessage, NewBlessing},
    presence::PresenceRoster,
    protocol::{
        heartbeat_frame, leave_frame, parse_realtime_frame, postgres_join_frame,
        presence_join_frame, topic_for, track_frame, RealtimeEvent,
    },
    remote::SupabaseClient,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const LEAVE_GRACE: Duration = Duration::from_secs(2);

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct RemoteWorkerConfig {
    pub room: String,
    pub fetch_limit: usize,
    pub blessings_channel: String,
    pub presence_channel: String,
    /// Presence is only joined when a session key is given.
    pub presence_key: Option<String>,
}

#[derive(Debug)]
pub enum RemoteCommand {
    Submit(NewBlessing),
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Background tasks talking to the remote store. Dropping or calling
/// [`WorkerHandles::shutdown`] unsubscribes and stops them.
pub struct WorkerHandles {
    initial_load: Option<JoinHandle<()>>,
    realtime: Option<JoinHandle<()>>,
    submitter: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandles {
    pub fn shutdown(&mut self) {
        // The realtime task sends phx_leave for its topics before exiting.
        let _ = self.shutdown.send(true);
        abort_handle(&mut self.initial_load);
        abort_handle(&mut self.submitter);
        if let Some(realtime) = self.realtime.take() {
            if !join_with_grace(realtime, LEAVE_GRACE) {
                warn!("realtime task did not unsubscribe in time; aborted");
            }
        }
    }
}

/// Blocks until `handle` finishes or `grace` elapses, aborting it in the
/// latter case. Without a multi-thread runtime to wait on it aborts at once.
fn join_with_grace(mut handle: JoinHandle<()>, grace: Duration) -> bool {
    let runtime = match Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => runtime,
        _ => {
            handle.abort();
            return handle.is_finished();
        }
    };
    let joined = task::block_in_place(|| runtime.block_on(timeout(grace, &mut handle)));
    if joined.is_err() {
        handle.abort();
        return false;
    }
    true
}

impl Drop for WorkerHandles {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn abort_handle(handle: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = handle.take() {
        handle.abort();
    }
}

/// The UI side of the remote workers.
pub struct RemoteLink {
    pub handles: WorkerHandles,
    pub commands: mpsc::UnboundedSender<RemoteCommand>,
}

pub fn spawn_remote_workers(
    client: SupabaseClient,
    config: RemoteWorkerConfig,
    tx: Sender<IncomingMessage>,
) -> RemoteLink {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let initial_load = spawn_initial_load(client.clone(), &config, tx.clone());
    let submitter = tokio::spawn(run_submitter(client.clone(), command_rx, tx.clone()));
    let realtime = tokio::spawn(run_realtime_loop(client, config, tx, shutdown_rx));

    RemoteLink {
        handles: WorkerHandles {
            initial_load: Some(initial_load),
            realtime: Some(realtime),
            submitter: Some(submitter),
            shutdown: shutdown_tx,
        },
        commands: command_tx,
    }
}

/// One-shot bulk fetch. A failure is reported once and never retried.
fn spawn_initial_load(
    client: SupabaseClient,
    config: &RemoteWorkerConfig,
    tx: Sender<IncomingMessage>,
) -> JoinHandle<()> {
    let room = config.room.clone();
    let limit = config.fetch_limit;
    tokio::spawn(async move {
        let message = match client.fetch_recent(&room, limit).await {
            Ok(rows) => {
                info!(room = %room, rows = rows.len(), "loaded recent blessings");
                IncomingMessage::InitialBatch(rows)
            }
            Err(err) => {
                warn!(?err, room = %room, "initial blessing load failed");
                IncomingMessage::InitialLoadFailed(format!("{err:#}"))
            }
        };
        let _ = tx.send(message);
    })
}

async fn run_submitter(
    client: SupabaseClient,
    mut commands: mpsc::UnboundedReceiver<RemoteCommand>,
    tx: Sender<IncomingMessage>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            RemoteCommand::Submit(blessing) => {
                let result = client
                    .insert(&blessing)
                    .await
                    .map_err(|err| format!("{err:#}"));
                if tx.send(IncomingMessage::SubmitFinished(result)).is_err() {
                    warn!("ui receiver dropped; stopping submitter");
                    return;
                }
            }
        }
    }
}

async fn run_realtime_loop(
    client: SupabaseClient,
    config: RemoteWorkerConfig,
    tx: Sender<IncomingMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = client.realtime_url();
    info!(channel = %config.blessings_channel, "starting realtime worker");

    loop {
        if *shutdown.borrow() {
            return;
        }
        emit_realtime_status(&tx, "CONNECTING...", false);
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                match run_realtime_session(socket, &client, &config, &tx, &mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => {
                        info!("realtime worker stopped");
                        return;
                    }
                    Ok(SessionEnd::Disconnected) => {
                        warn!(channel = %config.blessings_channel, "realtime stream closed");
                    }
                    Err(err) => {
                        warn!(?err, channel = %config.blessings_channel, "realtime worker disconnected");
                    }
                }
            }
            Err(err) => {
                warn!(?err, "realtime worker failed to connect");
            }
        }
        emit_realtime_status(&tx, "RECONNECTING (5s)...", false);

        tokio::select! {
            _ = sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_realtime_session(
    socket: RealtimeSocket,
    client: &SupabaseClient,
    config: &RemoteWorkerConfig,
    tx: &Sender<IncomingMessage>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    let (mut sink, mut stream) = socket.split();
    let access_token = client.credentials().anon_key.as_str();
    let blessings_topic = topic_for(&config.blessings_channel);
    let presence_topic = topic_for(&config.presence_channel);
    let mut next_ref = 0u64;
    let mut bump = || {
        next_ref += 1;
        next_ref
    };

    let join = postgres_join_frame(&blessings_topic, &config.room, access_token, bump());
    sink.send(Message::Text(join.into())).await?;

    let mut presence_join_ref = None;
    if let Some(key) = config.presence_key.as_deref() {
        let reference = bump();
        presence_join_ref = Some(reference.to_string());
        let join = presence_join_frame(&presence_topic, key, access_token, reference);
        sink.send(Message::Text(join.into())).await?;
    }

    info!(channel = %config.blessings_channel, room = %config.room, "realtime worker connected");
    emit_realtime_status(tx, format!("LIVE: {}", config.blessings_channel), true);

    let mut roster = PresenceRoster::default();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let leave = leave_frame(&blessings_topic, bump());
                let _ = sink.send(Message::Text(leave.into())).await;
                if presence_join_ref.is_some() {
                    let leave = leave_frame(&presence_topic, bump());
                    let _ = sink.send(Message::Text(leave.into())).await;
                }
                let _ = sink.close().await;
                return Ok(SessionEnd::Shutdown);
            }
            _ = heartbeat.tick() => {
                sink.send(Message::Text(heartbeat_frame(bump()).into())).await?;
            }
            next = stream.next() => {
                let text = match next {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err.into()),
                };
                let (topic, event) = match parse_realtime_frame(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        debug!(?err, "skipping realtime frame");
                        continue;
                    }
                };
                let message = match event {
                    RealtimeEvent::Inserted(record) if topic == blessings_topic => {
                        Some(IncomingMessage::Inserted(record))
                    }
                    RealtimeEvent::PresenceState(state) if topic == presence_topic => {
                        roster.apply_state(state);
                        Some(IncomingMessage::PresenceCount(roster.count()))
                    }
                    RealtimeEvent::PresenceDiff { joins, leaves } if topic == presence_topic => {
                        roster.apply_diff(joins, leaves);
                        Some(IncomingMessage::PresenceCount(roster.count()))
                    }
                    RealtimeEvent::JoinReply { ok: false, reference } => {
                        warn!(topic = %topic, ?reference, "realtime join rejected");
                        None
                    }
                    RealtimeEvent::JoinReply { ok: true, reference } => {
                        if reference.is_some() && reference == presence_join_ref {
                            let track = track_frame(&presence_topic, &Utc::now().to_rfc3339(), bump());
                            sink.send(Message::Text(track.into())).await?;
                        }
                        None
                    }
                    RealtimeEvent::ChannelClosed { reason } => {
                        warn!(topic = %topic, reason = %reason, "realtime channel closed");
                        return Ok(SessionEnd::Disconnected);
                    }
                    _ => None,
                };
                if let Some(message) = message {
                    if tx.send(message).is_err() {
                        warn!("ui receiver dropped; stopping realtime worker");
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}

fn emit_realtime_status(tx: &Sender<IncomingMessage>, status: impl Into<String>, connected: bool) {
    let _ = tx.send(IncomingMessage::RealtimeStatus {
        status: status.into(),
        connected,
    });
}
