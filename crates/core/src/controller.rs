use std::collections::BTreeMap;
use std::time::Duration;

use tidemark_client_api_messages::{
    ClientRequest, MutationFailure, MutationOutcome, OutboundEvent, StreamEvent, SyncProgress,
};
use tidemark_durability::KeyValueBackend;
use tidemark_store::Schema;
use tidemark_value::Value;
use tokio::sync::mpsc;

use crate::catchup::{CatchupClient, CatchupState};
use crate::config::SyncConfig;
use crate::engine::{error_event, Engine};
use crate::error::CoreError;
use crate::stream::LiveStream;

/// Everything that can wake the controller: an application request or a
/// live-stream event. One queue, so arrival order is application order.
#[derive(Debug)]
enum Command {
    Client(ClientRequest),
    Stream(StreamEvent),
}

/// The application's handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    /// Enqueue a raw request. Returns false once the controller is gone.
    pub fn request(&self, request: ClientRequest) -> bool {
        self.commands.send(Command::Client(request)).is_ok()
    }

    pub fn register(&self, query_id: &str, query_source: serde_json::Value, query_input: serde_json::Value) -> bool {
        self.request(ClientRequest::Register {
            query_id: query_id.to_owned(),
            query_source,
            query_input,
        })
    }

    pub fn update_input(&self, query_id: &str, query_input: serde_json::Value) -> bool {
        self.request(ClientRequest::UpdateInput {
            query_id: query_id.to_owned(),
            query_input,
        })
    }

    pub fn unregister(&self, query_id: &str) -> bool {
        self.request(ClientRequest::Unregister {
            query_id: query_id.to_owned(),
        })
    }

    pub fn send_mutation(
        &self,
        id: &str,
        base_url: &str,
        input: serde_json::Value,
        headers: Option<BTreeMap<String, String>>,
    ) -> bool {
        self.request(ClientRequest::SendMutation {
            id: id.to_owned(),
            base_url: base_url.to_owned(),
            input,
            headers,
        })
    }

    #[cfg(test)]
    pub(crate) fn inject_stream_event(&self, event: StreamEvent) -> bool {
        self.commands.send(Command::Stream(event)).is_ok()
    }
}

/// The single-consumer actor that owns all mutable state.
///
/// Startup: bootstrap from persistence, connect the live stream, and on
/// `connected` run catchup (the session id is the correlation token the
/// pull needs). Stream deltas that arrive while a catchup page is in
/// flight queue up and apply between pages, in arrival order. Once
/// catchup lands in `Synced` or `Error`, deltas flow straight through.
pub struct Controller<B> {
    engine: Engine<B>,
    catchup: CatchupClient,
    http: reqwest::Client,
    outbound: mpsc::Sender<OutboundEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    catchup_state: CatchupState,
    session_id: Option<String>,
}

impl<B: KeyValueBackend + Send + Sync + 'static> Controller<B> {
    /// Bootstrap and start the actor plus its live stream. Returns the
    /// request handle, the outbound event channel, and the stream handle
    /// (whose `disconnect` stops auto-reconnect for good).
    pub fn spawn(
        config: SyncConfig,
        schema: Schema,
        backend: B,
    ) -> Result<(ControllerHandle, mpsc::Receiver<OutboundEvent>, LiveStream), CoreError> {
        let engine = Engine::bootstrap(schema, backend)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();

        let stream = LiveStream::spawn(
            config.stream_url.clone(),
            Duration::from_millis(config.reconnect_delay_ms),
            stream_tx,
        );

        // Funnel stream events into the one command queue so they
        // serialize with application requests.
        let stream_commands = command_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = stream_rx.recv().await {
                if stream_commands.send(Command::Stream(event)).is_err() {
                    break;
                }
            }
        });

        let controller = Controller {
            engine,
            catchup: CatchupClient::new(&config),
            http: reqwest::Client::new(),
            outbound: outbound_tx,
            commands: command_rx,
            catchup_state: CatchupState::NotStarted,
            session_id: None,
        };
        tokio::spawn(controller.run());

        Ok((ControllerHandle { commands: command_tx }, outbound_rx, stream))
    }

    async fn run(mut self) {
        // Anything registered before spawn finished gets its initial full.
        let initial = self.engine.refresh_all();
        for event in initial {
            self.emit(event).await;
        }
        while let Some(command) = self.commands.recv().await {
            self.handle_command(command).await;
        }
        log::debug!("controller command channel closed; shutting down");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Stream(StreamEvent::Connected { session_id }) => {
                log::debug!("live stream session {session_id}");
                self.session_id = Some(session_id);
                if self.catchup_state == CatchupState::NotStarted {
                    self.run_catchup().await;
                }
            }
            other => self.handle_routine(other).await,
        }
    }

    /// Every command except the one that starts catchup; also used to
    /// drain the queue between catchup pages.
    async fn handle_routine(&mut self, command: Command) {
        match command {
            Command::Client(request) => self.handle_request(request).await,
            Command::Stream(event) => self.handle_stream_event(event).await,
        }
    }

    async fn handle_request(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::Register {
                query_id,
                query_source,
                query_input,
            } => {
                match self.engine.register(&query_id, &query_source, query_input) {
                    Ok(event) => self.emit(event).await,
                    Err(e) => {
                        log::error!("register `{query_id}` failed: {e}");
                        self.emit(error_event(e.to_string(), Some(query_id), None)).await;
                    }
                }
            }
            ClientRequest::UpdateInput { query_id, query_input } => {
                match self.engine.update_input(&query_id, query_input) {
                    Ok(event) => self.emit(event).await,
                    Err(e) => {
                        log::error!("update-input `{query_id}` failed: {e}");
                        self.emit(error_event(e.to_string(), Some(query_id), None)).await;
                    }
                }
            }
            ClientRequest::Unregister { query_id } => {
                if !self.engine.unregister(&query_id) {
                    log::warn!("unregister of unknown query `{query_id}`");
                }
            }
            ClientRequest::SendMutation {
                id,
                base_url,
                input,
                headers,
            } => self.dispatch_mutation(id, base_url, input, headers),
            ClientRequest::InitialData { tables } => self.engine.seed_tables(tables),
        }
    }

    async fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected { session_id } => {
                // Reconnected mid-life: refresh the correlation token.
                self.session_id = Some(session_id);
            }
            StreamEvent::Delta { data } => {
                let events = self.engine.apply_delta(&data);
                for event in events {
                    self.emit(event).await;
                }
            }
            StreamEvent::SyncProgress { data } => {
                self.emit(OutboundEvent::SyncProgress { progress: data }).await;
            }
            StreamEvent::SyncComplete => {
                self.emit(OutboundEvent::SyncProgress {
                    progress: SyncProgress {
                        complete: true,
                        ..SyncProgress::default()
                    },
                })
                .await;
            }
        }
    }

    /// The paged pull. Applies every page through the regular delta path,
    /// persists the cursor after each page, and drains queued commands
    /// between pages so stream deltas keep arrival order.
    async fn run_catchup(&mut self) {
        log::debug!("starting catchup for session {:?}", self.session_id);
        self.catchup_state = CatchupState::Syncing { pages: 0 };
        let mut cursor = self.engine.initial_cursor();
        let mut pages = 0u32;
        let mut tables_synced = 0u32;

        loop {
            match self.catchup.fetch_page(&cursor).await {
                Err(e) => {
                    let message = e.to_string();
                    log::error!("catchup failed: {message}");
                    self.catchup_state = CatchupState::Error(message.clone());
                    self.emit(OutboundEvent::SyncProgress {
                        progress: SyncProgress {
                            tables_synced,
                            complete: false,
                            error: Some(message),
                            ..SyncProgress::default()
                        },
                    })
                    .await;
                    return;
                }
                Ok(response) => {
                    pages += 1;
                    self.catchup_state = CatchupState::Syncing { pages };
                    let total_tables = response.tables.len() as u32;
                    for (table, page) in &response.tables {
                        cursor.advance(table, page);
                        let events = self.engine.apply_catchup_table(table, page);
                        for event in events {
                            self.emit(event).await;
                        }
                        tables_synced += 1;
                        self.emit(OutboundEvent::SyncProgress {
                            progress: SyncProgress {
                                table: Some(table.clone()),
                                tables_synced,
                                total_tables: Some(total_tables),
                                complete: false,
                                error: None,
                            },
                        })
                        .await;
                    }

                    if let Err(e) = self.engine.persist_cursor(&cursor) {
                        log::error!("failed to persist sync cursor: {e}");
                    }

                    // Deltas that were pushed while this page was in
                    // flight apply now, before the next page.
                    while let Ok(command) = self.commands.try_recv() {
                        self.handle_routine(command).await;
                    }

                    if !response.has_more {
                        self.catchup_state = CatchupState::Synced;
                        self.emit(OutboundEvent::SyncProgress {
                            progress: SyncProgress {
                                tables_synced,
                                complete: true,
                                ..SyncProgress::default()
                            },
                        })
                        .await;
                        return;
                    }
                }
            }
        }
    }

    /// POST `{base_url}/{id}` and deliver the outcome as a
    /// `mutationResult`. Runs detached: a slow server must not stall
    /// delta application, and effects only ever arrive via deltas.
    fn dispatch_mutation(
        &self,
        id: String,
        base_url: String,
        input: serde_json::Value,
        headers: Option<BTreeMap<String, String>>,
    ) {
        let http = self.http.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let url = format!("{}/{}", base_url.trim_end_matches('/'), id);
            let mut request = http.post(&url).json(&input);
            for (name, value) in headers.iter().flatten() {
                request = request.header(name.as_str(), value.as_str());
            }

            let result = match request.send().await {
                Err(e) => MutationOutcome::Err(MutationFailure {
                    message: e.to_string(),
                    status: None,
                    body: None,
                }),
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(value) => MutationOutcome::Ok(value),
                            Err(e) => MutationOutcome::Err(MutationFailure {
                                message: format!("response does not decode: {e}"),
                                status: Some(status.as_u16()),
                                body: None,
                            }),
                        }
                    } else {
                        let body = response.json::<Value>().await.ok();
                        MutationOutcome::Err(MutationFailure {
                            message: format!("server returned {status}"),
                            status: Some(status.as_u16()),
                            body,
                        })
                    }
                }
            };

            if outbound
                .send(OutboundEvent::MutationResult { id, result })
                .await
                .is_err()
            {
                log::warn!("mutation result dropped: outbound channel closed");
            }
        });
    }

    async fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).await.is_err() {
            log::warn!("outbound channel closed; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_client_api_messages::{Delta, TableGroup};
    use tidemark_durability::MemoryBackend;

    fn schema() -> Schema {
        serde_json::from_str(r#"{"tables": {"user": {}}, "queryFields": {"user": "user"}}"#).unwrap()
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            // Nothing listens here; the stream retries quietly in the
            // background and catchup is never triggered.
            base_url: "http://127.0.0.1:1".to_owned(),
            stream_url: "ws://127.0.0.1:1/stream".to_owned(),
            reconnect_delay_ms: 5_000,
            ..SyncConfig::default()
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<OutboundEvent>) -> OutboundEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbound channel closed")
    }

    #[tokio::test]
    async fn register_then_stream_delta_emits_full_then_delta() {
        let (handle, mut outbound, stream) =
            Controller::spawn(test_config(), schema(), MemoryBackend::new()).unwrap();

        handle.register("q1", serde_json::json!({"user": {"selections": {}}}), serde_json::Value::Null);
        let event = next_event(&mut outbound).await;
        assert!(matches!(event, OutboundEvent::Full { revision: 1, .. }));

        handle.inject_stream_event(StreamEvent::Delta {
            data: Delta {
                table_groups: vec![TableGroup {
                    table_name: "user".into(),
                    headers: vec!["id".into(), "name".into()],
                    rows: vec![vec![Value::Int(1), Value::from("Ada")]],
                }],
            },
        });
        let event = next_event(&mut outbound).await;
        assert!(matches!(event, OutboundEvent::Delta { revision: 2, .. }));

        stream.disconnect();
    }

    #[tokio::test]
    async fn mutation_against_dead_server_reports_failure() {
        let (handle, mut outbound, stream) =
            Controller::spawn(test_config(), schema(), MemoryBackend::new()).unwrap();

        handle.send_mutation("createUser", "http://127.0.0.1:1", serde_json::json!({"name": "x"}), None);
        let event = next_event(&mut outbound).await;
        let OutboundEvent::MutationResult { id, result } = event else {
            panic!("expected mutation result, got {event:?}");
        };
        assert_eq!(id, "createUser");
        assert!(matches!(result, MutationOutcome::Err(_)));

        stream.disconnect();
    }

    #[tokio::test]
    async fn server_pushed_progress_is_forwarded() {
        let (handle, mut outbound, stream) =
            Controller::spawn(test_config(), schema(), MemoryBackend::new()).unwrap();

        handle.inject_stream_event(StreamEvent::SyncProgress {
            data: SyncProgress {
                tables_synced: 3,
                complete: false,
                ..SyncProgress::default()
            },
        });
        let event = next_event(&mut outbound).await;
        assert!(matches!(
            event,
            OutboundEvent::SyncProgress { progress: SyncProgress { tables_synced: 3, .. } }
        ));

        stream.disconnect();
    }
}
