pub mod api;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::session::{Command, CommandResult, GhostTextClient, SessionStatus, Step};
use api::{
    ClientEditor, ConnectError, EditorError, GhostTextConnector, Heart, IndicatorError, Session,
    SessionError, StatusIndicator,
};
use ghosttext_proto::ServerInitialResponse;

#[derive(Debug, Error)]
enum RunError {
    #[error("status update failed: {0}")]
    Indicator(#[from] IndicatorError),
    #[error("handshake finished without a session")]
    MissingSession,
}

/// Drives one [`GhostTextClient`] per call to [`GhostTextRunner::run`].
pub struct GhostTextRunner {
    connector: Arc<dyn GhostTextConnector>,
    server_url: Url,
    heart: Arc<dyn Heart>,
}

impl GhostTextRunner {
    pub fn new(
        connector: Arc<dyn GhostTextConnector>,
        server_url: Url,
        heart: Arc<dyn Heart>,
    ) -> Self {
        Self {
            connector,
            server_url,
            heart,
        }
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// Synchronizes `editor` with the server until the session terminates and
    /// returns the final status. The session is closed, the final status is
    /// reported and the heartbeat is stopped on every exit path.
    pub async fn run(
        &self,
        indicator: &dyn StatusIndicator,
        editor: &dyn ClientEditor,
    ) -> SessionStatus {
        let beat = self.heart.start_beat();
        let mut session = None;

        let status = match self.drive(indicator, editor, &mut session).await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "session ended abnormally");
                SessionStatus::Error
            }
        };

        if let Some(session) = session {
            session.close();
        }
        if let Err(err) = indicator.update(status.into()).await {
            warn!(error = %err, %status, "failed to report final status");
        }
        beat.stop();
        info!(%status, "session finished");
        status
    }

    async fn drive(
        &self,
        indicator: &dyn StatusIndicator,
        editor: &dyn ClientEditor,
        session: &mut Option<Box<dyn Session>>,
    ) -> Result<SessionStatus, RunError> {
        let mut client = GhostTextClient::new();

        let mut step = client.start();
        while let Step::Command(command) = &step {
            if matches!(command, Command::QueryEditor) {
                break;
            }
            let result = self.handshake(indicator, editor, command, session).await?;
            debug!(command = command.name(), result = result.name(), "handshake step");
            step = client.resume(result);
        }

        let mut command = match step {
            Step::Command(command) => command,
            Step::Done(status) => return Ok(status),
        };
        let session = session.as_deref().ok_or(RunError::MissingSession)?;
        loop {
            let name = command.name();
            let result = execute(indicator, editor, session, command).await?;
            debug!(command = name, result = result.name(), "session step");
            match client.resume(result) {
                Step::Command(next) => command = next,
                Step::Done(status) => return Ok(status),
            }
        }
    }

    async fn handshake(
        &self,
        indicator: &dyn StatusIndicator,
        editor: &dyn ClientEditor,
        command: &Command,
        session: &mut Option<Box<dyn Session>>,
    ) -> Result<CommandResult, RunError> {
        match command {
            Command::Connect => {
                let connected = tokio::select! {
                    connected = self.connector.connect(&self.server_url) => connected,
                    () = editor_closed(editor) => {
                        info!(server = %self.server_url, "editor closed while connecting");
                        return Ok(CommandResult::EditorClosed);
                    }
                };
                self.finish_connect(connected, session)
            }
            Command::NotifyStatus(status) => {
                indicator.update((*status).into()).await?;
                Ok(CommandResult::StatusUpdated)
            }
            Command::QueryEditor | Command::RequestUpdate(_) | Command::ApplyChange(_) => {
                Ok(CommandResult::disconnected(format!(
                    "unexpected command during handshake: {}",
                    command.name()
                )))
            }
        }
    }

    fn finish_connect(
        &self,
        connected: Result<(Box<dyn Session>, ServerInitialResponse), ConnectError>,
        session: &mut Option<Box<dyn Session>>,
    ) -> Result<CommandResult, RunError> {
        match connected {
            Ok((opened, init)) => {
                info!(
                    server = %self.server_url,
                    protocol_version = init.protocol_version,
                    web_socket_port = init.web_socket_port,
                    "connected to GhostText server"
                );
                if session.is_none() {
                    *session = Some(opened);
                } else {
                    opened.close();
                }
                Ok(CommandResult::Connected(init))
            }
            Err(err) => {
                warn!(server = %self.server_url, error = %err, "failed to connect");
                Ok(CommandResult::disconnected(err))
            }
        }
    }
}

/// Resolves once the editor reports itself closed. Edits made before the
/// snapshot are covered by it, so pending ones are dropped.
async fn editor_closed(editor: &dyn ClientEditor) {
    loop {
        if editor.wait_edit().await.is_err() || editor.pop_last_edit().is_err() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

async fn execute(
    indicator: &dyn StatusIndicator,
    editor: &dyn ClientEditor,
    session: &dyn Session,
    command: Command,
) -> Result<CommandResult, RunError> {
    match command {
        Command::QueryEditor => match editor.get_state().await {
            Ok(state) => Ok(CommandResult::ClientState(state)),
            Err(err) => {
                info!(error = %err, "editor unavailable");
                Ok(CommandResult::EditorClosed)
            }
        },
        Command::RequestUpdate(update) => {
            if let Err(err) = session.send_update(&update) {
                info!(error = %err, "failed to send update");
                return Ok(CommandResult::disconnected(err));
            }
            Ok(receive_change(editor, session).await)
        }
        Command::ApplyChange(change) => {
            if let Some(change) = change {
                if let Err(err) = editor.apply_change(&change).await {
                    info!(error = %err, "failed to apply server change");
                    return Ok(CommandResult::EditorClosed);
                }
            }
            Ok(receive_change(editor, session).await)
        }
        Command::NotifyStatus(status) => {
            indicator.update(status.into()).await?;
            Ok(CommandResult::StatusUpdated)
        }
        Command::Connect => Ok(CommandResult::disconnected(
            "unexpected command during session: connect",
        )),
    }
}

enum Event {
    Edited,
    EditorFailed(EditorError),
    ServerChanged,
    SessionFailed(SessionError),
}

/// Waits for whichever side changes first and reads it.
async fn receive_change(editor: &dyn ClientEditor, session: &dyn Session) -> CommandResult {
    loop {
        let event = tokio::select! {
            waited = editor.wait_edit() => match waited {
                Ok(()) => Event::Edited,
                Err(err) => Event::EditorFailed(err),
            },
            waited = session.wait_server_change() => match waited {
                Ok(()) => Event::ServerChanged,
                Err(err) => Event::SessionFailed(err),
            },
        };

        let result = match event {
            Event::Edited => match editor.pop_last_edit() {
                Ok(edit) => edit.map(CommandResult::ClientEdited),
                Err(err) => {
                    info!(error = %err, "editor closed");
                    Some(CommandResult::EditorClosed)
                }
            },
            Event::ServerChanged => match session.pop_server_change() {
                Ok(change) => change.map(CommandResult::ServerChanged),
                Err(err) => Some(CommandResult::disconnected(err)),
            },
            Event::EditorFailed(err) => {
                info!(error = %err, "editor closed");
                Some(CommandResult::EditorClosed)
            }
            Event::SessionFailed(err) => {
                info!(error = %err, "server disconnected");
                Some(CommandResult::disconnected(err))
            }
        };

        match result {
            Some(result) => return result,
            None => debug!("woke without a pending change; waiting again"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientStatus, EditorState, ExternalEdit, InternalEdit};
    use api::{Beat, ConnectError};
    use async_trait::async_trait;
    use ghosttext_proto::{
        EditorChangeResponse, SelectionObject, ServerInitialResponse, UpdateRequest,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transport_port::{MessageQueue, PortError};

    struct MockSession {
        changes: MessageQueue<EditorChangeResponse>,
        sent: Mutex<Vec<UpdateRequest>>,
        delivered: AtomicUsize,
    }

    impl MockSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                changes: MessageQueue::new(),
                sent: Mutex::new(Vec::new()),
                delivered: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Session for Arc<MockSession> {
        fn send_update(&self, update: &UpdateRequest) -> Result<(), SessionError> {
            if !self.changes.is_open() {
                return Err(PortError::closed("mock session closed").into());
            }
            self.sent.lock().push(update.clone());
            Ok(())
        }

        async fn wait_server_change(&self) -> Result<(), SessionError> {
            Ok(self.changes.wait_ready().await?)
        }

        fn pop_server_change(&self) -> Result<Option<EditorChangeResponse>, SessionError> {
            let change = self.changes.clear_latest()?;
            if change.is_some() {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Ok(change)
        }

        fn close(&self) {
            self.changes.close(PortError::closed("closed by client"));
        }
    }

    struct MockConnector {
        session: Option<Arc<MockSession>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl GhostTextConnector for MockConnector {
        async fn connect(
            &self,
            _server_url: &Url,
        ) -> Result<(Box<dyn Session>, ServerInitialResponse), ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match &self.session {
                Some(session) => Ok((
                    Box::new(session.clone()),
                    ServerInitialResponse {
                        protocol_version: 1,
                        web_socket_port: 4001,
                    },
                )),
                None => Err(ConnectError::InvalidResponse(
                    r#"{"ProtocolVersion":0}"#.into(),
                )),
            }
        }
    }

    /// Accepts the request and never answers.
    struct HangingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl GhostTextConnector for HangingConnector {
        async fn connect(
            &self,
            _server_url: &Url,
        ) -> Result<(Box<dyn Session>, ServerInitialResponse), ConnectError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    struct MockEditor {
        state: Option<EditorState>,
        edits: MessageQueue<InternalEdit>,
        applied: Mutex<Vec<ExternalEdit>>,
        queries: AtomicUsize,
        spurious_wakeups: AtomicUsize,
    }

    impl MockEditor {
        fn new(state: Option<EditorState>) -> Self {
            Self {
                state,
                edits: MessageQueue::new(),
                applied: Mutex::new(Vec::new()),
                queries: AtomicUsize::new(0),
                spurious_wakeups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ClientEditor for MockEditor {
        async fn get_state(&self) -> Result<EditorState, EditorError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.state
                .clone()
                .ok_or_else(|| EditorError::Closed("window gone".into()))
        }

        async fn apply_change(&self, change: &ExternalEdit) -> Result<(), EditorError> {
            self.applied.lock().push(change.clone());
            Ok(())
        }

        async fn wait_edit(&self) -> Result<(), EditorError> {
            let spurious = self
                .spurious_wakeups
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if spurious {
                return Ok(());
            }
            Ok(self.edits.wait_ready().await?)
        }

        fn pop_last_edit(&self) -> Result<Option<InternalEdit>, EditorError> {
            Ok(self.edits.clear_latest()?)
        }
    }

    #[derive(Default)]
    struct RecordingIndicator {
        statuses: Mutex<Vec<ClientStatus>>,
        broken: bool,
    }

    #[async_trait]
    impl StatusIndicator for RecordingIndicator {
        async fn update(&self, status: ClientStatus) -> Result<(), IndicatorError> {
            self.statuses.lock().push(status);
            if self.broken {
                return Err(IndicatorError::Unavailable("icon api gone".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHeart {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    impl Heart for CountingHeart {
        fn start_beat(&self) -> Beat {
            self.started.fetch_add(1, Ordering::SeqCst);
            let stopped = self.stopped.clone();
            Beat::new(move || {
                stopped.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn snapshot(body: &str) -> EditorState {
        EditorState {
            subject: "subject".into(),
            url: "test-id.localhost".into(),
            is_plain_text: true,
            body: body.into(),
            selections: vec![SelectionObject::caret(0)],
        }
    }

    fn build_runner(
        session: Option<Arc<MockSession>>,
    ) -> (GhostTextRunner, Arc<MockConnector>, Arc<CountingHeart>) {
        let connector = Arc::new(MockConnector {
            session,
            attempts: AtomicUsize::new(0),
        });
        let heart = Arc::new(CountingHeart::default());
        let runner = GhostTextRunner::new(
            connector.clone(),
            Url::parse("http://localhost:4001/").unwrap(),
            heart.clone(),
        );
        (runner, connector, heart)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn failed_handshake_reports_error_without_querying_editor() {
        let (runner, connector, heart) = build_runner(None);
        let editor = MockEditor::new(Some(snapshot("hello")));
        let indicator = RecordingIndicator::default();

        let status = runner.run(&indicator, &editor).await;

        assert_eq!(status, SessionStatus::Error);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(editor.queries.load(Ordering::SeqCst), 0);
        assert_eq!(
            *indicator.statuses.lock(),
            vec![ClientStatus::Inactive, ClientStatus::Error]
        );
        assert_eq!(heart.started.load(Ordering::SeqCst), 1);
        assert_eq!(heart.stopped.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn editor_closed_before_snapshot_sends_nothing() {
        let session = MockSession::new();
        let (runner, _, heart) = build_runner(Some(session.clone()));
        let editor = MockEditor::new(None);
        let indicator = RecordingIndicator::default();

        let status = runner.run(&indicator, &editor).await;

        assert_eq!(status, SessionStatus::Error);
        assert!(session.sent.lock().is_empty());
        assert!(!session.changes.is_open(), "session must be closed on exit");
        assert_eq!(
            *indicator.statuses.lock(),
            vec![ClientStatus::Inactive, ClientStatus::Active, ClientStatus::Error]
        );
        assert_eq!(heart.stopped.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn relays_changes_both_ways_until_server_disconnects() {
        let session = MockSession::new();
        let (runner, _, heart) = build_runner(Some(session.clone()));
        let editor = Arc::new(MockEditor::new(Some(snapshot("hello"))));
        let indicator = Arc::new(RecordingIndicator::default());

        let task = {
            let (editor, indicator) = (editor.clone(), indicator.clone());
            tokio::spawn(async move { runner.run(indicator.as_ref(), editor.as_ref()).await })
        };

        wait_for(|| session.sent.lock().len() == 1).await;
        assert_eq!(
            session.sent.lock()[0],
            UpdateRequest::new(
                "hello",
                "subject",
                "test-id.localhost",
                vec![SelectionObject::caret(0)]
            )
        );

        session.changes.push(EditorChangeResponse {
            text: Some("hello, world".into()),
            selections: Some(vec![SelectionObject::caret(5)]),
        });
        wait_for(|| editor.applied.lock().len() == 1).await;
        assert_eq!(editor.applied.lock()[0].body, "hello, world");

        editor.edits.push(InternalEdit {
            body: Some("hello, there".into()),
        });
        wait_for(|| session.sent.lock().len() == 2).await;
        assert_eq!(session.sent.lock()[1], UpdateRequest::text_only("hello, there"));

        session.changes.close(PortError::closed("server went away"));
        let status = task.await.expect("join");

        assert_eq!(status, SessionStatus::Error);
        assert_eq!(
            *indicator.statuses.lock(),
            vec![ClientStatus::Inactive, ClientStatus::Active, ClientStatus::Error]
        );
        assert_eq!(heart.stopped.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn empty_wakeups_are_retried() {
        let session = MockSession::new();
        let (runner, _, _) = build_runner(Some(session.clone()));
        let editor = Arc::new(MockEditor::new(Some(snapshot("hello"))));
        editor.spurious_wakeups.store(3, Ordering::SeqCst);
        let indicator = Arc::new(RecordingIndicator::default());

        let task = {
            let (editor, indicator) = (editor.clone(), indicator.clone());
            tokio::spawn(async move { runner.run(indicator.as_ref(), editor.as_ref()).await })
        };

        wait_for(|| session.sent.lock().len() == 1).await;
        editor.edits.push(InternalEdit {
            body: Some("after wakeups".into()),
        });
        wait_for(|| session.sent.lock().len() == 2).await;
        assert_eq!(editor.spurious_wakeups.load(Ordering::SeqCst), 0);

        editor.edits.close(PortError::closed("window closed"));
        assert_eq!(task.await.expect("join"), SessionStatus::Error);
        assert!(!session.changes.is_open());
    }

    #[test_timeout::tokio_timeout_test]
    async fn indicator_failures_end_the_run_but_teardown_completes() {
        let session = MockSession::new();
        let (runner, connector, heart) = build_runner(Some(session.clone()));
        let editor = MockEditor::new(Some(snapshot("hello")));
        let indicator = RecordingIndicator {
            broken: true,
            ..Default::default()
        };

        let status = runner.run(&indicator, &editor).await;

        assert_eq!(status, SessionStatus::Error);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        // The announcement and the best-effort final report.
        assert_eq!(
            *indicator.statuses.lock(),
            vec![ClientStatus::Inactive, ClientStatus::Error]
        );
        assert_eq!(heart.stopped.load(Ordering::SeqCst), 1);
    }
    #[test_timeout::tokio_timeout_test]
    async fn closing_the_editor_cancels_a_hung_connect() {
        let connector = Arc::new(HangingConnector {
            attempts: AtomicUsize::new(0),
        });
        let heart = Arc::new(CountingHeart::default());
        let runner = GhostTextRunner::new(
            connector.clone(),
            Url::parse("http://localhost:4001/").unwrap(),
            heart.clone(),
        );
        let editor = Arc::new(MockEditor::new(Some(snapshot("hello"))));
        let indicator = Arc::new(RecordingIndicator::default());

        let task = {
            let (editor, indicator) = (editor.clone(), indicator.clone());
            tokio::spawn(async move { runner.run(indicator.as_ref(), editor.as_ref()).await })
        };
        wait_for(|| connector.attempts.load(Ordering::SeqCst) == 1).await;
        // Typing while the server is slow does not end the handshake.
        editor.edits.push(InternalEdit {
            body: Some("typed early".into()),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        editor.edits.close(PortError::closed("window closed"));

        assert_eq!(task.await.expect("join"), SessionStatus::Error);
        assert_eq!(editor.queries.load(Ordering::SeqCst), 0);
        assert_eq!(
            *indicator.statuses.lock(),
            vec![ClientStatus::Inactive, ClientStatus::Error]
        );
        assert_eq!(heart.stopped.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn simultaneous_changes_are_both_delivered() {
        let session = MockSession::new();
        let (runner, _, _) = build_runner(Some(session.clone()));
        let editor = Arc::new(MockEditor::new(Some(snapshot("hello"))));
        let indicator = Arc::new(RecordingIndicator::default());

        let task = {
            let (editor, indicator) = (editor.clone(), indicator.clone());
            tokio::spawn(async move { runner.run(indicator.as_ref(), editor.as_ref()).await })
        };
        wait_for(|| session.sent.lock().len() == 1).await;

        // Both sides are ready before the next race; one is taken now and the
        // other on the following iteration.
        session.changes.push(EditorChangeResponse {
            text: Some("remote".into()),
            selections: None,
        });
        editor.edits.push(InternalEdit {
            body: Some("local".into()),
        });

        wait_for(|| session.sent.lock().len() == 2 && editor.applied.lock().len() == 1).await;
        assert_eq!(session.sent.lock()[1], UpdateRequest::text_only("local"));
        assert_eq!(
            *editor.applied.lock(),
            vec![ExternalEdit {
                body: "remote".into()
            }]
        );

        session.changes.close(PortError::closed("server went away"));
        assert_eq!(task.await.expect("join"), SessionStatus::Error);
    }

    #[test_timeout::tokio_timeout_test]
    async fn selection_only_changes_leave_the_editor_alone() {
        let session = MockSession::new();
        let (runner, _, _) = build_runner(Some(session.clone()));
        let editor = Arc::new(MockEditor::new(Some(snapshot("hello"))));
        let indicator = Arc::new(RecordingIndicator::default());

        let task = {
            let (editor, indicator) = (editor.clone(), indicator.clone());
            tokio::spawn(async move { runner.run(indicator.as_ref(), editor.as_ref()).await })
        };
        wait_for(|| session.sent.lock().len() == 1).await;

        session.changes.push(EditorChangeResponse {
            text: None,
            selections: Some(vec![SelectionObject::caret(2)]),
        });
        wait_for(|| session.delivered.load(Ordering::SeqCst) == 1).await;

        // The session keeps relaying after the selection-only frame.
        editor.edits.push(InternalEdit {
            body: Some("still here".into()),
        });
        wait_for(|| session.sent.lock().len() == 2).await;
        assert_eq!(session.sent.lock()[1], UpdateRequest::text_only("still here"));
        assert!(editor.applied.lock().is_empty());
        assert!(!task.is_finished());

        session.changes.close(PortError::closed("server went away"));
        assert_eq!(task.await.expect("join"), SessionStatus::Error);
    }
}
