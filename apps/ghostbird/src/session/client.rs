use super::{Command, CommandResult, ExternalEdit, SessionStatus};

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(Command),
    Done(SessionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// `NotifyStatus(Connecting)` issued.
    AnnouncingConnect,
    /// `Connect` issued.
    Connecting,
    /// `NotifyStatus(Running)` issued.
    AnnouncingRunning,
    /// `QueryEditor` issued for the first snapshot.
    Querying,
    Syncing,
    Done(SessionStatus),
}

/// The GhostText protocol as a sequence of commands.
///
/// Every command the client emits has to be answered with exactly one
/// [`CommandResult`] through [`GhostTextClient::resume`]. The client performs
/// no I/O itself; the driver executes commands and feeds results back.
/// Once a terminal status is returned it is returned again for every further
/// result.
#[derive(Debug)]
pub struct GhostTextClient {
    phase: Phase,
}

impl Default for GhostTextClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GhostTextClient {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Emits the first command. Calling it on a started client fails the session.
    pub fn start(&mut self) -> Step {
        let (phase, step) = match self.phase {
            Phase::Idle => (
                Phase::AnnouncingConnect,
                Step::Command(Command::NotifyStatus(SessionStatus::Connecting)),
            ),
            Phase::Done(status) => (Phase::Done(status), Step::Done(status)),
            _ => finish(SessionStatus::Error),
        };
        self.phase = phase;
        step
    }

    pub fn resume(&mut self, result: CommandResult) -> Step {
        let (phase, step) = transition(self.phase, result);
        self.phase = phase;
        step
    }

    /// The terminal status, once reached.
    pub fn outcome(&self) -> Option<SessionStatus> {
        match self.phase {
            Phase::Done(status) => Some(status),
            _ => None,
        }
    }
}

fn finish(status: SessionStatus) -> (Phase, Step) {
    (Phase::Done(status), Step::Done(status))
}

fn transition(phase: Phase, result: CommandResult) -> (Phase, Step) {
    use CommandResult as R;

    match (phase, result) {
        (Phase::Done(status), _) => finish(status),
        (_, R::Disconnected(_) | R::EditorClosed) => finish(SessionStatus::Error),

        (Phase::AnnouncingConnect, R::StatusUpdated) => {
            (Phase::Connecting, Step::Command(Command::Connect))
        }
        (Phase::Connecting, R::Connected(_)) => (
            Phase::AnnouncingRunning,
            Step::Command(Command::NotifyStatus(SessionStatus::Running)),
        ),
        (Phase::AnnouncingRunning, R::StatusUpdated) => {
            (Phase::Querying, Step::Command(Command::QueryEditor))
        }

        (Phase::Querying | Phase::Syncing, R::ClientState(state)) => (
            Phase::Syncing,
            Step::Command(Command::RequestUpdate(state.to_update())),
        ),
        (Phase::Syncing, R::ServerChanged(change)) => (
            Phase::Syncing,
            Step::Command(Command::ApplyChange(ExternalEdit::from_change(&change))),
        ),
        (Phase::Syncing, R::ClientEdited(edit)) => (
            Phase::Syncing,
            Step::Command(Command::RequestUpdate(edit.to_update())),
        ),
        (Phase::Syncing, _) => finish(SessionStatus::Finished),

        // Results out of order: either a result before `start` or a handshake
        // answer that does not match the command issued.
        (
            Phase::Idle
            | Phase::AnnouncingConnect
            | Phase::Connecting
            | Phase::AnnouncingRunning
            | Phase::Querying,
            _,
        ) => finish(SessionStatus::Error),
    }
}
