use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ghosttext_proto::SelectionObject;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use transport_port::{MessageQueue, PortError};

use crate::runner::api::{ClientEditor, EditorError};
use crate::session::{EditorState, ExternalEdit, InternalEdit};

/// A local text file as the edited document. Local edits are detected by
/// polling the file.
pub struct FileEditor {
    path: PathBuf,
    title: String,
    client_host_name: String,
    shared: Arc<Shared>,
    watcher: JoinHandle<()>,
}

struct Shared {
    edits: MessageQueue<String>,
    /// Content last read from or written to disk. Held across disk access so
    /// our own writes are never reported as local edits.
    last_seen: AsyncMutex<String>,
}

impl FileEditor {
    pub async fn open(
        path: impl Into<PathBuf>,
        title: impl Into<String>,
        client_host_name: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, EditorError> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;
        let shared = Arc::new(Shared {
            edits: MessageQueue::new(),
            last_seen: AsyncMutex::new(content),
        });
        let watcher = tokio::spawn(watch_file(path.clone(), poll_interval, shared.clone()));
        info!(path = %path.display(), "watching file");
        Ok(Self {
            path,
            title: title.into(),
            client_host_name: client_host_name.into(),
            shared,
            watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ends the session from the editor side.
    pub fn close(&self) {
        self.shared
            .edits
            .close(PortError::closed("file editor closed"));
        self.watcher.abort();
    }

    fn check_open(&self) -> Result<(), EditorError> {
        if self.shared.edits.is_open() {
            Ok(())
        } else {
            Err(EditorError::Closed(self.path.display().to_string()))
        }
    }
}

async fn watch_file(path: PathBuf, poll_interval: Duration, shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !shared.edits.is_open() {
            return;
        }
        let mut last_seen = shared.last_seen.lock().await;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content != *last_seen => {
                debug!(path = %path.display(), bytes = content.len(), "file changed");
                *last_seen = content.clone();
                shared.edits.push(content);
            }
            Ok(_) => {}
            Err(err) => {
                info!(path = %path.display(), error = %err, "file no longer readable");
                shared.edits.close(PortError::closed(err.to_string()));
                return;
            }
        }
    }
}

#[async_trait]
impl ClientEditor for FileEditor {
    async fn get_state(&self) -> Result<EditorState, EditorError> {
        self.check_open()?;
        let mut last_seen = self.shared.last_seen.lock().await;
        let body = tokio::fs::read_to_string(&self.path).await?;
        *last_seen = body.clone();
        // The snapshot covers any change the watcher queued so far.
        self.shared.edits.clear_latest()?;
        Ok(EditorState {
            subject: self.title.clone(),
            url: self.client_host_name.clone(),
            is_plain_text: true,
            body,
            selections: vec![SelectionObject::caret(0)],
        })
    }

    async fn apply_change(&self, change: &ExternalEdit) -> Result<(), EditorError> {
        self.check_open()?;
        let mut last_seen = self.shared.last_seen.lock().await;
        tokio::fs::write(&self.path, change.body.as_bytes()).await?;
        *last_seen = change.body.clone();
        debug!(path = %self.path.display(), bytes = change.body.len(), "applied server change");
        Ok(())
    }

    async fn wait_edit(&self) -> Result<(), EditorError> {
        Ok(self.shared.edits.wait_ready().await?)
    }

    fn pop_last_edit(&self) -> Result<Option<InternalEdit>, EditorError> {
        Ok(self
            .shared
            .edits
            .clear_latest()?
            .map(|body| InternalEdit { body: Some(body) }))
    }
}

impl Drop for FileEditor {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
