use crate::scheduling::PlaylistGenerator;
use crate::station_store::StationStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// The generator shared with interactive edits, so jobs take the same listener locks.
    pub generator: Arc<PlaylistGenerator>,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, generator: Arc<PlaylistGenerator>) -> Self {
        Self {
            cancellation_token,
            generator,
        }
    }

    pub fn store(&self) -> &Arc<dyn StationStore> {
        self.generator.store()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
