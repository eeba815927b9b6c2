//! The physical reader driver is an external collaborator a host process
//! provides. This module defines the trait boundary the tag object
//! transceives through, plus the event stream and tag metadata the
//! verifier consumes: a `Send + Sync` `async_trait`, with a `Mock*` double
//! for tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::TagUid;

/// Reader-provided metadata about a tag at the moment of arrival.
#[derive(Debug, Clone)]
pub struct TagMetadata {
    pub uid: TagUid,
    pub sak: u8,
    pub target_number: u8,
    pub supports_iso14443_4: bool,
}

/// A single NFC event from the reader.
#[derive(Debug, Clone)]
pub enum NfcEvent {
    Arrived(TagMetadata),
    Departed,
}

/// The reader collaborator: a single-use event subscription plus a
/// per-tag APDU transceive primitive.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Resolves once, with the next NFC event. The verifier re-subscribes
    /// after each resolution.
    async fn subscribe(&self) -> Result<NfcEvent>;

    /// Exchange `command` with the currently present tag, writing the
    /// response into a fresh buffer. Every tag-facing command uses the
    /// default 500ms timeout unless overridden.
    async fn transceive(&self, command: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// A scripted reader double: a queue of events to hand out from
    /// `subscribe`, and a queue of responses to hand out from
    /// `transceive`, in order.
    #[derive(Default)]
    pub struct MockReader {
        events: Mutex<VecDeque<NfcEvent>>,
        responses: Mutex<VecDeque<Result<Vec<u8>>>>,
        pub sent_commands: Mutex<Vec<Vec<u8>>>,
    }

    impl MockReader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_event(&self, event: NfcEvent) {
            self.events.try_lock().unwrap().push_back(event);
        }

        pub fn push_response(&self, response: Result<Vec<u8>>) {
            self.responses.try_lock().unwrap().push_back(response);
        }
    }

    #[async_trait]
    impl Reader for MockReader {
        async fn subscribe(&self) -> Result<NfcEvent> {
            self.events
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| crate::error::Error::unavailable("no scripted events remaining"))
        }

        async fn transceive(&self, command: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
            self.sent_commands.lock().await.push(command.to_vec());
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(crate::error::Error::unavailable("no scripted response remaining")))
        }
    }
}
