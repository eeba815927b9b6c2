//! Usage-record sink: the seam a completed session's [`MachineUsage`] is
//! written to. Uploading it anywhere durable is out of scope for this
//! crate — this is only the interface the session observer calls through,
//! following the same external-collaborator shape as
//! [`crate::cloud::CloudClient`].

use async_trait::async_trait;

use crate::error::Result;
use crate::types::MachineUsage;

#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: MachineUsage) -> Result<()>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryUsageSink {
        records: Mutex<Vec<MachineUsage>>,
    }

    impl InMemoryUsageSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn records(&self) -> Vec<MachineUsage> {
            self.records.lock().await.clone()
        }
    }

    #[async_trait]
    impl UsageSink for InMemoryUsageSink {
        async fn record(&self, usage: MachineUsage) -> Result<()> {
            self.records.lock().await.push(usage);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::InMemoryUsageSink;
    use super::*;
    use crate::types::{CheckoutReason, Identifier};
    use chrono::Utc;

    #[tokio::test]
    async fn records_are_appended_in_order() {
        let sink = InMemoryUsageSink::new();
        let usage = MachineUsage {
            user_id: Identifier::new("user").unwrap(),
            auth_id: Identifier::new("auth").unwrap(),
            check_in: Utc::now(),
            check_out: Utc::now(),
            reason: CheckoutReason::SelfCheckout,
        };
        sink.record(usage.clone()).await.unwrap();
        assert_eq!(sink.records().await.len(), 1);
    }
}
