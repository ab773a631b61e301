pub use stitchcore::net::{Transport, TransportEvent, TransportFactory};

/// In-memory transport for driving the engine in tests: records every
/// outbound emit and lets the test inject inbound events through a
/// channel it keeps the sender of.
pub mod mock {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    pub struct MockTransport {
        emitted: Mutex<Vec<(String, Value)>>,
        failing: AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                emitted: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            })
        }

        /// Everything emitted so far, in order.
        pub fn emitted(&self) -> Vec<(String, Value)> {
            self.emitted.lock().unwrap().clone()
        }

        /// Makes every subsequent emit fail, simulating a dead socket.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn emit(&self, event: &str, payload: Value) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("mock transport is failing"));
            }
            self.emitted
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    pub struct MockTransportFactory {
        transport: Arc<MockTransport>,
        events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    }

    impl MockTransportFactory {
        /// Returns the factory plus the sender used to inject inbound
        /// events into the transport created from it.
        pub fn new() -> (Self, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(64);
            (
                Self {
                    transport: MockTransport::new(),
                    events: Mutex::new(Some(rx)),
                },
                tx,
            )
        }

        pub fn transport(&self) -> Arc<MockTransport> {
            Arc::clone(&self.transport)
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
            let rx = self
                .events
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("mock transport already created"))?;
            Ok((self.transport.clone(), rx))
        }
    }
}
