//! Link Registry
//!
//! Explicit owner of every running supervisor. Created by `main`, passed
//! where needed; there is no process-wide registry singleton.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use labcom_protocols::events::EventSender;

use crate::config::InstrumentConfig;
use crate::runtime::supervisor::{
    ConnectionSupervisor, ReconnectPolicy, TransportConnector,
};

struct RegisteredLink {
    supervisor: Arc<ConnectionSupervisor>,
    handle: JoinHandle<()>,
}

/// All supervised instrument links of this process
#[derive(Default)]
pub struct LinkRegistry {
    links: Vec<RegisteredLink>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Start supervising one configured instrument
    pub fn start(&mut self, config: &InstrumentConfig, events: EventSender) {
        let connector = Arc::new(TransportConnector::new(config.transport.clone()));
        let supervisor =
            ConnectionSupervisor::new(config, connector, ReconnectPolicy::default(), events);
        let handle = supervisor.spawn();
        info!("Supervising: {} ({:?})", config.id, config.protocol);
        self.links.push(RegisteredLink { supervisor, handle });
    }

    pub fn supervisors(&self) -> impl Iterator<Item = &Arc<ConnectionSupervisor>> {
        self.links.iter().map(|l| &l.supervisor)
    }

    /// Disconnect every link and wait for the supervision tasks to end
    pub async fn shutdown(self) {
        for link in &self.links {
            link.supervisor.disconnect();
        }
        for link in self.links {
            let _ = link.handle.await;
        }
    }
}
