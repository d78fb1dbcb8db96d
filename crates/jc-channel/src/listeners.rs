use crate::client::{ChannelClient, ChannelStatus, Subscription};
use crate::error::ChannelError;
use jc_core::channel_wire::{EVENT_INITIAL_STATS, EVENT_NEW_LEAD, EVENT_STATS_UPDATE, NAMESPACE_LEADS, NAMESPACE_STATS};
use jc_core::config::ChannelConfig;
use jc_core::{LeadEvent, StatSnapshot};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Live statistics on the `stats` namespace. The initial snapshot and every
/// update replace the held value wholesale; whichever arrives last wins.
pub struct StatsListener {
    _bindings: Vec<Subscription>,
    client: ChannelClient,
    snapshot: watch::Receiver<Option<StatSnapshot>>,
}

impl StatsListener {
    pub fn start(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let client = ChannelClient::new(config, NAMESPACE_STATS)?;
        let (publish, snapshot) = watch::channel(None);
        let publish = Arc::new(publish);

        let bindings = [EVENT_INITIAL_STATS, EVENT_STATS_UPDATE]
            .into_iter()
            .map(|name| {
                let publish = publish.clone();
                client.subscribe(name, move |data| {
                    match serde_json::from_value::<StatSnapshot>(data.clone()) {
                        Ok(stats) => {
                            publish.send_replace(Some(stats));
                        }
                        Err(err) => warn!(event = "stats_payload_invalid", name, error = %err),
                    }
                })
            })
            .collect();

        client.start();
        Ok(Self {
            _bindings: bindings,
            client,
            snapshot,
        })
    }

    pub fn data(&self) -> Option<StatSnapshot> {
        *self.snapshot.borrow()
    }

    pub fn updates(&self) -> watch::Receiver<Option<StatSnapshot>> {
        self.snapshot.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.client.status_watch()
    }

    pub fn client(&self) -> &ChannelClient {
        &self.client
    }

    pub fn close(&self) {
        self.client.close();
    }
}

/// Forwards every `new_lead` on the `leads` namespace to the caller, in arrival
/// order, on the connection task.
pub struct LeadListener {
    _binding: Subscription,
    client: ChannelClient,
}

impl LeadListener {
    pub fn start<F>(config: &ChannelConfig, on_lead: F) -> Result<Self, ChannelError>
    where
        F: Fn(LeadEvent) + Send + Sync + 'static,
    {
        let client = ChannelClient::new(config, NAMESPACE_LEADS)?;
        let binding = client.subscribe(EVENT_NEW_LEAD, move |data| {
            match serde_json::from_value::<LeadEvent>(data.clone()) {
                Ok(lead) => on_lead(lead),
                Err(err) => warn!(event = "lead_payload_invalid", error = %err),
            }
        });
        client.start();
        Ok(Self {
            _binding: binding,
            client,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.client.status_watch()
    }

    pub fn client(&self) -> &ChannelClient {
        &self.client
    }

    pub fn close(&self) {
        self.client.close();
    }
}
