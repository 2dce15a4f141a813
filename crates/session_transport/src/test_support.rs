use tokio::sync::mpsc;

use crate::envelope::{Envelope, EVENT_CONNECTED};
use crate::transport::{Connector, Outgoing, TransportEvents, TransportLink};

/// One `open` call captured by [`FakeConnector`]. Tests drive the attempt
/// through `events` and read what the manager wrote from `outgoing`.
pub(crate) struct FakeLink {
    pub endpoint: String,
    pub events: TransportEvents,
    pub outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

pub(crate) struct FakeConnector {
    opened: mpsc::UnboundedSender<FakeLink>,
}

impl Connector for FakeConnector {
    fn open(&mut self, endpoint: &str, events: TransportEvents) -> TransportLink {
        let (link, outgoing) = TransportLink::channel();
        let _ = self.opened.send(FakeLink {
            endpoint: endpoint.to_string(),
            events,
            outgoing,
        });
        link
    }
}

pub(crate) fn fake_connector() -> (FakeConnector, mpsc::UnboundedReceiver<FakeLink>) {
    let (opened, links) = mpsc::unbounded_channel();
    (FakeConnector { opened }, links)
}

pub(crate) fn connected_frame() -> String {
    Envelope::new(EVENT_CONNECTED, serde_json::json!({}))
        .to_json()
        .expect("serialize handshake")
}
