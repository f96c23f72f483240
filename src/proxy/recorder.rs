//! Traffic observation hooks.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

/// Which way a payload travelled through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → upstream.
    ToServer,
    /// Upstream → client.
    ToClient,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of payload an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Head,
    Body,
    WebSocketText,
    WebSocketBinary,
    WebSocketControl,
}

/// One recorded piece of relayed traffic.
#[derive(Debug, Clone)]
pub struct ProxyDataItem {
    pub session: Uuid,
    pub direction: Direction,
    pub kind: PayloadKind,
    payload: Bytes,
}

impl ProxyDataItem {
    pub fn new(session: Uuid, direction: Direction, kind: PayloadKind, payload: impl Into<Bytes>) -> Self {
        Self {
            session,
            direction,
            kind,
            payload: payload.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8, decoded only when asked for.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Receives every recorded item. Implementations must not block.
pub trait TrafficObserver: Send + Sync {
    fn observe(&self, item: ProxyDataItem);
}

/// Emits each item as a `tracing` event, truncated to `max_payload_bytes`.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    max_payload_bytes: usize,
}

impl TracingObserver {
    pub fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }
}

impl TrafficObserver for TracingObserver {
    fn observe(&self, item: ProxyDataItem) {
        let shown = &item.as_bytes()[..item.len().min(self.max_payload_bytes)];
        tracing::info!(
            target: "relay_engine::traffic",
            session_id = %item.session,
            direction = %item.direction,
            kind = ?item.kind,
            len = item.len(),
            payload = %String::from_utf8_lossy(shown),
            "Traffic"
        );
    }
}

/// Per-session handle that builds items only when an observer is installed.
#[derive(Clone)]
pub struct Recorder {
    session: Uuid,
    observer: Option<Arc<dyn TrafficObserver>>,
}

impl Recorder {
    pub fn new(session: Uuid, observer: Option<Arc<dyn TrafficObserver>>) -> Self {
        Self { session, observer }
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    pub fn record(&self, direction: Direction, kind: PayloadKind, payload: &[u8]) {
        if let Some(observer) = &self.observer {
            observer.observe(ProxyDataItem::new(
                self.session,
                direction,
                kind,
                Bytes::copy_from_slice(payload),
            ));
        }
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("session", &self.session)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ProxyDataItem>>);

    impl TrafficObserver for Collect {
        fn observe(&self, item: ProxyDataItem) {
            self.0.lock().unwrap().push(item);
        }
    }

    #[test]
    fn items_decode_lazily() {
        let observer = Collect::default();
        let id = Uuid::new_v4();
        observer.observe(ProxyDataItem::new(id, Direction::ToClient, PayloadKind::Body, &b"caf\xc3\xa9"[..]));
        observer.observe(ProxyDataItem::new(id, Direction::ToServer, PayloadKind::Body, vec![0xff, b'a']));

        let items = observer.0.lock().unwrap();
        assert_eq!(items[0].as_text(), "café");
        assert_eq!(items[1].as_text(), "\u{fffd}a");
        assert_eq!(items[1].direction.as_str(), "to_server");
    }

    #[test]
    fn disabled_recorder_is_silent() {
        let observer = Arc::new(Collect::default());
        let recorder = Recorder::new(Uuid::new_v4(), None);
        recorder.record(Direction::ToClient, PayloadKind::Head, b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(!recorder.is_enabled());

        let recorder = Recorder::new(Uuid::new_v4(), Some(observer.clone()));
        recorder.record(Direction::ToClient, PayloadKind::Head, b"x");
        assert_eq!(observer.0.lock().unwrap().len(), 1);
    }
}
