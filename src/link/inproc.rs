/*!
 * In-Process Transport
 * Address-keyed hub of paired channels shared by every context of a runtime
 */

use super::types::{LinkError, LinkResult, LinkRole};
use ahash::RandomState;
use dashmap::DashMap;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Two directions of one in-process link
struct InprocPair {
    to_bind: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
    to_connect: (Sender<Vec<u8>>, Receiver<Vec<u8>>),
}

impl InprocPair {
    fn new() -> Self {
        Self {
            to_bind: flume::unbounded(),
            to_connect: flume::unbounded(),
        }
    }
}

/// Registry of in-process channel pairs keyed by full address
///
/// Queued messages survive a disconnect and reconnect of the same address.
#[derive(Default)]
pub struct InprocHub {
    pairs: DashMap<String, Arc<InprocPair>, RandomState>,
}

impl InprocHub {
    pub fn new() -> Self {
        Self {
            pairs: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Open one side of the pair at `address`, creating the pair on first use
    pub fn open(&self, address: &str, role: LinkRole) -> InprocSocket {
        let pair = self
            .pairs
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(InprocPair::new()))
            .clone();

        let (tx, rx) = match role {
            LinkRole::Bind => (pair.to_connect.0.clone(), pair.to_bind.1.clone()),
            LinkRole::Connect => (pair.to_bind.0.clone(), pair.to_connect.1.clone()),
        };

        InprocSocket { tx, rx }
    }

    /// Take every message queued towards `role` at `address`
    pub fn drain(&self, address: &str, role: LinkRole) -> Vec<Vec<u8>> {
        let Some(pair) = self.pairs.get(address).map(|p| p.value().clone()) else {
            return Vec::new();
        };
        let rx = match role {
            LinkRole::Bind => &pair.to_bind.1,
            LinkRole::Connect => &pair.to_connect.1,
        };
        rx.drain().collect()
    }

    /// Forget the pair at `address`, dropping anything still queued
    pub fn remove(&self, address: &str) -> bool {
        self.pairs.remove(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// One side of an in-process link
pub struct InprocSocket {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl InprocSocket {
    pub fn send(&mut self, payload: &[u8]) -> LinkResult<()> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| LinkError::Io("in-process channel closed".to_string()))
    }

    pub fn recv(&mut self, timeout: Duration) -> LinkResult<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LinkError::Io("in-process channel closed".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_directions() {
        let hub = InprocHub::new();
        let mut bind = hub.open("inproc://x", LinkRole::Bind);
        let mut connect = hub.open("inproc://x", LinkRole::Connect);

        connect.send(b"ping").unwrap();
        assert_eq!(bind.recv(Duration::from_millis(50)).unwrap(), b"ping");

        bind.send(b"pong").unwrap();
        assert_eq!(connect.recv(Duration::from_millis(50)).unwrap(), b"pong");
    }

    #[test]
    fn test_messages_survive_reopen() {
        let hub = InprocHub::new();
        let mut connect = hub.open("inproc://y", LinkRole::Connect);
        connect.send(b"queued").unwrap();
        drop(connect);

        let mut bind = hub.open("inproc://y", LinkRole::Bind);
        assert_eq!(bind.recv(Duration::from_millis(50)).unwrap(), b"queued");
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_drain_takes_one_direction() {
        let hub = InprocHub::new();
        let mut connect = hub.open("inproc://d", LinkRole::Connect);
        let mut bind = hub.open("inproc://d", LinkRole::Bind);
        connect.send(b"a").unwrap();
        connect.send(b"b").unwrap();
        bind.send(b"back").unwrap();

        assert_eq!(hub.drain("inproc://d", LinkRole::Bind), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(hub.drain("inproc://d", LinkRole::Bind).is_empty());
        assert_eq!(connect.recv(Duration::from_millis(50)).unwrap(), b"back");
        assert!(hub.drain("inproc://missing", LinkRole::Connect).is_empty());
    }

    #[test]
    fn test_recv_timeout() {
        let hub = InprocHub::new();
        let mut bind = hub.open("inproc://z", LinkRole::Bind);
        assert_eq!(bind.recv(Duration::from_millis(5)), Err(LinkError::Timeout));
        assert!(hub.remove("inproc://z"));
        assert!(hub.is_empty());
    }
}
