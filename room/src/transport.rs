//! Outbound side of the host's network layer.

use repgraph::PeerId;

/// Address clients use for the server.
pub const SERVER_PEER: PeerId = PeerId(0);

/// Sink for encoded packets.
///
/// Rooms never read from a transport; the host hands inbound bytes to
/// `receive` on the room itself.
pub trait Transport {
    fn send(&mut self, peer: PeerId, bytes: &[u8]);
}

/// Collects sent packets in memory.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    packets: Vec<(PeerId, Vec<u8>)>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Takes every packet sent so far, oldest first.
    pub fn drain(&mut self) -> Vec<(PeerId, Vec<u8>)> {
        std::mem::take(&mut self.packets)
    }
}

impl Transport for Outbox {
    fn send(&mut self, peer: PeerId, bytes: &[u8]) {
        self.packets.push((peer, bytes.to_vec()));
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, peer: PeerId, bytes: &[u8]) {
        (**self).send(peer, bytes);
    }
}
