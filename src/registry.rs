use crate::model::ConnectionType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Identity of one physical connection: link type, link number, CONET node
/// and VME base address folded into a single key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(
        connection_type: ConnectionType,
        link_num: i32,
        conet_node: i32,
        vme_base_address: u32,
    ) -> Self {
        let mut id = u64::from(vme_base_address & 0xFFFF) << 32;
        id |= (conet_node as u64 & 0xFF) << 16;
        id |= (link_num as u64 & 0xFF) << 8;
        id |= connection_type as u64;
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#012x}", self.0)
    }
}

/// Connections currently held by live sessions.
///
/// Advisory only: registering an identity twice is reported to the caller
/// but never refused.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    active: Mutex<HashMap<ConnectionId, usize>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the identity was already in use.
    pub fn register(&self, id: ConnectionId) -> bool {
        let mut active = self.active.lock();
        let users = active.entry(id).or_insert(0);
        *users += 1;
        *users > 1
    }

    pub fn unregister(&self, id: ConnectionId) {
        let mut active = self.active.lock();
        if let Some(users) = active.get_mut(&id) {
            *users -= 1;
            if *users == 0 {
                active.remove(&id);
            }
        }
    }

    pub fn users(&self, id: ConnectionId) -> usize {
        self.active.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.users(id) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_layout() {
        let id = ConnectionId::new(ConnectionType::A4818, 2, 3, 0x3210_ABCD);
        assert_eq!(id.value(), 0xABCD_0003_0201);
        let usb = ConnectionId::new(ConnectionType::Usb, 0, 0, 0);
        assert_eq!(usb.value(), 0);
        assert_ne!(
            ConnectionId::new(ConnectionType::Usb, 1, 0, 0),
            ConnectionId::new(ConnectionType::A4818, 1, 0, 0)
        );
    }

    #[test]
    fn duplicates_are_reported_not_refused() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new(ConnectionType::Usb, 0, 0, 0);
        assert!(!registry.register(id));
        assert!(registry.register(id));
        assert_eq!(registry.users(id), 2);

        registry.unregister(id);
        assert!(registry.is_registered(id));
        registry.unregister(id);
        assert!(!registry.is_registered(id));

        // unknown ids are ignored
        registry.unregister(id);
        assert_eq!(registry.users(id), 0);
    }
}
