//! Application events published by sessions and the batch coordinator.

/// Events for communication between the orchestration core and a front end.
#[derive(Debug, Clone)]
pub enum AppEvent {
    // Session events
    FlashOutput(String, String), // port, line
    FlashProgress(String, u8),   // port, percent
    FlashMac(String, String),    // port, mac address
    SessionStarted(String),      // port
    SessionFinished(String, bool), // port, success

    // Coordinator events
    PortsUpdated(Vec<String>), // live ports, published every poll cycle
    PortsRemoved(Vec<String>), // ports purged from batch tracking
    BatchStarted(usize),       // number of ports snapshotted as pre-existing
    BatchStopped,
}
