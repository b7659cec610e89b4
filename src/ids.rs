//! Small integer handles and the per-run counters that mint them.
//!
//! The source used static member counters (`packet_count`, `event_count`,
//! `nterm`, `nphys`) shared process-wide; we instead give each `Simulation`
//! its own counters so a fresh iteration starts from zero and nothing
//! leaks across a parameter sweep.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PacketId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TerminalId(pub usize);

impl PacketId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl EventId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mints monotonically-increasing `PacketId`s for one simulation run.
#[derive(Debug, Default)]
pub struct PacketIdGen(u64);

impl PacketIdGen {
    pub fn next(&mut self) -> PacketId {
        let id = PacketId(self.0);
        self.0 += 1;
        id
    }
}

/// Mints monotonically-increasing `EventId`s for one simulation run.
#[derive(Debug, Default)]
pub struct EventIdGen(u64);

impl EventIdGen {
    pub fn next(&mut self) -> EventId {
        let id = EventId(self.0);
        self.0 += 1;
        id
    }
}

/// Mints `TerminalId`s in registration order (AP(s) first, then stations),
/// matching the source's `nterm` static counter.
#[derive(Debug, Default)]
pub struct TerminalIdGen(usize);

impl TerminalIdGen {
    pub fn next(&mut self) -> TerminalId {
        let id = TerminalId(self.0);
        self.0 += 1;
        id
    }
}
