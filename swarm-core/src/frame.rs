//! # Frame Bookkeeping
//!
//! ## Ping-Pong Positions
//!
//! Compute writes positions into one of two buffers per frame and reads the
//! other; graphics reads the buffer completed by the previous frame. With
//! `write(f)` alternating primary/alternate:
//!
//! - `write(f) != write(f + 1)`
//! - graphics `read(0) == write(0)` (ordered by the closing barrier)
//! - graphics `read(f) == write(f - 1)` for `f > 0`
//!
//! `f` counts frames in which positions actually advanced, so a frame that
//! skips the position writer leaves the parity where it was.
//!
//! ## Writer Ledger
//!
//! Every buffer has one writer per frame: either the upload path or a
//! single compute node. The ledger records who claimed what and refuses a
//! second writer.

use std::collections::HashMap;
use std::fmt;

use crate::error::{SwarmError, SwarmResult};
use crate::soa::{BindingSlot, Channel};

/// One half of the position ping-pong pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PositionSlot {
    Primary,
    Alternate,
}

impl PositionSlot {
    pub fn other(self) -> Self {
        match self {
            PositionSlot::Primary => PositionSlot::Alternate,
            PositionSlot::Alternate => PositionSlot::Primary,
        }
    }

    pub fn index(self) -> usize {
        match self {
            PositionSlot::Primary => 0,
            PositionSlot::Alternate => 1,
        }
    }

    pub fn channel(self) -> Channel {
        match self {
            PositionSlot::Primary => Channel::PositionPrimary,
            PositionSlot::Alternate => Channel::PositionAlternate,
        }
    }
}

/// Parity rules of the position pair
pub struct PingPong;

impl PingPong {
    /// Buffer compute writes in simulation frame `frame`
    pub fn compute_write(frame: u64) -> PositionSlot {
        if frame % 2 == 0 {
            PositionSlot::Primary
        } else {
            PositionSlot::Alternate
        }
    }

    /// Buffer compute reads in simulation frame `frame`
    pub fn compute_read(frame: u64) -> PositionSlot {
        Self::compute_write(frame).other()
    }

    /// Buffer graphics reads while rendering simulation frame `frame`
    pub fn graphics_read(frame: u64) -> PositionSlot {
        if frame == 0 {
            Self::compute_write(0)
        } else {
            Self::compute_write(frame - 1)
        }
    }
}

/// A physical buffer that can be written during a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Channel(Channel),
    GridCells,
    EntityCells,
}

impl Resource {
    /// Physical buffer behind a binding slot when compute writes `write_slot`
    pub fn for_slot(slot: BindingSlot, write_slot: PositionSlot) -> Self {
        match slot {
            BindingSlot::Velocity => Resource::Channel(Channel::Velocity),
            BindingSlot::MovementParams => Resource::Channel(Channel::MovementParams),
            BindingSlot::MovementCenter => Resource::Channel(Channel::MovementCenter),
            BindingSlot::RuntimeState => Resource::Channel(Channel::RuntimeState),
            BindingSlot::Rotation => Resource::Channel(Channel::Rotation),
            BindingSlot::Color => Resource::Channel(Channel::Color),
            BindingSlot::Transform => Resource::Channel(Channel::Transform),
            BindingSlot::PositionSource => Resource::Channel(write_slot.other().channel()),
            BindingSlot::PositionDestination => Resource::Channel(write_slot.channel()),
            BindingSlot::PositionCurrent => Resource::Channel(Channel::PositionCurrent),
            BindingSlot::PositionTarget => Resource::Channel(Channel::PositionTarget),
            BindingSlot::GridCells => Resource::GridCells,
            BindingSlot::EntityCells => Resource::EntityCells,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Channel(channel) => write!(f, "{}", channel.label()),
            Resource::GridCells => write!(f, "Grid Cells Buffer"),
            Resource::EntityCells => write!(f, "Entity Cells Buffer"),
        }
    }
}

/// Who wrote a buffer in a given frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    Upload,
    Node(&'static str),
}

impl fmt::Display for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Upload => write!(f, "upload"),
            Writer::Node(name) => write!(f, "node '{}'", name),
        }
    }
}

/// Per-frame single-writer ownership tags
#[derive(Debug, Default)]
pub struct WriterLedger {
    frame: u64,
    owners: HashMap<Resource, Writer>,
}

impl WriterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn roll_to(&mut self, frame: u64) {
        if frame != self.frame {
            self.frame = frame;
            self.owners.clear();
        }
    }

    /// Claim `resource` for `writer` in `frame`. Re-claiming by the same
    /// writer is allowed; a different writer is refused.
    pub fn claim(&mut self, frame: u64, resource: Resource, writer: Writer) -> SwarmResult<()> {
        self.roll_to(frame);
        match self.owners.get(&resource) {
            Some(&owner) if owner != writer => Err(SwarmError::WriterConflict {
                resource: resource.to_string(),
                owner: owner.to_string(),
                requested: writer.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.owners.insert(resource, writer);
                Ok(())
            }
        }
    }

    /// Whether `writer` could claim every resource in `frame`. Records nothing.
    pub fn check_all(&self, frame: u64, resources: &[Resource], writer: Writer) -> SwarmResult<()> {
        if frame != self.frame {
            return Ok(());
        }
        for resource in resources {
            if let Some(&owner) = self.owners.get(resource) {
                if owner != writer {
                    return Err(SwarmError::WriterConflict {
                        resource: resource.to_string(),
                        owner: owner.to_string(),
                        requested: writer.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Claim every resource or none of them
    pub fn claim_all(
        &mut self,
        frame: u64,
        resources: &[Resource],
        writer: Writer,
    ) -> SwarmResult<()> {
        self.roll_to(frame);
        self.check_all(frame, resources, writer)?;
        for &resource in resources {
            self.owners.insert(resource, writer);
        }
        Ok(())
    }

    pub fn owner(&self, frame: u64, resource: Resource) -> Option<Writer> {
        if frame != self.frame {
            return None;
        }
        self.owners.get(&resource).copied()
    }
}

/// Lets a repeating diagnostic through once per interval
#[derive(Clone, Debug)]
pub struct LogThrottle {
    interval: u64,
    last: Option<u64>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            last: None,
            suppressed: 0,
        }
    }

    /// Whether to log at `frame`. Returns the number of messages suppressed
    /// since the last one that went through.
    pub fn check(&mut self, frame: u64) -> Option<u64> {
        let due = match self.last {
            None => true,
            Some(last) => frame.saturating_sub(last) >= self.interval,
        };
        if due {
            self.last = Some(frame);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_pong_alternates() {
        for f in 0..1000u64 {
            assert_ne!(PingPong::compute_write(f), PingPong::compute_write(f + 1));
            assert_ne!(PingPong::compute_write(f), PingPong::compute_read(f));
        }
    }

    #[test]
    fn test_graphics_reads_previous_write() {
        assert_eq!(PingPong::graphics_read(0), PingPong::compute_write(0));
        for f in 1..1000u64 {
            assert_eq!(PingPong::graphics_read(f), PingPong::compute_write(f - 1));
            // Compute reads what graphics reads, never what it writes
            assert_eq!(PingPong::compute_read(f), PingPong::graphics_read(f));
        }
    }

    #[test]
    fn test_slot_resources_follow_parity() {
        let src = Resource::for_slot(BindingSlot::PositionSource, PositionSlot::Primary);
        let dst = Resource::for_slot(BindingSlot::PositionDestination, PositionSlot::Primary);
        assert_eq!(src, Resource::Channel(Channel::PositionAlternate));
        assert_eq!(dst, Resource::Channel(Channel::PositionPrimary));
        assert_eq!(
            Resource::for_slot(BindingSlot::GridCells, PositionSlot::Alternate),
            Resource::GridCells
        );
    }

    #[test]
    fn test_ledger_refuses_second_writer() {
        let mut ledger = WriterLedger::new();
        let velocity = Resource::Channel(Channel::Velocity);

        ledger.claim(3, velocity, Writer::Upload).unwrap();
        ledger.claim(3, velocity, Writer::Upload).unwrap();
        let err = ledger.claim(3, velocity, Writer::Node("movement")).unwrap_err();
        assert!(matches!(err, SwarmError::WriterConflict { .. }));
        assert_eq!(ledger.owner(3, velocity), Some(Writer::Upload));

        // Ownership does not carry into the next frame
        ledger.claim(4, velocity, Writer::Node("movement")).unwrap();
        assert_eq!(ledger.owner(4, velocity), Some(Writer::Node("movement")));
        assert_eq!(ledger.owner(3, velocity), None);
    }

    #[test]
    fn test_claim_all_is_atomic() {
        let mut ledger = WriterLedger::new();
        let grid = Resource::GridCells;
        let cells = Resource::EntityCells;

        ledger.claim(0, cells, Writer::Node("other")).unwrap();
        assert!(ledger
            .claim_all(0, &[grid, cells], Writer::Node("spatial_grid"))
            .is_err());
        assert_eq!(ledger.owner(0, grid), None);
    }

    #[test]
    fn test_check_all_records_nothing() {
        let mut ledger = WriterLedger::new();
        let velocity = Resource::Channel(Channel::Velocity);
        let transform = Resource::Channel(Channel::Transform);

        ledger.claim(7, velocity, Writer::Node("movement")).unwrap();
        assert!(ledger
            .check_all(7, &[transform, velocity], Writer::Upload)
            .is_err());
        ledger.check_all(7, &[transform], Writer::Upload).unwrap();
        assert_eq!(ledger.owner(7, transform), None);

        // A later frame starts with nothing owned
        ledger.check_all(8, &[velocity], Writer::Upload).unwrap();
        assert_eq!(ledger.owner(7, velocity), Some(Writer::Node("movement")));
    }

    #[test]
    fn test_log_throttle() {
        let mut throttle = LogThrottle::new(10);
        assert_eq!(throttle.check(0), Some(0));
        for f in 1..10 {
            assert_eq!(throttle.check(f), None);
        }
        assert_eq!(throttle.check(10), Some(9));
        assert_eq!(throttle.check(11), None);
    }
}
