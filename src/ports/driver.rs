//! Port bring-up and receive collaborator

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    buffers::{BufferRef, PacketPool},
    error::{DistError, Result},
};

use super::PortId;

/// Link state of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub up: bool,
    pub speed_mbps: u32,
    pub full_duplex: bool,
}

impl LinkStatus {
    /// A link that is down
    pub const DOWN: LinkStatus = LinkStatus {
        up: false,
        speed_mbps: 0,
        full_duplex: false,
    };
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.up {
            write!(
                f,
                "Link Up - speed {} Mbps - {}",
                self.speed_mbps,
                if self.full_duplex { "full-duplex" } else { "half-duplex" }
            )
        } else {
            write!(f, "Link Down")
        }
    }
}

/// Hardware side of the owner: which ports exist, bringing them up, reading
/// frames off them into pool buffers
pub trait PortDriver: Send {
    /// Ports the driver can bring up
    fn available_ports(&self) -> Vec<PortId>;

    /// Configure `port` to receive into buffers from `pool`
    fn init_port(&mut self, port: PortId, pool: &PacketPool) -> Result<()>;

    /// Current link state
    fn link_status(&self, port: PortId) -> LinkStatus;

    /// Receive up to `max` frames, appending filled buffers to `out`
    ///
    /// Returns the number of buffers appended. Stops early when the pool
    /// runs dry.
    fn rx_burst(
        &mut self,
        port: PortId,
        pool: &PacketPool,
        out: &mut Vec<BufferRef>,
        max: usize,
    ) -> usize;
}

/// Length of the frames [`SoftPortDriver`] generates by default
pub const SOFT_FRAME_LEN: usize = 64;

const SOFT_ETHERTYPE: u16 = 0x88B5;

#[derive(Debug)]
struct SoftPort {
    up_since: Instant,
    sequence: u64,
}

/// Software port driver producing synthetic Ethernet frames
///
/// Frames carry the port in the source MAC and a per-port sequence number
/// right after the EtherType.
#[derive(Debug)]
pub struct SoftPortDriver {
    port_count: u16,
    link_delay: Duration,
    speed_mbps: u32,
    frame_len: usize,
    frame_budget: Option<u64>,
    failing: BTreeSet<PortId>,
    ports: BTreeMap<PortId, SoftPort>,
}

impl SoftPortDriver {
    /// Driver exposing ports `0..port_count`
    pub fn new(port_count: u16) -> Self {
        Self {
            port_count,
            link_delay: Duration::ZERO,
            speed_mbps: 10_000,
            frame_len: SOFT_FRAME_LEN,
            frame_budget: None,
            failing: BTreeSet::new(),
            ports: BTreeMap::new(),
        }
    }

    /// Links come up this long after `init_port`
    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        self.link_delay = delay;
        self
    }

    /// Size of generated frames (at least 22 bytes to hold the sequence)
    pub fn with_frame_len(mut self, len: usize) -> Self {
        self.frame_len = len.max(22);
        self
    }

    /// Stop generating after this many frames per port
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    /// Make `init_port` fail for `port`
    pub fn failing_port(mut self, port: PortId) -> Self {
        self.failing.insert(port);
        self
    }

    /// Whether `init_port` has succeeded for `port`
    pub fn is_initialised(&self, port: PortId) -> bool {
        self.ports.contains_key(&port)
    }

    /// Frames generated so far on `port`
    pub fn frames_sent(&self, port: PortId) -> u64 {
        self.ports.get(&port).map_or(0, |p| p.sequence)
    }

    fn build_frame(&self, port: PortId, sequence: u64) -> Vec<u8> {
        let mut frame = vec![0u8; self.frame_len];
        frame[..6].fill(0xFF);
        frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, (port >> 8) as u8, port as u8]);
        frame[12..14].copy_from_slice(&SOFT_ETHERTYPE.to_be_bytes());
        frame[14..22].copy_from_slice(&sequence.to_le_bytes());
        frame
    }
}

/// Sequence number stamped by [`SoftPortDriver`], if the frame is one of its
pub fn soft_frame_sequence(frame: &[u8]) -> Option<u64> {
    if frame.len() < 22 || frame[12..14] != SOFT_ETHERTYPE.to_be_bytes() {
        return None;
    }
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&frame[14..22]);
    Some(u64::from_le_bytes(seq))
}

impl PortDriver for SoftPortDriver {
    fn available_ports(&self) -> Vec<PortId> {
        (0..self.port_count).collect()
    }

    fn init_port(&mut self, port: PortId, pool: &PacketPool) -> Result<()> {
        if port >= self.port_count {
            return Err(DistError::PortUnavailable { port });
        }
        if self.failing.contains(&port) {
            return Err(DistError::port_init(port, "device configuration rejected"));
        }

        debug!(
            "Initialising port {} with pool {} ({} buffers)",
            port,
            pool.name(),
            pool.capacity()
        );
        self.ports.insert(
            port,
            SoftPort {
                up_since: Instant::now() + self.link_delay,
                sequence: 0,
            },
        );
        Ok(())
    }

    fn link_status(&self, port: PortId) -> LinkStatus {
        match self.ports.get(&port) {
            Some(p) if Instant::now() >= p.up_since => LinkStatus {
                up: true,
                speed_mbps: self.speed_mbps,
                full_duplex: true,
            },
            _ => LinkStatus::DOWN,
        }
    }

    fn rx_burst(
        &mut self,
        port: PortId,
        pool: &PacketPool,
        out: &mut Vec<BufferRef>,
        max: usize,
    ) -> usize {
        if !self.link_status(port).up {
            return 0;
        }

        let mut received = 0;
        while received < max {
            let sequence = self.frames_sent(port);
            if self.frame_budget.map_or(false, |budget| sequence >= budget) {
                break;
            }
            let Some(mut buf) = pool.allocate() else {
                break;
            };
            let frame = self.build_frame(port, sequence);
            if let Err(e) = pool.fill(&mut buf, port, &frame) {
                warn!("Port {}: cannot fill buffer: {}", port, e);
                let _ = pool.release(buf);
                break;
            }
            out.push(buf);

            if let Some(p) = self.ports.get_mut(&port) {
                p.sequence += 1;
            }
            received += 1;
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::SharedMemoryRegion;

    fn pool(capacity: usize) -> PacketPool {
        let size = PacketPool::required_size(capacity, 128).unwrap();
        let region = Arc::new(SharedMemoryRegion::anonymous("soft_pool", size).unwrap());
        PacketPool::create(region, capacity, 128, 0).unwrap()
    }

    #[test]
    fn test_init_unknown_and_failing_ports() {
        let pool = pool(4);
        let mut driver = SoftPortDriver::new(2).failing_port(1);
        assert_eq!(driver.available_ports(), vec![0, 1]);
        assert!(matches!(
            driver.init_port(7, &pool),
            Err(DistError::PortUnavailable { port: 7 })
        ));
        assert!(matches!(
            driver.init_port(1, &pool),
            Err(DistError::PortInit { port: 1, .. })
        ));
        driver.init_port(0, &pool).unwrap();
        assert!(driver.is_initialised(0));
    }

    #[test]
    fn test_link_follows_delay() {
        let pool = pool(4);
        let mut driver = SoftPortDriver::new(1).with_link_delay(Duration::from_secs(3600));
        assert!(!driver.link_status(0).up);
        driver.init_port(0, &pool).unwrap();
        assert!(!driver.link_status(0).up);

        let mut instant = SoftPortDriver::new(1);
        instant.init_port(0, &pool).unwrap();
        let status = instant.link_status(0);
        assert!(status.up);
        assert_eq!(status.to_string(), "Link Up - speed 10000 Mbps - full-duplex");
    }

    #[test]
    fn test_rx_burst_stops_when_pool_empty() {
        let pool = pool(3);
        let mut driver = SoftPortDriver::new(1);
        driver.init_port(0, &pool).unwrap();

        let mut out = Vec::new();
        assert_eq!(driver.rx_burst(0, &pool, &mut out, 8), 3);
        assert_eq!(pool.available(), 0);

        for (i, buf) in out.iter().enumerate() {
            assert_eq!(pool.port_of(buf).unwrap(), 0);
            assert_eq!(soft_frame_sequence(pool.frame(buf).unwrap()), Some(i as u64));
        }
        for buf in out {
            pool.release(buf).unwrap();
        }
    }

    #[test]
    fn test_frame_budget() {
        let pool = pool(8);
        let mut driver = SoftPortDriver::new(1).with_frame_budget(2);
        driver.init_port(0, &pool).unwrap();

        let mut out = Vec::new();
        assert_eq!(driver.rx_burst(0, &pool, &mut out, 8), 2);
        assert_eq!(driver.rx_burst(0, &pool, &mut out, 8), 0);
        assert_eq!(driver.frames_sent(0), 2);
        for buf in out {
            pool.release(buf).unwrap();
        }
    }
}
