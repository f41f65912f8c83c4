//! Link status reporting

use std::time::{Duration, Instant};

use log::{info, warn};

use super::{LinkStatus, PortDriver, PortId, PortTable};

/// How long to wait for links and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for LinkWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(9),
            interval: Duration::from_millis(100),
        }
    }
}

impl LinkWait {
    /// Poll once and report whatever state the links are in
    pub fn immediate() -> Self {
        Self {
            timeout: Duration::ZERO,
            interval: Duration::ZERO,
        }
    }
}

/// Poll every port in `table` until all links are up or `wait.timeout` expires
///
/// Purely diagnostic: ports still down at the deadline are logged, never
/// treated as errors.
pub fn check_all_ports_link_status(
    table: &PortTable,
    driver: &dyn PortDriver,
    wait: LinkWait,
) -> Vec<(PortId, LinkStatus)> {
    info!("Checking link status");
    let deadline = Instant::now() + wait.timeout;

    let states = loop {
        let states: Vec<(PortId, LinkStatus)> = table
            .ids()
            .iter()
            .map(|&port| (port, driver.link_status(port)))
            .collect();

        if states.iter().all(|(_, s)| s.up) {
            break states;
        }
        let now = Instant::now();
        if now >= deadline {
            let down = states.iter().filter(|(_, s)| !s.up).count();
            warn!(
                "{} of {} ports still down after {:?}",
                down,
                states.len(),
                wait.timeout
            );
            break states;
        }
        std::thread::sleep(wait.interval.min(deadline - now));
    };

    for (port, status) in &states {
        info!("Port {} {}", port, status);
    }
    states
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{buffers::PacketPool, memory::SharedMemoryRegion, ports::SoftPortDriver};

    fn setup(ports: &[PortId]) -> (PortTable, PacketPool) {
        let region = Arc::new(
            SharedMemoryRegion::anonymous("MProc_port_info", PortTable::required_size()).unwrap(),
        );
        let table = PortTable::create(region, ports, 1).unwrap();
        let size = PacketPool::required_size(4, 64).unwrap();
        let region = Arc::new(SharedMemoryRegion::anonymous("pool", size).unwrap());
        (table, PacketPool::create(region, 4, 64, 0).unwrap())
    }

    #[test]
    fn test_all_links_up() {
        let (table, pool) = setup(&[0, 1]);
        let mut driver = SoftPortDriver::new(2);
        driver.init_port(0, &pool).unwrap();
        driver.init_port(1, &pool).unwrap();

        let states = check_all_ports_link_status(&table, &driver, LinkWait::default());
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, s)| s.up));
    }

    #[test]
    fn test_timeout_is_not_fatal() {
        let (table, pool) = setup(&[0]);
        let mut driver = SoftPortDriver::new(1).with_link_delay(Duration::from_secs(3600));
        driver.init_port(0, &pool).unwrap();

        let wait = LinkWait {
            timeout: Duration::from_millis(30),
            interval: Duration::from_millis(10),
        };
        let start = Instant::now();
        let states = check_all_ports_link_status(&table, &driver, wait);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(states, vec![(0, LinkStatus::DOWN)]);
    }

    #[test]
    fn test_link_comes_up_while_polling() {
        let (table, pool) = setup(&[0]);
        let mut driver = SoftPortDriver::new(1).with_link_delay(Duration::from_millis(20));
        driver.init_port(0, &pool).unwrap();

        let wait = LinkWait {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(5),
        };
        let states = check_all_ports_link_status(&table, &driver, wait);
        assert!(states[0].1.up);
    }
}
