//! Network ports: the shared descriptor table, the driver seam and link checks

pub mod driver;
pub mod link;
pub mod mask;
pub mod table;

/// Port identifier as reported by the driver
pub type PortId = u16;

pub use driver::{soft_frame_sequence, LinkStatus, PortDriver, SoftPortDriver, SOFT_FRAME_LEN};
pub use link::{check_all_ports_link_status, LinkWait};
pub use mask::parse_portmask;
pub use table::PortTable;
