// Packet contract consumed by detection
pub mod packet;

pub use packet::{CacheKey, FlowState, IcmpFields, IpFields, Packet, PacketFlags, TcpFields, TcpFlags};
