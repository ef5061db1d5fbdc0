// Concrete rule option primitives evaluated by the option tree
pub mod bytes;
pub mod content;
pub mod fields;
pub mod flow;
pub mod pcre;

pub use bytes::{ByteExtract, ByteJumpOption, ByteOp, ByteTestOption, IsDataAtOption, NumberBase};
pub use content::{ContentBuffer, ContentModifiers, ContentOption, ContentSearch};
pub use fields::{FieldCheck, FieldOp, FlagMode, PacketField, TcpFlagsOption};
pub use flow::{FlowBitOp, FlowBitStore, FlowBitsOption, FlowDirection, FlowOption};
pub use pcre::{PcreOption, PcreSearch};
