pub mod codec;
pub mod master;
pub mod slave;

pub use codec::{CodecError, Frame, FrameReader};
pub use master::{
    LinkReadyAction, SlaveTable, CODE_MASTER_HEARTBEAT, CODE_MASTER_LINK_READY_1, CODE_MASTER_LINK_READY_2,
};
pub use slave::{Escalation, SlaveRecord};
