//! Gateway wire types: opcodes, intents, close codes, and payload shapes.

pub mod close_code;
pub mod event;
pub mod opcode;
pub mod payload;
pub mod session_start_limit;

mod intents;

pub use close_code::CloseCode;
pub use event::{DispatchEvent, GatewayEvent};
pub use intents::Intents;
pub use opcode::OpCode;
pub use session_start_limit::SessionStartLimit;
