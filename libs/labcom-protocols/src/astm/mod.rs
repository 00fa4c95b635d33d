//! ASTM E1381/E1394 Protocol
//!
//! Low-level framing (E1381), record decoding (E1394) and the
//! ENQ/ACK/NAK/EOT session state machine.

pub mod frame;
pub mod records;
pub mod session;

pub use frame::{AstmFrame, AstmFrameAssembler, AstmToken};
pub use records::{parse_message, AstmMessage};
pub use session::{AstmSession, SessionOutput, SessionState};
