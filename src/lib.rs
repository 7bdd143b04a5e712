pub mod bitmap;
pub mod context;
pub mod error;
pub mod rate;
pub mod replay;
pub mod sendpacket;
pub mod source;
pub mod structs;
pub mod timing;
pub mod ui;

pub use bitmap::RoutingBitmap;
pub use context::{Control, Options, ReplayContext, Stats, StatsSnapshot};
pub use error::{ConfigOutcome, Outcome, ReplayError, Result};
pub use rate::SpeedMode;
pub use sendpacket::Sender;
pub use structs::{Direction, Intf, PacketRecord, StepAction};
pub use timing::TimerKind;
