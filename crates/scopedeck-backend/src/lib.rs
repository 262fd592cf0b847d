mod process;
mod simulated;
mod traits;
mod types;

pub use process::ProcessBackend;
pub use simulated::{SimulatedBackend, SimulatorConfig};
pub use traits::{Backend, BackendError};
pub use types::{
    ChannelConfig, ChannelId, ChannelTraces, Coupling, SaveReceipt, SaveRequest, StreamRequest,
    TimeAxis, VOLT_RANGES,
};
