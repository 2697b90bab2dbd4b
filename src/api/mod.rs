//! Public polling API
//!
//! - `scanner`: address sweeps and profile-based discovery
//! - `poller`: one read per registered device per cycle
//! - `poll_loop`: periodic scheduling on the blocking pool
//! - `alerts`: transition detection for warning and alarm
//! - `traits`: sink interfaces for readings and alerts
//! - `monitor`: config-driven wiring of all of the above
pub mod alerts;
pub mod monitor;
pub mod poll_loop;
pub mod poller;
pub mod scanner;
pub mod traits;

pub use alerts::AlertTracker;
pub use monitor::Monitor;
pub use poll_loop::{PollControl, PollLoop, PollLoopHandle};
pub use poller::Poller;
pub use scanner::Scanner;
pub use traits::{
    dispatch_alert, dispatch_reading, AlertSink, FlumeAlertSink, FlumeReadingSink, LoggingSink,
    ReadingSink,
};
