mod registry;

pub use registry::{SessionInfo, SessionRegistry, SessionStream, SessionTicket};
