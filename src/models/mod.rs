// Models module - Database entity representations

pub mod entitlement;
pub mod event;
pub mod scan_log;
pub mod ticket;

pub use entitlement::{Entitlement, EntitlementStatus};
pub use event::Event;
pub use scan_log::ScanLog;
pub use ticket::{Ticket, TicketStatus};
