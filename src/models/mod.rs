mod newsletter;
mod online_event;
mod open_call;
mod organization;
mod plan;
mod scheduled_task;
mod subscription;
mod user;
mod webhook_event;

pub use newsletter::*;
pub use online_event::*;
pub use open_call::*;
pub use organization::*;
pub use plan::*;
pub use scheduled_task::*;
pub use subscription::*;
pub use user::*;
pub use webhook_event::*;
