//! Plain data structures shared by the core and the actor.

mod closest_contacts;
mod contact;
mod id;
mod kbucket;
mod messages;
mod routing_table;
mod timestamp;

pub use closest_contacts::*;
pub use contact::*;
pub use id::*;
pub use kbucket::*;
pub use messages::*;
pub use routing_table::*;
pub use timestamp::*;
