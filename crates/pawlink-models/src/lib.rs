pub mod broker;
pub mod events;
pub mod ids;
pub mod presence;
pub mod typing;
