pub mod data;
pub mod location;
pub mod network;
