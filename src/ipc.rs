//! The link between the game process and the display process. The game process spawns the
//! display process and writes frames to its stdin; the display process reads them back and
//! replays them on its own model.

pub mod client;
mod transport;

pub use transport::{client_executable, IpcSender, SpawnConfig, CLIENT_EXECUTABLE};
