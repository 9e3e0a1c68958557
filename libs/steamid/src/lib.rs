//! # booker-steamid
//!
//! Conversions between the three canonical encodings of a game account
//! identifier.
//!
//! ## Encodings
//!
//! | Encoding  | Example              | Notes                              |
//! |-----------|----------------------|------------------------------------|
//! | Textual   | `STEAM_0:1:4491990`  | `STEAM_X:Y:Z`, account = `Z*2 + Y` |
//! | Steam3    | `[U:1:8983981]`      | brackets optional when parsing     |
//! | Community | `76561197969249709`  | `BASE + account`                   |
//!
//! All three carry the same 32-bit account number, so conversions are
//! lossless. `STEAM_1:` textual ids are accepted and normalised to `STEAM_0:`
//! on output, which is what the game server logs emit.

mod error;
mod types;

pub use error::SteamIdError;
pub use types::{SteamId, COMMUNITY_BASE};
