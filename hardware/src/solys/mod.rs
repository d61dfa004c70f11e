//! Solys2 sun tracker driver.
//!
//! The driver is layered:
//!
//! - [`protocol`] encodes [`Command`]s and decodes reply lines into a
//!   [`DeviceReply`] (or "no reply")
//! - [`Connection`] owns the TCP session, handshakes, and recovers from
//!   transport failures and silent firmware by reconnecting and resending
//! - [`Solys2`] is the typed command surface on top of a connection
//!
//! # Example
//!
//! ```no_run
//! use hardware::solys::{ConnectionConfig, Solys2};
//!
//! let config = ConnectionConfig {
//!     host: "192.168.1.9".to_string(),
//!     ..ConnectionConfig::default()
//! };
//! let mut solys = Solys2::connect(config)?;
//!
//! solys.set_position(180.0, 45.0)?;
//! let position = solys.get_current_position()?;
//! println!("Pointing at az={:.3} ze={:.3}", position.azimuth, position.zenith);
//! # Ok::<(), hardware::solys::SolysError>(())
//! ```

mod client;
mod connection;
mod error;
pub mod protocol;
mod status;

pub use client::{CurrentPosition, Location, Solys2, SunIntensity, MAX_ADJUSTMENT_STEP};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, DEFAULT_PASSWORD, DEFAULT_PORT,
};
pub use error::{SolysError, SolysResult};
pub use protocol::{Axis, Command, DeviceReply, ErrorCode, Payload};
pub use status::{DeviceStatus, StatusFlags, TrackerFunction};
