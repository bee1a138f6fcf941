//! Async Beckhoff ADS driver.
//!
//! A [`Connection`] talks to one ADS device (usually a TwinCAT PLC runtime)
//! through an AMS router. Tags are addressed either directly, as
//! `group/offset:TYPE`, or symbolically, as `MAIN.motor.speed`; symbolic tags
//! are resolved once per connection and cached.
//!
//! ```ignore
//! use ads_driver::{Connection, ConnectionConfig, PlcValue, ReadRequest};
//!
//! let config = ConnectionConfig::load_from_path("plc.toml")?;
//! let connection = Connection::connect(("192.168.1.100", 48898), config).await?;
//!
//! let response = connection
//!     .read(ReadRequest::new().add_address("counter", "MAIN.counter")?)
//!     .await?;
//! println!("{:?}", response.value("counter"));
//!
//! connection.write_tag("1234/5678:BOOL", PlcValue::Bool(true)).await?;
//! connection.close().await;
//! ```
mod browser;
mod config;
mod connection;
mod context;
mod correlator;
mod error;
mod reader;
mod resolver;
mod subscription;
mod tag;
mod value;
mod writer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use browser::{BrowseItem, browse};
pub use config::{ConfigError, ConnectionConfig, DEFAULT_SOURCE_PORT, SymbolResolution};
pub use connection::{Connection, DeviceState};
pub use context::{
    DataTypeEntry, DriverContext, MAX_TYPE_DEPTH, ResolvedSymbol, SymbolEntry, UploadInfo,
};
pub use correlator::MAX_INVOKE_ID;
pub use error::{Error, ResolveError, Result, TableError, TagError, ValueError};
pub use reader::{ReadRequest, ReadResponse, ResponseCode, TagValue};
pub use subscription::{Notification, Subscription, SubscriptionOptions, filetime_to_system_time};
pub use tag::{
    AdsDataType, ArrayInfo, DEFAULT_STRING_LENGTH, DirectTag, FieldLayout, StructLayout,
    SymbolicTag, Tag, ValueType, element_count, parse_tag,
};
pub use value::{PlcValue, decode, decode_tag, encode_tag};
pub use writer::{WriteRequest, WriteResponse};

pub use ads_transport::{AmsAddr, AmsNetId, DeviceInfo, ReturnCode, TransmissionMode};
