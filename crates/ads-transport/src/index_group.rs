//! Well-known ADS index groups, named as in Beckhoff's `AdsDef.h`.

#![allow(missing_docs)]

/// PLC memory (%M fields).
pub const ADSIGRP_PLC_RW_M: u32 = 0x4020;
/// PLC memory as bits (%MX fields). Offset is `byte * 8 + bit`.
pub const ADSIGRP_PLC_RW_MX: u32 = 0x4021;
/// PLC data area.
pub const ADSIGRP_PLC_RW_DB: u32 = 0x4040;

pub const ADSIGRP_SYMTAB: u32 = 0xF000;
pub const ADSIGRP_SYMNAME: u32 = 0xF001;
pub const ADSIGRP_SYMVAL: u32 = 0xF002;

/// Get a `u32` handle for the symbol name in the write data.
/// Use with a read-write request, index offset 0.
pub const ADSIGRP_SYM_HNDBYNAME: u32 = 0xF003;
pub const ADSIGRP_SYM_VALBYNAME: u32 = 0xF004;
/// Read or write a symbol value; the handle is the index offset.
pub const ADSIGRP_SYM_VALBYHND: u32 = 0xF005;
/// Release a symbol handle passed as write data. Index offset 0.
pub const ADSIGRP_SYM_RELEASEHND: u32 = 0xF006;
pub const ADSIGRP_SYM_INFOBYNAME: u32 = 0xF007;
pub const ADSIGRP_SYM_VERSION: u32 = 0xF008;
pub const ADSIGRP_SYM_INFOBYNAMEEX: u32 = 0xF009;
pub const ADSIGRP_SYM_DOWNLOAD: u32 = 0xF00A;
/// Upload the symbol table.
pub const ADSIGRP_SYM_UPLOAD: u32 = 0xF00B;
pub const ADSIGRP_SYM_UPLOADINFO: u32 = 0xF00C;
/// Upload the data-type table.
pub const ADSIGRP_SYM_DT_UPLOAD: u32 = 0xF00E;
/// Counts and byte lengths of the symbol and data-type tables.
pub const ADSIGRP_SYM_UPLOADINFO2: u32 = 0xF00F;

/// Physical inputs (%I fields).
pub const ADSIGRP_IOIMAGE_RWIB: u32 = 0xF020;
/// Physical inputs as bits (%IX fields).
pub const ADSIGRP_IOIMAGE_RWIX: u32 = 0xF021;
/// Physical outputs (%Q fields).
pub const ADSIGRP_IOIMAGE_RWOB: u32 = 0xF030;
/// Physical outputs as bits (%QX fields).
pub const ADSIGRP_IOIMAGE_RWOX: u32 = 0xF031;

/// Sum command: several reads in one read-write request.
/// The index offset holds the item count.
pub const ADSIGRP_MULTIPLE_READ: u32 = 0xF080;
pub const ADSIGRP_MULTIPLE_WRITE: u32 = 0xF081;
pub const ADSIGRP_MULTIPLE_READ_WRITE: u32 = 0xF082;

pub const ADSIGRP_DEVICE_DATA: u32 = 0xF100;
/// Index offset of the ADS state inside [`ADSIGRP_DEVICE_DATA`].
pub const ADSIOFFS_DEVDATA_ADSSTATE: u32 = 0x0000;
/// Index offset of the device state inside [`ADSIGRP_DEVICE_DATA`].
pub const ADSIOFFS_DEVDATA_DEVSTATE: u32 = 0x0002;
