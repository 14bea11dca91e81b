//! Request-group, sub-id and Odin top-level-id constants.

/// Thor request groups.
pub mod group {
    pub const INFO: i32 = 200;
    pub const CMD: i32 = 201;
    pub const DL: i32 = 202;
    pub const UL: i32 = 203;
}

pub mod info {
    pub const VER_PROTOCOL: i32 = 1;
    pub const VER_HW: i32 = 2;
    pub const VER_BOOT: i32 = 3;
    pub const VER_KERNEL: i32 = 4;
    pub const VER_PLATFORM: i32 = 5;
    pub const VER_CSC: i32 = 6;
}

pub mod cmd {
    pub const REBOOT: i32 = 1;
    pub const POWEROFF: i32 = 2;
}

pub mod dl {
    pub const INIT: i32 = 1;
    pub const FILE_INFO: i32 = 2;
    pub const FILE_START: i32 = 3;
    pub const FILE_END: i32 = 4;
    pub const EXIT: i32 = 5;
}

pub mod ul {
    pub const INIT: i32 = 1;
    pub const START: i32 = 2;
    pub const END: i32 = 3;
    pub const EXIT: i32 = 4;
}

/// `FILE_INFO.int_data[0]` data-type tag.
pub mod data_type {
    pub const NORMAL: i32 = 0;
    pub const PIT: i32 = 1;
}

/// Odin top-level ids.
pub mod odin_id {
    pub const DL_INIT: u32 = 0x64;
    pub const PIT: u32 = 0x65;
    pub const FILE_XFER: u32 = 0x66;
    pub const DL_END: u32 = 0x67;
    pub const DEVINFO: u32 = 0x69;
}

/// Odin DL-INIT sub-ids.
pub mod odin_dl_init {
    pub const BEGIN: u32 = 0;
    pub const DEVICE_TYPE: u32 = 1;
    pub const BYTES: u32 = 2;
    pub const UNKNOWN_A: u32 = 3;
    pub const UNKNOWN_B: u32 = 4;
    pub const XFER_SIZE: u32 = 5;
    pub const UNKNOWN_C: u32 = 6;
    pub const UNKNOWN_D: u32 = 7;
    pub const TF: u32 = 8;
}

/// Odin PIT/FILE_XFER sub-ids.
pub mod odin_xfer {
    pub const FLASH: u32 = 0;
    pub const DUMP: u32 = 1;
    pub const PART: u32 = 2;
    pub const XFER_END: u32 = 3;
}

/// Odin DL-END sub-ids.
pub mod odin_dl_end {
    pub const REG: u32 = 0;
    pub const REBOOT: u32 = 1;
}
