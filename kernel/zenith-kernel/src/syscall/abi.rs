//! Kernel/userspace ABI types.
//!
//! Every struct here crosses the syscall boundary by pointer and is
//! `#[repr(C)]` with explicit padding so the userspace runtime can mirror
//! it byte for byte.

pub use crate::input::{KeyEvent, MouseState};
pub use crate::time::DateTime;

/// Operating system identity, filled by `SYS_GETINFO`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SysInfo {
    /// NUL-terminated OS name.
    pub os_name: [u8; 32],
    /// NUL-terminated version string.
    pub os_version: [u8; 32],
    /// Syscall ABI version.
    pub api_version: u32,
    /// Size of the process table.
    pub max_processes: u32,
}

impl SysInfo {
    /// The current identity record.
    #[must_use]
    pub fn current() -> Self {
        let mut info = Self {
            os_name: [0; 32],
            os_version: [0; 32],
            api_version: 1,
            max_processes: crate::proc::MAX_PROCESSES as u32,
        };
        info.os_name[..8].copy_from_slice(b"ZenithOS");
        info.os_version[..5].copy_from_slice(b"0.1.0");
        info
    }
}

/// Framebuffer geometry, filled by `SYS_FBINFO`; `user_addr` is populated
/// once `SYS_FBMAP` has mapped the framebuffer into the caller.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct FbInfo {
    /// Width in pixels.
    pub width: u64,
    /// Height in pixels.
    pub height: u64,
    /// Bytes per scanline (may exceed `width * 4`).
    pub pitch: u64,
    /// Bits per pixel (32).
    pub bpp: u64,
    /// User virtual address of the mapping, 0 until mapped.
    pub user_addr: u64,
}

/// Network configuration exchanged by `SYS_GETNETCFG`/`SYS_SETNETCFG`.
/// All addresses are network byte order.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct NetCfg {
    /// Interface address.
    pub ip_address: u32,
    /// Subnet mask.
    pub subnet_mask: u32,
    /// Default gateway.
    pub gateway: u32,
    /// Interface MAC.
    pub mac_address: [u8; 6],
    /// Explicit padding.
    pub _pad: [u8; 2],
    /// DNS resolver.
    pub dns_server: u32,
}

/// Socket peer address for `SYS_SENDTO`/`SYS_RECVFROM`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SockAddr {
    /// IPv4 address, network byte order.
    pub ip: u32,
    /// Port, host byte order.
    pub port: u16,
    /// Explicit padding.
    pub _pad: u16,
}

/// One process-table row, filled by `SYS_PROCLIST`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ProcInfo {
    /// Process id.
    pub pid: i32,
    /// Parent process id.
    pub parent_pid: i32,
    /// State: 0 = Free, 1 = Ready, 2 = Running, 3 = Terminated.
    pub state: u8,
    /// Explicit padding.
    pub _pad: [u8; 3],
    /// NUL-terminated program name.
    pub name: [u8; 64],
    /// Bytes of user heap consumed.
    pub heap_used: u64,
}

/// One device row, filled by `SYS_DEVLIST`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DevInfo {
    /// Category: 0 CPU, 1 interrupt, 2 timer, 3 input, 4 USB, 5 network,
    /// 6 display, 7 PCI.
    pub category: u8,
    /// Explicit padding.
    pub _pad: [u8; 3],
    /// NUL-terminated device name.
    pub name: [u8; 48],
    /// NUL-terminated detail string.
    pub detail: [u8; 48],
}

impl DevInfo {
    /// Builds a row from string slices, truncating to the fixed fields.
    #[must_use]
    pub fn new(category: u8, name: &str, detail: &str) -> Self {
        let mut row = Self {
            category,
            _pad: [0; 3],
            name: [0; 48],
            detail: [0; 48],
        };
        let n = name.len().min(47);
        row.name[..n].copy_from_slice(&name.as_bytes()[..n]);
        let n = detail.len().min(47);
        row.detail[..n].copy_from_slice(&detail.as_bytes()[..n]);
        row
    }
}

/// One window-registry row, filled by `SYS_WINENUM`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct WinInfo {
    /// Window id.
    pub id: i32,
    /// Owning process.
    pub owner_pid: i32,
    /// NUL-terminated title.
    pub title: [u8; 64],
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Non-zero when presented since the last compositor pass.
    pub dirty: u8,
    /// Explicit padding.
    pub _pad: [u8; 3],
}

/// Result of `SYS_WINCREATE`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct WinCreateResult {
    /// New window id, -1 on failure.
    pub id: i32,
    /// Explicit padding.
    pub _pad: u32,
    /// User virtual address of the window's pixel buffer.
    pub pixel_va: u64,
}

/// Window event record crossing the ABI (flattened form of
/// [`crate::winsrv::WinEvent`]).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct WinEventAbi {
    /// 0 key, 1 mouse, 2 resize, 3 close.
    pub event_type: u8,
    /// Explicit padding.
    pub _pad: [u8; 3],
    /// Key payload (type 0).
    pub key: KeyEvent,
    /// Mouse payload (type 1): x, y, scroll.
    pub mouse_x: i32,
    /// Mouse y.
    pub mouse_y: i32,
    /// Wheel movement.
    pub mouse_scroll: i32,
    /// Current button mask.
    pub mouse_buttons: u8,
    /// Previous button mask.
    pub mouse_prev_buttons: u8,
    /// Explicit padding.
    pub _pad2: [u8; 2],
    /// Resize payload (type 2): width, height.
    pub resize_w: i32,
    /// New height.
    pub resize_h: i32,
}

impl From<crate::winsrv::WinEvent> for WinEventAbi {
    fn from(event: crate::winsrv::WinEvent) -> Self {
        let mut abi = Self::default();
        match event {
            crate::winsrv::WinEvent::Key(key) => {
                abi.event_type = 0;
                abi.key = key;
            }
            crate::winsrv::WinEvent::Mouse { x, y, scroll, buttons, prev_buttons } => {
                abi.event_type = 1;
                abi.mouse_x = x;
                abi.mouse_y = y;
                abi.mouse_scroll = scroll;
                abi.mouse_buttons = buttons;
                abi.mouse_prev_buttons = prev_buttons;
            }
            crate::winsrv::WinEvent::Resize { width, height } => {
                abi.event_type = 2;
                abi.resize_w = width;
                abi.resize_h = height;
            }
            crate::winsrv::WinEvent::Close => {
                abi.event_type = 3;
            }
        }
        abi
    }
}

impl From<WinEventAbi> for crate::winsrv::WinEvent {
    fn from(abi: WinEventAbi) -> Self {
        match abi.event_type {
            0 => Self::Key(abi.key),
            1 => Self::Mouse {
                x: abi.mouse_x,
                y: abi.mouse_y,
                scroll: abi.mouse_scroll,
                buttons: abi.mouse_buttons,
                prev_buttons: abi.mouse_prev_buttons,
            },
            2 => Self::Resize {
                width: abi.resize_w,
                height: abi.resize_h,
            },
            _ => Self::Close,
        }
    }
}
