// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Raw x86 I/O port access.
//!
//! The EC driver only needs three things from the platform: read a byte
//! from a port, write a byte to a port, and know whether the privileged
//! channel is usable at all. [`PortIo`] captures exactly that, and
//! [`DevPort`] implements it on top of the kernel's `/dev/port` node,
//! where the file offset is the port number.

use crate::error::EcError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Default character device for port I/O.
pub const DEFAULT_PORT_DEVICE: &str = "/dev/port";

/// Byte-wide access to the I/O port address space.
pub trait PortIo {
    /// Read one byte from `port`.
    fn read_byte(&mut self, port: u16) -> io::Result<u8>;

    /// Write one byte to `port`.
    fn write_byte(&mut self, port: u16, value: u8) -> io::Result<()>;

    /// Whether the underlying channel is open and authorized.
    fn is_open(&self) -> bool;
}

impl<T: PortIo + ?Sized> PortIo for Box<T> {
    fn read_byte(&mut self, port: u16) -> io::Result<u8> {
        (**self).read_byte(port)
    }

    fn write_byte(&mut self, port: u16, value: u8) -> io::Result<()> {
        (**self).write_byte(port, value)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: PortIo + ?Sized> PortIo for &mut T {
    fn read_byte(&mut self, port: u16) -> io::Result<u8> {
        (**self).read_byte(port)
    }

    fn write_byte(&mut self, port: u16, value: u8) -> io::Result<()> {
        (**self).write_byte(port, value)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

// ---------------------------------------------------------------------------
// /dev/port backend
// ---------------------------------------------------------------------------

/// Port access through `/dev/port`. Requires `CAP_SYS_RAWIO` (in practice, root).
#[derive(Debug)]
pub struct DevPort {
    file: File,
}

impl DevPort {
    /// Open the port device read-write.
    ///
    /// A missing node maps to [`EcError::PortUnavailable`]; a permission
    /// failure maps to [`EcError::Unauthorized`].
    pub fn open(path: &Path) -> Result<Self, EcError> {
        if !path.exists() {
            return Err(EcError::PortUnavailable {
                path: path.to_path_buf(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => EcError::Unauthorized(unauthorized_hint(path)),
                io::ErrorKind::NotFound => EcError::PortUnavailable {
                    path: path.to_path_buf(),
                },
                _ => EcError::Io(e),
            })?;

        log::debug!("Opened {} for port I/O", path.display());
        Ok(Self { file })
    }
}

impl PortIo for DevPort {
    fn read_byte(&mut self, port: u16) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.file.read_exact_at(&mut buf, u64::from(port))?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, port: u16, value: u8) -> io::Result<()> {
        self.file.write_all_at(&[value], u64::from(port))
    }

    // Holding the handle means open() got past the permission check.
    fn is_open(&self) -> bool {
        true
    }
}

fn unauthorized_hint(path: &Path) -> String {
    if nix::unistd::geteuid().is_root() {
        format!(
            "{} refused access even as root (kernel lockdown or missing CAP_SYS_RAWIO?)",
            path.display()
        )
    } else {
        format!("{} requires root. Run as root.", path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = DevPort::open(&dir.path().join("no-such-port")).unwrap_err();
        assert!(matches!(err, EcError::PortUnavailable { .. }));
    }

    #[test]
    fn test_regular_file_reads_and_writes_at_port_offset() {
        // A plain file behaves like /dev/port for offset addressing.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port");
        std::fs::write(&path, vec![0u8; 0x100]).unwrap();

        let mut port = DevPort::open(&path).unwrap();
        assert!(port.is_open());
        port.write_byte(0x62, 0xAB).unwrap();
        assert_eq!(port.read_byte(0x62).unwrap(), 0xAB);
        assert_eq!(port.read_byte(0x66).unwrap(), 0);
    }
}
