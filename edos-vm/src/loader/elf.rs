//! Utility for parsing ELF files.
//!
//! The Executable and Linkable Format (ELF) is the standard file format for
//! the executables of the modelled machine. An ELF file carries a file
//! header and a table of program headers; the program headers describe the
//! segments used at run time, which is all the loader cares about.

use alloc::vec;
use alloc::vec::Vec;
use edos::KernelError;
use edos::fs::RegularFile;
use edos::mm::page_table::Permission;

/// Size of the ELF64 file header.
const EHDR_SIZE: usize = 64;
/// Size of one ELF64 program header entry.
const PHDR_SIZE: usize = 0x38;
/// Machine id of the modelled RISC machine.
const EM_RISCV: u16 = 0xf3;

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// The parsed ELF file header.
///
/// Only the fields the loader consumes are retained; the validity checks of
/// [`Elf::from_file`] cover the rest.
#[derive(Clone, Copy, Debug)]
pub struct ElfHeader {
    /// Memory address of the entry point where execution starts.
    pub entry: u64,
    /// Offset of the program header table in bytes.
    pub phoff: u64,
    /// Size of a program header table entry in bytes.
    pub phentsize: u16,
    /// Number of entries in the program header table.
    pub phnum: u16,
}

/// Represents an ELF file backed by a [`RegularFile`].
pub struct Elf<'a> {
    /// The parsed ELF header.
    pub header: ElfHeader,
    /// Reference to the backing file containing the ELF data.
    pub file: &'a RegularFile,
}

impl<'a> Elf<'a> {
    /// Attempts to create an [`Elf`] object from a [`RegularFile`].
    ///
    /// Returns `Some(Elf)` if the file is a valid executable for the
    /// modelled machine, otherwise `None`.
    ///
    /// # Validity checks
    /// - The ELF magic bytes (`0x7F ELF`).
    /// - Little-endian, 64-bit.
    /// - The machine id of the modelled RISC machine.
    /// - An executable object file.
    pub fn from_file(file: &'a RegularFile) -> Option<Self> {
        let mut raw = [0u8; EHDR_SIZE];
        if file.read(0, &mut raw).ok()? != EHDR_SIZE {
            return None;
        }
        if &raw[..4] == b"\x7fELF"
            && /* Bit64 */ raw[4] == 2
            && /* Little endian */ raw[5] == 1
            && /* Machine */ u16_at(&raw, 18) == EM_RISCV
            && /* Executable file */ u16_at(&raw, 16) == 2
        {
            Some(Self {
                header: ElfHeader {
                    entry: u64_at(&raw, 24),
                    phoff: u64_at(&raw, 32),
                    phentsize: u16_at(&raw, 54),
                    phnum: u16_at(&raw, 56),
                },
                file,
            })
        } else {
            None
        }
    }

    /// Parses the program header table.
    pub fn phdrs(&self) -> Result<Vec<Phdr>, KernelError> {
        let ElfHeader {
            phoff,
            phentsize,
            phnum,
            ..
        } = self.header;
        if phentsize as usize != PHDR_SIZE {
            return Err(KernelError::NoExec);
        }
        let base = usize::try_from(phoff).map_err(|_| KernelError::NoExec)?;
        let size = phnum as usize * PHDR_SIZE;
        let mut buffer = vec![0u8; size];
        if self.file.read(base, &mut buffer)? != size {
            return Err(KernelError::NoExec);
        }
        Ok((0..phnum as usize)
            .map(|i| {
                let raw = &buffer[i * PHDR_SIZE..(i + 1) * PHDR_SIZE];
                Phdr {
                    type_: u32_at(raw, 0),
                    flags: PFlags::from_bits_truncate(u32_at(raw, 4)),
                    offset: u64_at(raw, 8),
                    vaddr: u64_at(raw, 16),
                    filesz: u64_at(raw, 32),
                    memsz: u64_at(raw, 40),
                    align: u64_at(raw, 48),
                }
            })
            .collect())
    }
}

bitflags::bitflags! {
    /// Segment permission flags of an ELF program header.
    pub struct PFlags: u32 {
        /// Segment is readable.
        const READ = 1 << 2;
        /// Segment is writable.
        const WRITE = 1 << 1;
        /// Segment is executable.
        const EXECUTABLE = 1 << 0;
    }
}

/// A loadable-segment type value.
pub const PT_LOAD: u32 = 0x1;

/// An ELF64 program header entry.
///
/// Each entry describes a segment or other information needed for
/// execution.
#[derive(Clone, Copy, Debug)]
pub struct Phdr {
    /// Segment type.
    pub type_: u32,
    /// Segment permissions.
    pub flags: PFlags,
    /// Offset in the file where the segment starts.
    pub offset: u64,
    /// Virtual address where the segment should be mapped in memory.
    pub vaddr: u64,
    /// Size of the segment in the file.
    pub filesz: u64,
    /// Size of the segment in memory.
    pub memsz: u64,
    /// Alignment of the segment.
    pub align: u64,
}

impl Phdr {
    /// Whether this segment must be loaded into memory.
    pub fn is_load(&self) -> bool {
        self.type_ == PT_LOAD
    }

    /// The segment permissions translated into memory permissions.
    pub fn permission(&self) -> Permission {
        let mut permission = Permission::USER;
        if self.flags.contains(PFlags::READ) {
            permission |= Permission::READ;
        }
        if self.flags.contains(PFlags::WRITE) {
            permission |= Permission::WRITE;
        }
        if self.flags.contains(PFlags::EXECUTABLE) {
            permission |= Permission::EXECUTABLE;
        }
        permission
    }
}
