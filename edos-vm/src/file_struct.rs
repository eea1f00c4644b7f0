//! Per-process file state.
//!
//! Each process owns a small table of file descriptors. Descriptors 0 and 1
//! are the console of the modelled machine: reads from 0 return end of
//! file, writes to 1 land on the kernel console. Descriptors from 2 upward
//! name regular files with a per-descriptor position.
//!
//! The file layer also owns `total_read_bytes`, the boot-global counter
//! behind `getreadcount`: every successful `read` adds its returned byte
//! count, wrapping at 32 bits. Zero-byte returns and errors do not count.

use crate::mm_struct::MmStruct;
use crate::syscall::SyscallAbi;
use alloc::vec;
use edos::addressing::{PAGE_SIZE, Va};
use edos::fs::{self, RegularFile};
use edos::sync::SpinLock;
use edos::{KernelError, print};

/// Size of the per-process descriptor table.
pub const MAX_FD: usize = 16;

static TOTAL_READ_BYTES: SpinLock<u32> = SpinLock::new(0);

fn note_read(n: usize) {
    let mut guard = TOTAL_READ_BYTES.lock();
    *guard = guard.wrapping_add(n as u32);
    guard.unlock();
}

/// Cumulative byte count of every successful `read` across all processes
/// since boot, modulo 2^32.
pub fn getreadcount() -> u32 {
    let guard = TOTAL_READ_BYTES.lock();
    let count = *guard;
    guard.unlock();
    count
}

/// An open regular file with its position.
#[derive(Clone)]
pub struct FileDescriptor {
    /// Handle to the open file.
    pub file: RegularFile,
    /// Byte position of the next read or write.
    pub pos: usize,
}

/// The descriptor table of one process.
#[derive(Clone)]
pub struct FileStruct {
    files: [Option<FileDescriptor>; MAX_FD],
}

impl FileStruct {
    /// Creates a table with only the console descriptors.
    pub fn new() -> Self {
        Self {
            files: [const { None }; MAX_FD],
        }
    }

    fn install(&mut self, desc: FileDescriptor) -> Result<usize, KernelError> {
        // 0 and 1 stay reserved for the console.
        for (fd, slot) in self.files.iter_mut().enumerate().skip(2) {
            if slot.is_none() {
                *slot = Some(desc);
                return Ok(fd);
            }
        }
        Err(KernelError::TooManyOpenFile)
    }

    fn descriptor(&mut self, fd: usize) -> Result<&mut FileDescriptor, KernelError> {
        self.files
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Opens the file named by the user string at `arg1`, creating it when
    /// `arg2` is non-zero.
    ///
    /// # Returns
    /// The new file descriptor.
    pub fn open(&mut self, mm: &mut MmStruct, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let path_va = Va::new(abi.arg1).ok_or(KernelError::BadAddress)?;
        let path = mm.read_user_cstr(path_va, 256)?;
        let root = fs::root();
        let file = match root.open(&path) {
            Ok(file) => file,
            Err(KernelError::NoSuchEntry) if abi.arg2 != 0 => root.create(&path, false)?,
            Err(e) => return Err(e),
        };
        let file = file.into_regular_file().ok_or(KernelError::IsDirectory)?;
        self.install(FileDescriptor { file, pos: 0 })
    }

    /// Reads `arg3` bytes from descriptor `arg1` into user memory at
    /// `arg2`.
    ///
    /// # Returns
    /// The number of bytes read; 0 at end of file.
    pub fn read(&mut self, mm: &mut MmStruct, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let (fd, uva, len) = (abi.arg1, abi.arg2, abi.arg3);
        if fd == 0 {
            return Ok(0);
        }
        let uva = Va::new(uva).ok_or(KernelError::BadAddress)?;
        let desc = self.descriptor(fd)?;
        let mut done = 0;
        let mut chunk = vec![0u8; PAGE_SIZE];
        while done < len {
            let want = (len - done).min(PAGE_SIZE);
            let got = desc.file.read(desc.pos, &mut chunk[..want])?;
            if got == 0 {
                break;
            }
            mm.copy_to_user(uva + done, &chunk[..got])?;
            desc.pos += got;
            done += got;
            if got < want {
                break;
            }
        }
        if done > 0 {
            note_read(done);
        }
        Ok(done)
    }

    /// Writes `arg3` bytes of user memory at `arg2` to descriptor `arg1`.
    ///
    /// # Returns
    /// The number of bytes written.
    pub fn write(&mut self, mm: &mut MmStruct, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let (fd, uva, len) = (abi.arg1, abi.arg2, abi.arg3);
        let uva = Va::new(uva).ok_or(KernelError::BadAddress)?;
        let mut done = 0;
        let mut chunk = vec![0u8; PAGE_SIZE];
        while done < len {
            let want = (len - done).min(PAGE_SIZE);
            mm.copy_from_user(uva + done, &mut chunk[..want])?;
            if fd == 1 {
                print!("{}", alloc::string::String::from_utf8_lossy(&chunk[..want]));
            } else {
                let desc = self.descriptor(fd)?;
                if desc.file.write(desc.pos, &chunk[..want])? != want {
                    return Err(KernelError::IOError);
                }
                desc.pos += want;
            }
            done += want;
        }
        Ok(done)
    }

    /// Closes descriptor `arg1`.
    pub fn close(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let fd = abi.arg1;
        if fd < 2 || self.files.get_mut(fd).and_then(Option::take).is_none() {
            return Err(KernelError::BadFileDescriptor);
        }
        Ok(0)
    }
}

impl Default for FileStruct {
    fn default() -> Self {
        Self::new()
    }
}
