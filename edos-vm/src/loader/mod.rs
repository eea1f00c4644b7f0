//! Program loading.
//!
//! `exec` replaces a process's address space with a program image, but
//! allocates **no** frames for the program's text and data. Instead it
//! records, for every page of every LOAD segment, where that page's bytes
//! live in the executable; the fault handler reads them in on first touch.
//! The only frame the loader does allocate is the topmost stack page, so
//! the argument strings can be copied out without re-entering the fault
//! handler before the new image is committed.
//!
//! The new image is built completely on the side and only installed on
//! success; any failure on the way leaves the old address space intact.

pub mod elf;

use crate::mm_struct::MmStruct;
use crate::pager::USERSTACK;
use alloc::vec::Vec;
use edos::addressing::{PAGE_MASK, PAGE_SIZE, Va};
use edos::fs;
use edos::mm::FramePool;
use edos::mm::page_table::Permission;
use edos::syscall::Registers;
use edos::{KernelError, println};
use elf::Elf;

fn bbox(range: &mut Option<(Va, Va)>, start: Va, end: Va) {
    *range = Some(match *range {
        Some((lo, hi)) => (lo.min(start), hi.max(end)),
        None => (start, end),
    });
}

/// Builds a fresh address space for process `pid` from the executable at
/// `path`, with `argv` copied onto the new stack.
///
/// # Returns
/// The new [`MmStruct`] and the register state the new image starts from:
/// `pc` at the ELF entry, `sp` below the argument area, `a0`/`a1` holding
/// `argc`/`argv`.
pub fn exec(
    pool: FramePool,
    pid: u64,
    path: &str,
    argv: &[&str],
) -> Result<(MmStruct, Registers), KernelError> {
    let file = fs::root()
        .open(path)?
        .into_regular_file()
        .ok_or(KernelError::IsDirectory)?;
    let elf = Elf::from_file(&file).ok_or(KernelError::NoExec)?;

    let mut mm = MmStruct::new(pool.clone(), pid);
    let mut text: Option<(Va, Va)> = None;
    let mut data: Option<(Va, Va)> = None;
    let mut image_end = 0usize;

    for phdr in elf.phdrs()?.into_iter().filter(|p| p.is_load()) {
        if phdr.memsz < phdr.filesz || phdr.vaddr & PAGE_MASK as u64 != 0 {
            return Err(KernelError::NoExec);
        }
        let vaddr = usize::try_from(phdr.vaddr).map_err(|_| KernelError::NoExec)?;
        let memsz = usize::try_from(phdr.memsz).map_err(|_| KernelError::NoExec)?;
        let filesz = usize::try_from(phdr.filesz).map_err(|_| KernelError::NoExec)?;
        let offset = usize::try_from(phdr.offset).map_err(|_| KernelError::NoExec)?;
        let end = vaddr.checked_add(memsz).ok_or(KernelError::NoExec)?;
        offset.checked_add(filesz).ok_or(KernelError::NoExec)?;
        let start = Va::new(vaddr).ok_or(KernelError::NoExec)?;
        let end_va = Va::new(end).ok_or(KernelError::NoExec)?.page_up();
        if memsz == 0 {
            continue;
        }

        if phdr.permission().contains(Permission::EXECUTABLE) {
            bbox(&mut text, start, end_va);
        } else {
            bbox(&mut data, start, end_va);
        }
        image_end = image_end.max(end);

        let mut page_off = 0;
        while vaddr + page_off < end {
            let file_len = filesz.saturating_sub(page_off).min(PAGE_SIZE);
            let file_off = if file_len > 0 { offset + page_off } else { 0 };
            mm.pager
                .record_exec_page(start + page_off, file_off, file_len)?;
            page_off += PAGE_SIZE;
        }
    }

    let (text_start, text_end) = text.unwrap_or((Va::ZERO, Va::ZERO));
    let (data_start, data_end) = data.unwrap_or((Va::ZERO, Va::ZERO));
    let stack_top = Va::new(image_end)
        .ok_or(KernelError::NoExec)?
        .page_up()
        + (USERSTACK + 1) * PAGE_SIZE;
    let stack_bottom = stack_top - USERSTACK * PAGE_SIZE;

    mm.pager.layout.text = text_start..text_end;
    mm.pager.layout.data = data_start..data_end;
    mm.pager.layout.stack_top = stack_top;
    mm.pager.layout.stack_bottom = stack_bottom;
    mm.pager.layout.heap_start = stack_top;
    mm.pager.layout.sz = stack_top.into_usize();

    let entry = usize::try_from(elf.header.entry).map_err(|_| KernelError::NoExec)?;
    Va::new(entry).ok_or(KernelError::NoExec)?;
    drop(elf);
    mm.pager.set_exec_file(file);

    // One frame for the argument area at the top of the stack.
    let stack_page = stack_top - PAGE_SIZE;
    let mut frame = pool.alloc().ok_or(KernelError::NoMemory)?;
    let base = stack_page.into_usize();
    let mut sp = stack_top.into_usize();
    let mut arg_ptrs = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        sp = sp
            .checked_sub(arg.len() + 1)
            .ok_or(KernelError::InvalidArgument)?;
        if sp < base {
            return Err(KernelError::InvalidArgument);
        }
        let contents = frame.inner_mut();
        contents[sp - base..sp - base + arg.len()].copy_from_slice(arg.as_bytes());
        contents[sp - base + arg.len()] = 0;
        arg_ptrs.push(sp);
    }
    arg_ptrs.reverse();
    sp &= !7;
    sp = sp
        .checked_sub((argv.len() + 1) * core::mem::size_of::<usize>())
        .ok_or(KernelError::InvalidArgument)?;
    if sp < base {
        return Err(KernelError::InvalidArgument);
    }
    let argv_va = sp;
    {
        let contents = frame.inner_mut();
        for (i, ptr) in arg_ptrs.iter().enumerate() {
            let at = sp - base + i * core::mem::size_of::<usize>();
            contents[at..at + core::mem::size_of::<usize>()]
                .copy_from_slice(&ptr.to_le_bytes());
        }
        // The array is NUL terminated; the frame came zeroed.
    }
    mm.page_table
        .map(
            stack_page,
            frame,
            Permission::USER | Permission::READ | Permission::WRITE,
        )
        .map_err(|_| KernelError::NoMemory)?;
    mm.pager.record_premapped_page(stack_page)?;

    println!(
        "[pid {}] INIT-LAZYMAP text=[{:#x},{:#x}) data=[{:#x},{:#x}) heap_start={:#x} stack_top={:#x}",
        pid,
        text_start.into_usize(),
        text_end.into_usize(),
        data_start.into_usize(),
        data_end.into_usize(),
        mm.pager.layout.heap_start.into_usize(),
        mm.pager.layout.stack_top.into_usize(),
    );

    let mut regs = Registers::default();
    regs.a[0] = argv.len();
    regs.a[1] = argv_va;
    regs.sp = sp;
    regs.pc = entry;
    Ok((mm, regs))
}
