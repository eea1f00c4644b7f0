//! Physical and virtual memory addressing schemes.
//!
//! This module provides the abstractions for virtual and physical addresses
//! of the modelled machine. The module defines two primary types: [`Va`] for
//! virtual addresses as seen by a user process, and [`Pa`] for physical
//! addresses within the frame pool. Both are thin wrappers around `usize`
//! equipped with validation, page-alignment helpers, and arithmetic, so that
//! the kernel never confuses the two address spaces.

/// The size of a single page in memory, in bytes.
pub const PAGE_SIZE: usize = 0x1000;

/// The shift amount to get the page index from a given address.
pub const PAGE_SHIFT: usize = 12;

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = 0xfff;

/// Upper bound (exclusive) of the user virtual address space.
pub const VA_LIMIT: usize = 1 << 38;

/// Represents a virtual address of a user process.
///
/// A [`Va`] is only ever interpreted through a process's page table. The
/// constructor rejects addresses outside the user address space, so a valid
/// [`Va`] can always be fed to the translation path.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// The virtual address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new virtual address if the address is within the user
    /// address space.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < VA_LIMIT { Some(Self(addr)) } else { None }
    }

    /// Cast the virtual address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the virtual address to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align up the virtual address to the page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the offset within the page from the virtual address.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va({:#x})", self.0)
    }
}

impl core::ops::Add<usize> for Va {
    type Output = Self;
    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

impl core::ops::Sub<usize> for Va {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self {
        Self(self.0 - rhs)
    }
}

impl core::ops::Sub<Va> for Va {
    type Output = usize;
    fn sub(self, rhs: Va) -> usize {
        self.0 - rhs.0
    }
}

/// Represents a physical address.
///
/// The [`Pa`] struct wraps an offset into the physical frame pool of the
/// modelled machine. Physical addresses are unique and always refer to the
/// same frame, unlike virtual addresses which can be remapped over time.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Pa(usize);

impl Pa {
    /// The physical address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < 0xffff_0000_0000_0000 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the physical address to the page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }
}

impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa({:#x})", self.0)
    }
}

impl core::ops::Add<usize> for Pa {
    type Output = Self;
    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}
