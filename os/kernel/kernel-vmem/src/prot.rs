bitflags::bitflags! {
    /// Access permissions and cache attributes requested for a mapping.
    ///
    /// These are the architecture-neutral `pgprot` bits; [`EntryBits`](crate::EntryBits)
    /// encodes them into the hardware entry layout.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PageProtection: u8 {
        /// Readable. Every present leaf is readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXEC = 1 << 2;
        /// Accessible from user mode.
        const USER = 1 << 3;
        /// Write-combining memory type.
        const WRITE_COMBINE = 1 << 4;
        /// Uncached (device) memory type.
        const UNCACHED = 1 << 5;
    }
}

impl PageProtection {
    /// Typical user read/write data mapping.
    pub const USER_RW: Self = Self::READ.union(Self::WRITE).union(Self::USER);

    /// Typical user read-only data mapping.
    pub const USER_RO: Self = Self::READ.union(Self::USER);
}
