//! Raw port access.
//!
//! Everything above this module talks to the controller through [`PortIo`], so the
//! register protocol can run against a simulated controller in tests.

use x86_64::instructions::port::Port;

pub trait PortIo: Send + Sync {
    fn read_u8(&self, port: u16) -> u8;
    fn read_u16(&self, port: u16) -> u16;
    fn write_u8(&self, port: u16, value: u8);
    fn write_u16(&self, port: u16, value: u16);
    fn write_u32(&self, port: u16, value: u32);
}

/// `in`/`out` instructions on the current CPU.
#[derive(Debug)]
pub struct X86PortIo(());

impl X86PortIo {
    /// # Safety
    /// The caller must own every port the driver is handed. Port writes to the wrong
    /// device can corrupt arbitrary hardware state.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

impl PortIo for X86PortIo {
    #[inline(always)]
    fn read_u8(&self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    #[inline(always)]
    fn read_u16(&self, port: u16) -> u16 {
        unsafe { Port::<u16>::new(port).read() }
    }

    #[inline(always)]
    fn write_u8(&self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }

    #[inline(always)]
    fn write_u16(&self, port: u16, value: u16) {
        unsafe { Port::<u16>::new(port).write(value) }
    }

    #[inline(always)]
    fn write_u32(&self, port: u16, value: u32) {
        unsafe { Port::<u32>::new(port).write(value) }
    }
}
