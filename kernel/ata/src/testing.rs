//! Simulated controller and platform services for unit tests.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use std::vec::Vec;

use spin::Mutex;
use x86_64::PhysAddr;

use crate::config::WaitPolicy;
use crate::consts::{IDENTIFY_WORDS, SECTOR_SIZE};
use crate::device::AtaCommand;
use crate::error::AtaError;
use crate::hal::{
    DmaMemory, InterruptHandler, InterruptRegistrar, InterruptSource, TranslationPair,
};
use crate::io::PortIo;
use crate::pci::{ChannelAddresses, PciIdeController, PciLocation};
use crate::prdt::{PhysAddr32, PrdEntry};
use crate::registers::{DeviceRegisters, DrivePosition, Status};

pub const PRIMARY: u16 = 0x1F0;
pub const CONTROL: u16 = 0x3F6;
pub const BUS_MASTER: u16 = 0xC000;

pub fn legacy_controller() -> PciIdeController {
    PciIdeController {
        location: PciLocation { bus: 0, device: 1, function: 1 },
        bars: [0, 0, 0, 0, u32::from(BUS_MASTER) | 1, 0],
    }
}

pub fn registers_for(mock: &MockController) -> DeviceRegisters<MockController> {
    DeviceRegisters::new(mock.clone(), mock.addresses(), WaitPolicy::Spins(10_000))
}

/// Distinct non-zero id per test thread.
pub fn thread_owner_id() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    std::thread_local! {
        static ID: u32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

fn put_ascii(words: &mut [u16], text: &str) {
    let mut bytes = [b' '; 2 * 20];
    bytes[..text.len()].copy_from_slice(text.as_bytes());
    for (index, word) in words.iter_mut().enumerate() {
        *word = u16::from_be_bytes([bytes[2 * index], bytes[2 * index + 1]]);
    }
}

/// An IDENTIFY block like QEMU's emulated disk returns.
pub fn identify_block(lba48: bool, sectors: u64) -> [u8; SECTOR_SIZE] {
    let mut words = [0u16; IDENTIFY_WORDS];
    put_ascii(&mut words[10..20], "QM00001");
    put_ascii(&mut words[23..27], "2.5+");
    put_ascii(&mut words[27..47], "QEMU HARDDISK");
    words[49] = (1 << 9) | (1 << 8);
    let lba28 = sectors.min(0x0FFF_FFFF) as u32;
    words[60] = lba28 as u16;
    words[61] = (lba28 >> 16) as u16;
    if lba48 {
        words[83] = 1 << 10;
    }
    for (index, word) in words[100..104].iter_mut().enumerate() {
        *word = (sectors >> (16 * index)) as u16;
    }

    let mut block = [0u8; SECTOR_SIZE];
    for (chunk, word) in block.chunks_exact_mut(2).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    block
}

struct ControllerState {
    addresses: ChannelAddresses,
    drive: DrivePosition,
    present: bool,
    identify: [u8; SECTOR_SIZE],
    abort_identify: bool,
    selected: DrivePosition,
    device: u8,
    device_control: u8,
    /// Sector count, LBA low, mid, high as `[current, previous]`
    task_file: [[u8; 2]; 4],
    status: u8,
    error: u8,
    bus_command: u8,
    bus_status: u8,
    prdt: u32,
    data_in: VecDeque<u16>,
    pending_write: Option<(u64, usize)>,
    data_out: Vec<u16>,
    /// `(lba, count, device to memory)` of the DMA command awaiting START
    dma: Option<(u64, u16, bool)>,
    memory: Option<Arc<MockDma>>,
    dma_fault: Option<(u8, u8)>,
    dma_started: bool,
    disk: BTreeMap<u64, [u8; SECTOR_SIZE]>,
    last_command: Option<(u8, u64, u16)>,
    writes: Vec<(u16, u32)>,
}

impl ControllerState {
    fn responds(&self) -> bool {
        self.present && self.selected == self.drive
    }

    fn hob(&self) -> bool {
        self.device_control & 0x80 != 0
    }

    fn lba48(&self) -> (u64, u16) {
        let [count, low, mid, high] = self.task_file;
        let lba = u64::from_le_bytes([low[0], mid[0], high[0], low[1], mid[1], high[1], 0, 0]);
        (lba, u16::from_le_bytes([count[0], count[1]]))
    }

    fn sector(&self, lba: u64) -> [u8; SECTOR_SIZE] {
        self.disk.get(&lba).copied().unwrap_or([0; SECTOR_SIZE])
    }

    fn command(&mut self, opcode: u8) {
        if !self.responds() {
            return;
        }
        let (lba, count) = self.lba48();
        self.last_command = Some((opcode, lba, count));
        let ready = Status::DRDY.bits();
        match AtaCommand::try_from(opcode) {
            Ok(AtaCommand::Identify) if self.abort_identify => {
                self.status = ready | Status::ERR.bits();
                self.error = 0x04;
            }
            Ok(AtaCommand::Identify) => {
                let block = self.identify;
                self.fill_data(&block);
            }
            Ok(AtaCommand::ReadSectorsExt) => {
                for sector in lba..lba + u64::from(count) {
                    let data = self.sector(sector);
                    self.fill_data(&data);
                }
            }
            Ok(AtaCommand::WriteSectorsExt) => {
                self.pending_write = Some((lba, usize::from(count) * IDENTIFY_WORDS));
                self.data_out.clear();
                self.status = ready | Status::DRQ.bits();
            }
            Ok(AtaCommand::ReadDmaExt) => {
                self.dma = Some((lba, count, true));
                self.status = ready;
            }
            Ok(AtaCommand::WriteDmaExt) => {
                self.dma = Some((lba, count, false));
                self.status = ready;
            }
            Ok(AtaCommand::FlushCacheExt) => self.status = ready,
            Err(_) => panic!("unexpected command {opcode:#04x}"),
        }
    }

    fn fill_data(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks_exact(2) {
            self.data_in.push_back(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        self.status = (Status::DRDY | Status::DRQ).bits();
    }

    fn write_data(&mut self, word: u16) {
        let Some((lba, words)) = self.pending_write else {
            panic!("data written without a write command");
        };
        self.data_out.push(word);
        if self.data_out.len() == words {
            let bytes: Vec<u8> = self.data_out.iter().flat_map(|w| w.to_le_bytes()).collect();
            self.store_sectors(lba, &bytes);
            self.pending_write = None;
            self.status = Status::DRDY.bits();
        }
    }

    fn store_sectors(&mut self, lba: u64, bytes: &[u8]) {
        for (index, chunk) in bytes.chunks_exact(SECTOR_SIZE).enumerate() {
            let mut sector = [0; SECTOR_SIZE];
            sector.copy_from_slice(chunk);
            self.disk.insert(lba + index as u64, sector);
        }
    }

    fn start_bus_master(&mut self, command: u8) {
        self.bus_command = command;
        if command & 0x01 == 0 {
            return;
        }
        if let Some((lba, count, to_memory)) = self.dma.take() {
            assert_eq!(
                command & 0x08 != 0,
                to_memory,
                "bus master direction does not match the command"
            );
            match self.dma_fault.take() {
                Some((status, error)) => {
                    self.status = status;
                    self.error = error;
                }
                None => {
                    self.move_dma_data(lba, count, to_memory);
                    self.status = Status::DRDY.bits();
                }
            }
            self.dma_started = true;
            self.bus_status |= 0x04;
        }
    }

    /// Walks the programmed PRDT like the controller would.
    fn move_dma_data(&mut self, lba: u64, count: u16, to_memory: bool) {
        let Some(memory) = self.memory.clone() else {
            return;
        };
        let total = usize::from(count) * SECTOR_SIZE;
        let mut bytes: Vec<u8> = if to_memory {
            (lba..lba + u64::from(count)).flat_map(|sector| self.sector(sector)).collect()
        } else {
            Vec::with_capacity(total)
        };
        let mut offset = 0;
        for entry in memory.read_table(PhysAddr32::try_from(u64::from(self.prdt)).unwrap()) {
            let length = entry.length() as usize;
            let host = memory.host_pointer(entry.address(), length);
            if to_memory {
                let source = &bytes[offset..offset + length];
                unsafe { core::ptr::copy_nonoverlapping(source.as_ptr(), host, length) };
            } else {
                bytes.extend_from_slice(unsafe { core::slice::from_raw_parts(host, length) });
            }
            offset += length;
        }
        assert_eq!(offset, total, "descriptor table does not cover the transfer");
        if !to_memory {
            self.store_sectors(lba, &bytes);
        }
    }
}

/// One drive on a simulated channel. Clones share the same device.
#[derive(Clone)]
pub struct MockController {
    state: Arc<Mutex<ControllerState>>,
}

impl MockController {
    pub fn new(drive: DrivePosition) -> Self {
        let addresses = ChannelAddresses {
            base: PRIMARY,
            control: CONTROL,
            bus_master: BUS_MASTER,
            legacy: true,
        };
        Self::at(addresses, drive)
    }

    pub fn at(addresses: ChannelAddresses, drive: DrivePosition) -> Self {
        let state = ControllerState {
            addresses,
            drive,
            present: true,
            identify: identify_block(true, 0x1_0000),
            abort_identify: false,
            selected: DrivePosition::Master,
            device: 0,
            device_control: 0,
            task_file: [[0; 2]; 4],
            status: Status::DRDY.bits(),
            error: 0,
            bus_command: 0,
            bus_status: 0x20,
            prdt: 0,
            data_in: VecDeque::new(),
            pending_write: None,
            data_out: Vec::new(),
            dma: None,
            memory: None,
            dma_fault: None,
            dma_started: false,
            disk: BTreeMap::new(),
            last_command: None,
            writes: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn addresses(&self) -> ChannelAddresses {
        self.state.lock().addresses
    }

    /// Lets bus master transfers reach the memory `dma` hands out.
    pub fn attach_dma(&self, dma: Arc<MockDma>) {
        self.state.lock().memory = Some(dma);
    }

    pub fn set_present(&self, present: bool) {
        self.state.lock().present = present;
    }

    pub fn set_identify(&self, block: [u8; SECTOR_SIZE]) {
        self.state.lock().identify = block;
    }

    pub fn abort_identify(&self) {
        self.state.lock().abort_identify = true;
    }

    pub fn set_status(&self, status: u8) {
        self.state.lock().status = status;
    }

    pub fn set_error(&self, error: u8) {
        self.state.lock().error = error;
    }

    pub fn set_bus_status(&self, status: u8) {
        self.state.lock().bus_status = status;
    }

    pub fn bus_status(&self) -> u8 {
        self.state.lock().bus_status
    }

    /// The next DMA completes with these status and error values.
    pub fn fail_next_dma(&self, status: u8, error: u8) {
        self.state.lock().dma_fault = Some((status, error));
    }

    pub fn writes(&self) -> Vec<(u16, u32)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn store(&self, lba: u64, data: &[u8]) {
        self.state.lock().store_sectors(lba, data);
    }

    pub fn sectors(&self, lba: u64, count: u64) -> Vec<u8> {
        let state = self.state.lock();
        (lba..lba + count).flat_map(|sector| state.sector(sector)).collect()
    }

    /// `(opcode, lba, count)` of the last command the drive accepted.
    pub fn last_command(&self) -> Option<(u8, u64, u16)> {
        self.state.lock().last_command
    }

    pub fn prdt_address(&self) -> PhysAddr32 {
        PhysAddr32::try_from(u64::from(self.state.lock().prdt)).unwrap()
    }

    pub fn reset_dma_start(&self) {
        self.state.lock().dma_started = false;
    }

    pub fn wait_for_dma_start(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.state.lock().dma_started {
            assert!(Instant::now() < deadline, "DMA never started");
            std::thread::yield_now();
        }
    }
}

impl PortIo for MockController {
    fn read_u8(&self, port: u16) -> u8 {
        let state = self.state.lock();
        let a = state.addresses;
        match port {
            p if p == a.base + 1 => state.error,
            p if (a.base + 2..a.base + 6).contains(&p) => {
                state.task_file[(p - a.base - 2) as usize][usize::from(state.hob())]
            }
            p if p == a.base + 6 => state.device,
            p if p == a.base + 7 || p == a.control => {
                if state.responds() { state.status } else { 0 }
            }
            p if p == a.control + 1 => 0xFF,
            p if p == a.bus_master => state.bus_command,
            p if p == a.bus_master + 2 => state.bus_status,
            _ => panic!("read from unmapped port {port:#x}"),
        }
    }

    fn read_u16(&self, port: u16) -> u16 {
        let mut state = self.state.lock();
        assert_eq!(port, state.addresses.base, "16-bit read off the data port");
        let word = state.data_in.pop_front().expect("data port read with empty FIFO");
        if state.data_in.is_empty() {
            state.status = Status::DRDY.bits();
        }
        word
    }

    fn write_u8(&self, port: u16, value: u8) {
        let mut state = self.state.lock();
        state.writes.push((port, u32::from(value)));
        let a = state.addresses;
        match port {
            p if p == a.base + 1 => {}
            p if (a.base + 2..a.base + 6).contains(&p) => {
                let register = &mut state.task_file[(p - a.base - 2) as usize];
                *register = [value, register[0]];
            }
            p if p == a.base + 6 => {
                state.device = value;
                state.selected = if value & 0x10 != 0 {
                    DrivePosition::Slave
                } else {
                    DrivePosition::Master
                };
            }
            p if p == a.base + 7 => state.command(value),
            p if p == a.control => state.device_control = value,
            p if p == a.bus_master => state.start_bus_master(value),
            p if p == a.bus_master + 2 => {
                let cleared = state.bus_status & !(value & 0x06);
                state.bus_status = (cleared & !0x60) | (value & 0x60);
            }
            _ => panic!("write to unmapped port {port:#x}"),
        }
    }

    fn write_u16(&self, port: u16, value: u16) {
        let mut state = self.state.lock();
        assert_eq!(port, state.addresses.base, "16-bit write off the data port");
        state.writes.push((port, u32::from(value)));
        state.write_data(value);
    }

    fn write_u32(&self, port: u16, value: u32) {
        let mut state = self.state.lock();
        assert_eq!(port, state.addresses.bus_master + 4, "32-bit write off the PRDT port");
        state.writes.push((port, value));
        state.prdt = value;
    }
}

struct Allocation {
    address: usize,
    layout: Layout,
    physical: u64,
}

/// Physical range a translated buffer was reported at.
struct Mapping {
    physical: u64,
    address: usize,
    length: usize,
}

struct DmaState {
    allocations: Vec<Allocation>,
    mappings: Vec<Mapping>,
    next_physical: u64,
    fail_allocations: bool,
    translation: Option<Vec<TranslationPair>>,
}

/// Heap-backed DMA memory with made-up physical addresses below 4 GiB.
pub struct MockDma {
    state: Mutex<DmaState>,
}

impl MockDma {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DmaState {
                allocations: Vec::new(),
                mappings: Vec::new(),
                next_physical: 0x0010_0000,
                fail_allocations: false,
                translation: None,
            }),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn fail_allocations(&self) {
        self.state.lock().fail_allocations = true;
    }

    pub fn place_tables_high(&self) {
        self.state.lock().next_physical = 0x1_0000_0000;
    }

    pub fn set_translation(&self, pairs: Vec<TranslationPair>) {
        self.state.lock().translation = Some(pairs);
    }

    /// Host pointer behind `length` bytes at `physical` of a translated buffer.
    pub fn host_pointer(&self, physical: u32, length: usize) -> *mut u8 {
        let physical = u64::from(physical);
        let state = self.state.lock();
        let mapping = state
            .mappings
            .iter()
            .rev()
            .find(|mapping| {
                physical >= mapping.physical
                    && physical + length as u64 <= mapping.physical + mapping.length as u64
            })
            .expect("DMA to memory that was never translated");
        (mapping.address + (physical - mapping.physical) as usize) as *mut u8
    }

    /// Entries of the table at `physical`, up to and including the last one.
    pub fn read_table(&self, physical: PhysAddr32) -> Vec<PrdEntry> {
        let state = self.state.lock();
        let allocation = state
            .allocations
            .iter()
            .find(|allocation| allocation.physical == u64::from(physical.as_u32()))
            .expect("no table at that address");
        let capacity = allocation.layout.size() / size_of::<PrdEntry>();
        let base = allocation.address as *const PrdEntry;
        let mut entries = Vec::new();
        for index in 0..capacity {
            let entry = unsafe { base.add(index).read() };
            entries.push(entry);
            if entry.is_last() {
                break;
            }
        }
        entries
    }
}

impl DmaMemory for MockDma {
    fn translate(
        &self,
        buffer: NonNull<u8>,
        length: usize,
    ) -> Result<Vec<TranslationPair>, AtaError> {
        let mut state = self.state.lock();
        let pairs = match &state.translation {
            Some(pairs) => pairs.clone(),
            None => {
                // 64 KiB aligned chunks starting at 8 MiB.
                let mut pairs = Vec::new();
                let mut offset = 0;
                while offset < length {
                    let chunk = (length - offset).min(0x1_0000);
                    pairs.push(TranslationPair {
                        address: PhysAddr::new(0x80_0000 + offset as u64),
                        length: chunk as u32,
                    });
                    offset += chunk;
                }
                pairs
            }
        };
        // Pairs back consecutive parts of the buffer.
        let mut offset = 0;
        for pair in &pairs {
            state.mappings.push(Mapping {
                physical: pair.address.as_u64(),
                address: buffer.as_ptr() as usize + offset,
                length: pair.length as usize,
            });
            offset += pair.length as usize;
        }
        Ok(pairs)
    }

    fn allocate_contiguous(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.fail_allocations {
            return None;
        }
        let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
        let align = layout.align() as u64;
        let physical = state.next_physical.div_ceil(align) * align;
        state.next_physical = physical + layout.size() as u64;
        state.allocations.push(Allocation {
            address: ptr.as_ptr() as usize,
            layout,
            physical,
        });
        Some(ptr)
    }

    unsafe fn free_contiguous(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut state = self.state.lock();
        let index = state
            .allocations
            .iter()
            .position(|allocation| allocation.address == ptr.as_ptr() as usize)
            .expect("freeing memory that was never allocated");
        let allocation = state.allocations.remove(index);
        assert_eq!(allocation.layout, layout);
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn physical_address(&self, ptr: NonNull<u8>) -> PhysAddr {
        let state = self.state.lock();
        let allocation = state
            .allocations
            .iter()
            .find(|allocation| allocation.address == ptr.as_ptr() as usize)
            .expect("physical address of unknown memory");
        PhysAddr::new(allocation.physical)
    }
}

#[derive(Default)]
pub struct MockInterrupts {
    registered: Mutex<Vec<(InterruptSource, Arc<dyn InterruptHandler>)>>,
    fail: bool,
}

impl MockInterrupts {
    pub fn failing() -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sources(&self) -> Vec<InterruptSource> {
        self.registered.lock().iter().map(|(source, _)| *source).collect()
    }

    pub fn handler(&self, index: usize) -> Arc<dyn InterruptHandler> {
        Arc::clone(&self.registered.lock()[index].1)
    }
}

impl InterruptRegistrar for MockInterrupts {
    fn register_interrupt(
        &self,
        source: InterruptSource,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), AtaError> {
        if self.fail {
            return Err(AtaError::InterruptRegistrationFailed);
        }
        self.registered.lock().push((source, handler));
        Ok(())
    }
}
