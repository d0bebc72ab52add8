//! IDENTIFY DEVICE response parsing.

use alloc::string::String;

use crate::consts::{IDENTIFY_WORDS, SECTOR_SIZE};

const WORD_SERIAL: usize = 10;
const WORD_FIRMWARE: usize = 23;
const WORD_MODEL: usize = 27;
const WORD_CAPABILITIES: usize = 49;
const WORD_LBA28_SECTORS: usize = 60;
const WORD_COMMAND_SET_2: usize = 83;
const WORD_LBA48_SECTORS: usize = 100;

const CAPABILITY_DMA: u16 = 1 << 8;
const CAPABILITY_LBA: u16 = 1 << 9;
const COMMAND_SET_LBA48: u16 = 1 << 10;

pub struct IdentifyData {
    words: [u16; IDENTIFY_WORDS],
}

impl IdentifyData {
    pub fn from_bytes(bytes: &[u8; SECTOR_SIZE]) -> Self {
        let mut words = [0u16; IDENTIFY_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Self { words }
    }

    pub fn word(&self, index: usize) -> u16 {
        self.words[index]
    }

    pub fn supports_lba48(&self) -> bool {
        self.words[WORD_COMMAND_SET_2] & COMMAND_SET_LBA48 != 0
    }

    pub fn supports_lba(&self) -> bool {
        self.words[WORD_CAPABILITIES] & CAPABILITY_LBA != 0
    }

    pub fn supports_dma(&self) -> bool {
        self.words[WORD_CAPABILITIES] & CAPABILITY_DMA != 0
    }

    pub fn lba28_sectors(&self) -> u32 {
        u32::from(self.words[WORD_LBA28_SECTORS])
            | (u32::from(self.words[WORD_LBA28_SECTORS + 1]) << 16)
    }

    pub fn lba48_sectors(&self) -> u64 {
        self.words[WORD_LBA48_SECTORS..WORD_LBA48_SECTORS + 4]
            .iter()
            .rev()
            .fold(0, |sectors, &word| (sectors << 16) | u64::from(word))
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            model: self.ascii(WORD_MODEL, 20),
            serial: self.ascii(WORD_SERIAL, 10),
            firmware: self.ascii(WORD_FIRMWARE, 4),
        }
    }

    /// Strings are stored big-endian within each word and padded with blanks.
    fn ascii(&self, first: usize, count: usize) -> String {
        let mut text = String::with_capacity(count * 2);
        for word in &self.words[first..first + count] {
            for byte in word.to_be_bytes() {
                text.push(if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { ' ' });
            }
        }
        String::from(text.trim())
    }

    pub fn log_fields(&self) {
        let identity = self.identity();
        log::trace!("ata::identify: model \"{}\"", identity.model);
        log::trace!("ata::identify: serial \"{}\"", identity.serial);
        log::trace!("ata::identify: firmware \"{}\"", identity.firmware);
        log::trace!(
            "ata::identify: lba {} dma {} lba48 {}",
            self.supports_lba(),
            self.supports_dma(),
            self.supports_lba48()
        );
        log::trace!(
            "ata::identify: {} sectors (28-bit), {} sectors (48-bit)",
            self.lba28_sectors(),
            self.lba48_sectors()
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub model: String,
    pub serial: String,
    pub firmware: String,
}
