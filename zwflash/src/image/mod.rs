//! Firmware images.
//!
//! The update transfers the whole 128 KiB flash of the controller, 32 bytes
//! per WRITE. Bytes the image does not define are sent as `0xFF`, the value
//! of erased flash:
//!
//! ```text
//! 0x00000                                                   0x20000
//! +---------+----------+---------+-------------+-------------+
//! |  hex    |   0xFF   |  hex    |    0xFF     |    ...      |
//! +---------+----------+---------+-------------+-------------+
//! |<-32B->|<-32B->|<-32B->| ...                  4096 blocks
//! ```
//!
//! [`ImageSource`] is the only thing the updater needs from an image, so
//! other loaders can be plugged in.

pub mod hex;

use std::path::Path;

use crate::error::{Error, Result};

/// Size of the flash image in bytes.
pub const CAPACITY: usize = 128 * 1024;

/// Bytes carried by one NVM WRITE.
pub const BLOCK_SIZE: usize = 32;

/// Value of erased flash.
pub const BLANK: u8 = 0xFF;

/// Read-only, random-access view of a firmware image.
pub trait ImageSource {
    /// Image length in bytes.
    fn len(&self) -> usize;

    /// Byte at `offset`, or `None` past the end.
    fn byte_at(&self, offset: usize) -> Option<u8>;

    /// Whether the image has no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the block starting at `offset` into `buf`, padding past the end
    /// with [`BLANK`]. Returns the number of image bytes copied.
    fn read_block(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        for (i, slot) in buf
            .iter_mut()
            .enumerate()
        {
            match self.byte_at(offset + i) {
                Some(b) => {
                    *slot = b;
                    copied += 1;
                },
                None => *slot = BLANK,
            }
        }
        copied
    }
}

/// Flat 128 KiB flash image on an erased (`0xFF`) background.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// An image of erased flash.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            data: vec![BLANK; CAPACITY],
        }
    }

    /// Load an Intel HEX file.
    pub fn from_hex_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidImage(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_hex_str(&text)
    }

    /// Parse Intel HEX text.
    pub fn from_hex_str(text: &str) -> Result<Self> {
        let mut image = Self::blank();
        for (address, bytes) in hex::parse(text)? {
            image.overlay(address, &bytes)?;
        }
        Ok(image)
    }

    /// Copy `bytes` to `address`, replacing what is there.
    pub fn overlay(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        let start = usize::try_from(address).unwrap_or(usize::MAX);
        let end = start.saturating_add(bytes.len());
        if end > CAPACITY {
            return Err(Error::InvalidImage(format!(
                "{} bytes at {address:#07x} fall outside the {CAPACITY}-byte flash",
                bytes.len()
            )));
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// The raw image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterate over `(offset, block)` pairs in address order.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.data
            .chunks(BLOCK_SIZE)
            .enumerate()
            .map(|(i, block)| (i * BLOCK_SIZE, block))
    }

    /// Number of bytes that differ from erased flash.
    pub fn programmed_bytes(&self) -> usize {
        self.data
            .iter()
            .filter(|b| **b != BLANK)
            .count()
    }
}

impl Default for FirmwareImage {
    fn default() -> Self {
        Self::blank()
    }
}

impl std::fmt::Debug for FirmwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareImage")
            .field("len", &self.data.len())
            .field("programmed_bytes", &self.programmed_bytes())
            .finish()
    }
}

impl ImageSource for FirmwareImage {
    fn len(&self) -> usize {
        self.data
            .len()
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.data
            .get(offset)
            .copied()
    }
}

impl ImageSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.get(offset)
            .copied()
    }
}

impl ImageSource for Vec<u8> {
    fn len(&self) -> usize {
        self.as_slice()
            .len()
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.get(offset)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_image() {
        let image = FirmwareImage::blank();
        assert_eq!(image.len(), CAPACITY);
        assert!(
            image
                .as_bytes()
                .iter()
                .all(|b| *b == BLANK)
        );
        assert_eq!(image.programmed_bytes(), 0);
    }

    #[test]
    fn test_overlay_bounds() {
        let mut image = FirmwareImage::blank();
        image
            .overlay(CAPACITY as u32 - 2, &[1, 2])
            .unwrap();
        assert_eq!(image.byte_at(CAPACITY - 1), Some(2));

        assert!(matches!(
            image.overlay(CAPACITY as u32 - 1, &[1, 2]),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_blocks_cover_image_in_order() {
        let mut image = FirmwareImage::blank();
        image
            .overlay(100, &[0xAB])
            .unwrap();

        let blocks: Vec<_> = image
            .blocks()
            .collect();
        assert_eq!(blocks.len(), CAPACITY / BLOCK_SIZE);
        assert_eq!(blocks[3].0, 96);
        assert_eq!(blocks[3].1[4], 0xAB);
        assert!(
            blocks
                .iter()
                .enumerate()
                .all(|(i, (offset, block))| *offset == i * BLOCK_SIZE && block.len() == BLOCK_SIZE)
        );
    }

    #[test]
    fn test_read_block_pads_short_source() {
        let source = vec![1u8, 2, 3];
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(source.read_block(0, &mut buf), 3);
        assert_eq!(&buf[..4], &[1, 2, 3, BLANK]);
        assert_eq!(source.read_block(64, &mut buf), 0);
        assert!(
            buf.iter()
                .all(|b| *b == BLANK)
        );
    }
}
