//! Intel HEX loader.
//!
//! Supports data, end-of-file, extended segment address and extended linear
//! address records. Start address records are accepted and ignored since the
//! controller boots from its own reset vector.

use ihex::{Reader, ReaderOptions, Record};
use log::{debug, trace};

use crate::error::{Error, Result};

/// Parse Intel HEX text into `(absolute address, bytes)` runs, in file order.
pub fn parse(text: &str) -> Result<Vec<(u32, Vec<u8>)>> {
    let options = ReaderOptions {
        stop_after_first_error: true,
        stop_after_eof: true,
    };

    let mut base: u32 = 0;
    let mut runs = Vec::new();
    let mut saw_eof = false;

    for (index, record) in Reader::new_with_options(text, options).enumerate() {
        let record = record
            .map_err(|e| Error::InvalidImage(format!("record {}: {e}", index + 1)))?;
        match record {
            Record::Data { offset, value } => {
                let address = base
                    .checked_add(u32::from(offset))
                    .ok_or_else(|| {
                        Error::InvalidImage(format!("record {} overflows the address space", index + 1))
                    })?;
                trace!("{} bytes at {address:#07x}", value.len());
                runs.push((address, value));
            },
            Record::ExtendedSegmentAddress(segment) => {
                base = u32::from(segment) << 4;
                trace!("Segment base {base:#07x}");
            },
            Record::ExtendedLinearAddress(upper) => {
                base = u32::from(upper) << 16;
                trace!("Linear base {base:#07x}");
            },
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {},
            Record::EndOfFile => {
                saw_eof = true;
                break;
            },
        }
    }

    if !saw_eof {
        return Err(Error::InvalidImage("missing end-of-file record".into()));
    }

    debug!(
        "Parsed {} data records, {} bytes",
        runs.len(),
        runs.iter()
            .map(|(_, bytes)| bytes.len())
            .sum::<usize>()
    );
    Ok(runs)
}
