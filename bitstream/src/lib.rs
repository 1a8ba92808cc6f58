//! Low-level bit packing primitives for the tickstate protocol.
//!
//! [`BitWriter`] grows as it writes; [`Checkpoint`]s undo a partially
//! written item and reserved [`Slot`]s hold list counts that are only known
//! once packing stops. [`BitReader`] checks every read against the end of
//! its buffer and reports failures as [`BitError`]. Nothing here knows about
//! ticks or entities.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitWriter, BitReader};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bool(true);
//! writer.write_bits(42, 7).unwrap();
//!
//! let bytes = writer.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bool().unwrap(), true);
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! ```

mod error;
mod reader;
mod writer;

pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use writer::{BitWriter, Checkpoint, Slot};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_written_is_empty() {
        let bytes = BitWriter::new().finish();
        assert!(bytes.is_empty());
        assert!(BitReader::new(&bytes).is_empty());
    }

    #[test]
    fn full_width_values_survive() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::MAX, 64).unwrap();
        writer.write_bits(0b101, 3).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
    }

    #[test]
    fn f32_roundtrip_unaligned() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_f32(-12.625).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_f32().unwrap(), -12.625);
    }

    #[test]
    fn patched_count_reads_back() {
        let mut writer = BitWriter::new();
        let slot = writer.reserve(8).unwrap();
        let mut count = 0;
        for v in [3u32, 700, 90_000] {
            let cp = writer.checkpoint();
            writer.write_varu32(v).unwrap();
            if writer.bytes_written() > 4 {
                writer.rollback(cp);
                break;
            }
            count += 1;
        }
        writer.fill_slot(slot, count).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(8).unwrap(), 2);
        assert_eq!(reader.read_varu32().unwrap(), 3);
        assert_eq!(reader.read_varu32().unwrap(), 700);
        assert!(reader.finish().is_ok());
    }
}
