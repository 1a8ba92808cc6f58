//! Budgeted list packing.
//!
//! Every list-valued packet section is `[count u8][item]*`. The encoder
//! reserves the count, writes items one by one, and stops at the first item
//! that overflows either the per-item cap or the section's end position. The
//! decoder validates the same caps, so both sides must agree on [`ListBudget`].

use bitstream::{BitError, BitReader, BitWriter};

use crate::error::DecodeError;
use crate::limits::MAX_LIST_ITEMS;

const COUNT_BITS: u8 = 8;

/// Caps applied to one packed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListBudget {
    /// Maximum encoded size of a single item, in bytes.
    pub item_bytes: usize,
    /// Absolute byte position in the packet the list may not extend past.
    pub end_bytes: usize,
    /// Maximum number of items.
    pub max_items: usize,
}

impl ListBudget {
    #[must_use]
    pub fn new(item_bytes: usize, end_bytes: usize, max_items: usize) -> Self {
        Self {
            item_bytes,
            end_bytes,
            max_items: max_items.min(MAX_LIST_ITEMS),
        }
    }

    const fn item_bits(&self) -> usize {
        self.item_bytes.saturating_mul(8)
    }
}

/// Packs items until the budget is exhausted, returning how many were
/// written. Items are consumed in iteration order; the caller can map the
/// returned count back onto its input.
pub fn pack_list<T, E, I, F>(
    writer: &mut BitWriter,
    budget: ListBudget,
    items: I,
    mut encode: F,
) -> Result<usize, E>
where
    I: IntoIterator<Item = T>,
    E: From<BitError>,
    F: FnMut(&mut BitWriter, T) -> Result<(), E>,
{
    let slot = writer.reserve(COUNT_BITS)?;
    let mut count = 0usize;
    for item in items {
        if count >= budget.max_items {
            break;
        }
        let checkpoint = writer.checkpoint();
        encode(writer, item)?;
        let item_bits = writer.bits_written() - checkpoint.bits();
        if item_bits > budget.item_bits() || writer.bytes_written() > budget.end_bytes {
            writer.rollback(checkpoint);
            break;
        }
        count += 1;
    }
    writer.fill_slot(slot, count as u64)?;
    Ok(count)
}

/// Decodes a list written by [`pack_list`], enforcing the same budget.
pub fn unpack_list<T, E, F>(
    reader: &mut BitReader<'_>,
    budget: ListBudget,
    mut decode: F,
) -> Result<Vec<T>, E>
where
    E: From<DecodeError>,
    F: FnMut(&mut BitReader<'_>) -> Result<T, E>,
{
    let raw = reader
        .read_bits(COUNT_BITS)
        .map_err(|err| E::from(DecodeError::from(err)))?;
    // Eight bits always fit a usize.
    #[allow(clippy::cast_possible_truncation)]
    let count = raw as usize;
    if count > budget.max_items {
        return Err(DecodeError::ListTooLong {
            count,
            limit: budget.max_items,
        }
        .into());
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let start = reader.bit_position();
        items.push(decode(reader)?);
        let bits = reader.bit_position() - start;
        if bits > budget.item_bits() {
            return Err(DecodeError::ItemTooLarge {
                bits,
                limit_bits: budget.item_bits(),
            }
            .into());
        }
    }
    let end = reader.bit_position().div_ceil(8);
    if count > 0 && end > budget.end_bytes {
        return Err(DecodeError::SectionOverBudget {
            end,
            limit: budget.end_bytes,
        }
        .into());
    }
    Ok(items)
}
