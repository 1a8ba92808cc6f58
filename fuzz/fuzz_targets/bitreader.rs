#![no_main]

use bitstream::BitReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (ops, payload) = data.split_at(16);
    let mut reader = BitReader::new(payload);

    for &op in ops {
        let result = match op % 7 {
            0 => reader.read_bool().map(drop),
            1 => reader.read_bits((op >> 3) % 64 + 1).map(drop),
            2 => reader.align_to_byte(),
            3 => reader.read_u16_aligned().map(drop),
            4 => reader.read_varu32().map(drop),
            5 => reader.read_vars32().map(drop),
            _ => reader.read_f32().map(drop),
        };
        if result.is_err() {
            break;
        }
    }
});
