/// Compute how many records one source contributes to each successive frame.
///
/// `speed` is split into its integer part and fractional remainder. The
/// integer part is the base per-frame count; the remainder feeds a running
/// accumulator that adds one extra record whenever it crosses a whole number,
/// keeping the long-run average equal to `speed`. Entries are clamped so the
/// running sum never exceeds `record_count`, and the final entry is exactly
/// the remaining amount.
///
/// Postcondition: the entries sum to `record_count` exactly (for any
/// `speed > 0`).
pub fn frame_sequence(record_count: u64, speed: f64) -> Vec<u64> {
    let base = speed.trunc() as u64;
    let remainder = speed.fract();

    if remainder == 0.0 {
        if base == 0 {
            return Vec::new();
        }
        let mut sequence = vec![base; (record_count / base) as usize];
        if record_count % base != 0 {
            sequence.push(record_count % base);
        }
        return sequence;
    }

    let mut sequence = Vec::new();
    let mut total = 0u64;
    let mut accumulator = 0.0f64;
    while total != record_count {
        let mut entry = base;
        accumulator += remainder;
        if accumulator >= 1.0 {
            let whole = accumulator.trunc();
            accumulator -= whole;
            entry += whole as u64;
        }

        if total + entry <= record_count {
            sequence.push(entry);
            total += entry;
        } else {
            sequence.push(record_count - total);
            total = record_count;
        }
    }

    sequence
}
