use once_cell::sync::Lazy;
use std::time::Instant;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Wall-clock milliseconds since the Unix epoch. Used for signing nonces
/// and exchange timestamps, never for timeouts.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonic nanoseconds since process start. Used for `recv_ns` and
/// `publish_ns` stamps on market-data events.
pub fn now_ns_monotonic() -> u64 {
    PROCESS_START.elapsed().as_nanos() as u64
}

pub fn chunk_vec<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    if chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut idx = 0;
    while idx < items.len() {
        let end = (idx + chunk_size).min(items.len());
        chunks.push(items[idx..end].to_vec());
        idx = end;
    }
    chunks
}

/// Formats a float with 8 decimals and strips trailing zeros and a
/// trailing dot. Venue wire formats reject `1.50000000`.
pub fn trim_fixed(v: f64) -> String {
    let s = format!("{:.8}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_vec_splits_remainder() {
        let chunks = chunk_vec(&[1, 2, 3, 4, 5], 2);
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(chunk_vec(&[1, 2], 0).is_empty());
    }

    #[test]
    fn trim_fixed_strips_zeros() {
        assert_eq!(trim_fixed(1.5), "1.5");
        assert_eq!(trim_fixed(43000.0), "43000");
        assert_eq!(trim_fixed(0.00000001), "0.00000001");
        assert_eq!(trim_fixed(65000.5), "65000.5");
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = now_ns_monotonic();
        let b = now_ns_monotonic();
        assert!(b >= a);
    }
}
