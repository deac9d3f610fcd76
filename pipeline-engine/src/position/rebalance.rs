/// Renumber `len` deals to evenly spaced multiples of `gap`
///
/// Order is preserved (`result[i]` is the new key of the i-th deal). When the
/// pending insert goes to the head (`insert_at == 0`) numbering starts at `gap`
/// instead of `0`, leaving room in front of the first deal.
pub fn rebalance(len: usize, insert_at: usize, gap: i64) -> Vec<i64> {
    let offset: i64 = if insert_at == 0 { 1 } else { 0 };
    (0..len)
        .map(|i| (i as i64).saturating_add(offset).saturating_mul(gap))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiples_of_gap_in_order() {
        assert_eq!(rebalance(3, 2, 10_000), vec![0, 10_000, 20_000]);
        assert_eq!(rebalance(0, 0, 10_000), Vec::<i64>::new());
    }

    #[test]
    fn head_insert_starts_at_gap() {
        assert_eq!(rebalance(2, 0, 100), vec![100, 200]);
    }
}
