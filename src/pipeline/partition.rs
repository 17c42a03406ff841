use alloy_primitives::Address;

use crate::error::{PipelineError, PipelineResult};
use crate::types::ScanRange;

/// Splits `[start, end]` into at most `workers` contiguous, non-overlapping ranges.
///
/// Every range except the last spans the same number of blocks. The last one is pinned to
/// `end` and absorbs whatever is left
pub fn partition(
    start: u64,
    end: u64,
    workers: usize,
    contract: Address,
) -> PipelineResult<Vec<ScanRange>> {
    if workers == 0 {
        return Err(PipelineError::NoWorkers);
    }
    // the inclusive block count must fit in a u64
    let blocks = end
        .checked_sub(start)
        .and_then(|span| span.checked_add(1))
        .ok_or(PipelineError::InvalidRange { start, end })?;
    let count = (workers as u64).min(blocks);
    let stride = blocks.div_ceil(count);
    // a rounded-up stride may cover the range with fewer partitions
    let count = blocks.div_ceil(stride);

    let ranges = (0..count)
        .map(|i| {
            let range_start = start + i * stride;
            let range_end = if i == count - 1 {
                end
            } else {
                range_start + stride - 1
            };

            ScanRange {
                start: range_start,
                end: range_end,
                contract,
            }
        })
        .collect();

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[derive(Debug)]
    struct Fixture {
        start: u64,
        end: u64,
        workers: usize,
        output: Vec<(u64, u64)>,
    }

    #[fixture]
    fn remainder_in_last() -> Fixture {
        Fixture {
            start: 100,
            end: 107,
            workers: 3,
            output: vec![(100, 102), (103, 105), (106, 107)],
        }
    }

    #[fixture]
    fn single_block() -> Fixture {
        Fixture {
            start: 5,
            end: 5,
            workers: 4,
            output: vec![(5, 5)],
        }
    }

    #[fixture]
    fn more_workers_than_blocks() -> Fixture {
        Fixture {
            start: 0,
            end: 2,
            workers: 10,
            output: vec![(0, 0), (1, 1), (2, 2)],
        }
    }

    #[fixture]
    fn exact_split() -> Fixture {
        Fixture {
            start: 10,
            end: 19,
            workers: 5,
            output: vec![(10, 11), (12, 13), (14, 15), (16, 17), (18, 19)],
        }
    }

    #[fixture]
    fn single_worker() -> Fixture {
        Fixture {
            start: 1,
            end: 1000,
            workers: 1,
            output: vec![(1, 1000)],
        }
    }

    #[fixture]
    fn rounded_stride_uses_fewer_workers() -> Fixture {
        Fixture {
            start: 0,
            end: 8,
            workers: 6,
            output: vec![(0, 1), (2, 3), (4, 5), (6, 7), (8, 8)],
        }
    }

    #[rstest]
    #[case(remainder_in_last())]
    #[case(single_block())]
    #[case(more_workers_than_blocks())]
    #[case(exact_split())]
    #[case(single_worker())]
    #[case(rounded_stride_uses_fewer_workers())]
    fn test(#[case] fixture: Fixture) {
        let result = partition(fixture.start, fixture.end, fixture.workers, Address::ZERO).unwrap();
        let bounds: Vec<_> = result.iter().map(|r| (r.start, r.end)).collect();

        assert_eq!(bounds, fixture.output);
    }

    #[test]
    fn test_covers_every_block_exactly_once() {
        for start in [0u64, 1, 7, 16_515_647] {
            for len in 1..=40u64 {
                let end = start + len - 1;
                for workers in 1..=12 {
                    let ranges = partition(start, end, workers, Address::ZERO).unwrap();

                    assert!(ranges.len() <= workers);
                    assert_eq!(ranges.first().unwrap().start, start);
                    assert_eq!(ranges.last().unwrap().end, end);
                    for pair in ranges.windows(2) {
                        assert_eq!(pair[0].end + 1, pair[1].start);
                    }
                    assert!(ranges.iter().all(|r| r.start <= r.end));
                    assert_eq!(ranges.iter().map(ScanRange::len).sum::<u64>(), len);
                }
            }
        }
    }

    #[test]
    fn test_carries_contract() {
        let contract = Address::repeat_byte(0xaa);
        let ranges = partition(0, 99, 4, contract).unwrap();
        assert!(ranges.iter().all(|r| r.contract == contract));
    }

    #[test]
    fn test_rejects_inverted_range() {
        assert!(matches!(
            partition(10, 9, 4, Address::ZERO),
            Err(PipelineError::InvalidRange { start: 10, end: 9 })
        ));
    }

    #[rstest]
    #[case(0, u64::MAX, 4)]
    #[case(0, u64::MAX, 1)]
    fn test_rejects_block_count_overflow(
        #[case] start: u64,
        #[case] end: u64,
        #[case] workers: usize,
    ) {
        assert!(matches!(
            partition(start, end, workers, Address::ZERO),
            Err(PipelineError::InvalidRange { start: 0, end: u64::MAX })
        ));
    }

    #[test]
    fn test_accepts_range_ending_at_max_block() {
        let ranges = partition(1, u64::MAX, 4, Address::ZERO).unwrap();

        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges.last().unwrap().end, u64::MAX);
        assert_eq!(ranges.iter().map(ScanRange::len).sum::<u64>(), u64::MAX);
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(matches!(
            partition(0, 9, 0, Address::ZERO),
            Err(PipelineError::NoWorkers)
        ));
    }
}
