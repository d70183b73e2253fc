//! Reading order: top-to-bottom, left-to-right over row buckets.
//!
//! Blocks whose top edges fall into the same `tolerance`-high band are
//! treated as one visual row and ordered by their left edge; bands are
//! ordered top to bottom. The sort is stable, so blocks with identical keys
//! keep the order the model detected them in.

use crate::model::{Block, BoundingBox};
use std::cmp::Ordering;

/// Tolerance used by the orchestrator.
pub const PIPELINE_TOLERANCE: f64 = 20.0;

/// Tolerance for general-purpose callers.
pub const DEFAULT_TOLERANCE: f64 = 10.0;

/// Sort key of a box: `(floor(y1 / tolerance) * tolerance, x1)`.
///
/// A missing box keys as `(0, 0)`. A non-positive or non-finite tolerance
/// disables bucketing and the key becomes `(y1, x1)`.
pub fn reading_key(bbox: Option<&BoundingBox>, tolerance: f64) -> (f64, f64) {
    let Some(b) = bbox else {
        return (0.0, 0.0);
    };
    let row = if tolerance.is_finite() && tolerance > 0.0 {
        (b.y1() / tolerance).floor() * tolerance
    } else {
        b.y1()
    };
    (row, b.x1())
}

fn compare_keys(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}

/// Stable in-place reading-order sort of any items carrying an optional box.
pub fn sort_by_reading_order<T, F>(items: &mut [T], tolerance: f64, bbox_of: F)
where
    F: Fn(&T) -> Option<&BoundingBox>,
{
    // `sort_by` is a stable merge sort.
    items.sort_by(|a, b| {
        compare_keys(
            reading_key(bbox_of(a), tolerance),
            reading_key(bbox_of(b), tolerance),
        )
    });
}

/// Return `blocks` in reading order.
pub fn sort_blocks(mut blocks: Vec<Block>, tolerance: f64) -> Vec<Block> {
    sort_by_reading_order(&mut blocks, tolerance, |b| b.bounding_box.as_ref());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockKind;
    use std::collections::BTreeMap;

    fn block(name: &str, x1: f64, y1: f64) -> Block {
        Block {
            kind: BlockKind::Text,
            text: name.to_string(),
            bounding_box: BoundingBox::from_corners(x1, y1, x1 + 5.0, y1 + 5.0),
            confidence: 1.0,
            attributes: BTreeMap::new(),
        }
    }

    fn unboxed(name: &str) -> Block {
        Block {
            bounding_box: None,
            ..block(name, 0.0, 0.0)
        }
    }

    fn names(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.text.as_str()).collect()
    }

    #[test]
    fn same_row_is_ordered_left_to_right() {
        let input = vec![block("A", 50.0, 8.0), block("B", 10.0, 5.0), block("C", 0.0, 40.0)];
        let sorted = sort_blocks(input, DEFAULT_TOLERANCE);
        assert_eq!(names(&sorted), vec!["B", "A", "C"]);
    }

    #[test]
    fn rows_are_floor_bucketed() {
        // 19.9 and 0 share bucket 0 at tolerance 20; 20.0 starts bucket 20.
        assert_eq!(reading_key(block("x", 3.0, 19.9).bounding_box.as_ref(), 20.0), (0.0, 3.0));
        assert_eq!(reading_key(block("x", 3.0, 20.0).bounding_box.as_ref(), 20.0), (20.0, 3.0));
        assert_eq!(reading_key(block("x", 3.0, 45.0).bounding_box.as_ref(), 10.0), (40.0, 3.0));
    }

    #[test]
    fn missing_boxes_sort_first_in_input_order() {
        let input = vec![block("A", 0.0, 0.0), unboxed("N1"), block("B", 5.0, 100.0), unboxed("N2")];
        let sorted = sort_blocks(input, PIPELINE_TOLERANCE);
        // A keys as (0, 0) too, and came first.
        assert_eq!(names(&sorted), vec!["A", "N1", "N2", "B"]);
    }

    #[test]
    fn equal_keys_keep_detection_order() {
        let input = vec![block("first", 10.0, 3.0), block("second", 10.0, 7.0), block("third", 10.0, 1.0)];
        let sorted = sort_blocks(input, DEFAULT_TOLERANCE);
        assert_eq!(names(&sorted), vec!["first", "second", "third"]);
    }

    #[test]
    fn sort_is_idempotent() {
        let input = vec![
            block("a", 300.0, 410.0),
            block("b", 20.0, 415.0),
            unboxed("c"),
            block("d", 20.0, 12.0),
            block("e", 700.0, 0.0),
            block("f", 20.0, 12.0),
        ];
        let once = sort_blocks(input, PIPELINE_TOLERANCE);
        let twice = sort_blocks(once.clone(), PIPELINE_TOLERANCE);
        assert_eq!(once, twice);
    }

    #[test]
    fn reordering_distinct_keys_gives_same_output() {
        let forward = vec![block("a", 1.0, 1.0), block("b", 2.0, 50.0), block("c", 3.0, 99.0)];
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(
            names(&sort_blocks(forward, DEFAULT_TOLERANCE)),
            names(&sort_blocks(backward, DEFAULT_TOLERANCE))
        );
    }

    #[test]
    fn shuffling_around_equal_keys_gives_same_output() {
        // p, q and r share the key (0, 10); the others are distinct.
        let tied = [block("p", 10.0, 1.0), block("q", 10.0, 8.0), block("r", 10.0, 4.0)];
        let others = [block("u", 60.0, 2.0), block("v", 0.0, 35.0), unboxed("w")];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let mut expected = None;
        for order in orders {
            for mask in (0u32..64).filter(|m| m.count_ones() == 3) {
                let (mut t, mut o) = (tied.iter(), order.iter().map(|&i| &others[i]));
                let input: Vec<Block> = (0..6)
                    .map(|slot| {
                        let next = if mask & (1 << slot) != 0 { t.next() } else { o.next() };
                        next.cloned().unwrap()
                    })
                    .collect();
                let sorted = sort_blocks(input, DEFAULT_TOLERANCE);
                let got: Vec<String> = sorted.iter().map(|b| b.text.clone()).collect();
                match &expected {
                    None => expected = Some(got),
                    Some(want) => assert_eq!(&got, want, "order {order:?} mask {mask:06b}"),
                }
            }
        }
        assert_eq!(expected.unwrap(), vec!["w", "p", "q", "r", "u", "v"]);
    }

    #[test]
    fn non_positive_tolerance_falls_back_to_raw_y() {
        assert_eq!(reading_key(block("x", 1.0, 7.5).bounding_box.as_ref(), 0.0), (7.5, 1.0));
    }
}
