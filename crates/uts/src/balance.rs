//! Working-set operations of the control loop.

use crate::bag::Bag;

/// Fold the counts of `src` into the returned total and move every bag that
/// still has frontier into `target`. Exhausted bags are dropped.
pub fn coalesce_and_count(src: impl IntoIterator<Item = Bag>, target: &mut Vec<Bag>) -> u64 {
    let mut total = 0;
    for mut bag in src {
        total += bag.take_count();
        if bag.size() > 0 {
            target.push(bag);
        }
    }
    total
}

/// Split the working set until it holds `target` bags or nothing divides.
///
/// Each original bag is split repeatedly first; if that falls short, the
/// split-offs are resized in turn. Ending below `target` is not an error.
pub fn resize_bags(bags: &mut Vec<Bag>, target: usize) {
    if bags.is_empty() || bags.len() >= target {
        return;
    }
    let original = bags.len();
    let mut split_offs = Vec::new();
    for bag in bags.iter_mut() {
        while original + split_offs.len() < target {
            match bag.split() {
                Some(half) => split_offs.push(half),
                None => break,
            }
        }
    }
    if original + split_offs.len() < target {
        resize_bags(&mut split_offs, target - original);
    }
    bags.append(&mut split_offs);
}
