use spillway_core::PreSplit;
use tracing::debug;

use crate::bag::Bag;
use crate::balance::{coalesce_and_count, resize_bags};

use super::TaskManager;

impl TaskManager<'_> {
    /// Shallow local rounds before the first wave: expand every bag a little,
    /// fold finished counts, fan each survivor out by `split_factor`. Stops
    /// once `target_bags` exist. Returns the counted nodes.
    pub(super) fn presplit(&self, bags: &mut Vec<Bag>, presplit: &PreSplit) -> u64 {
        let mut counted = 0;
        for step in 0..presplit.steps {
            for bag in bags.iter_mut() {
                bag.expand_n(presplit.local_iterations);
            }
            let mut survivors = Vec::with_capacity(bags.len());
            counted += coalesce_and_count(bags.drain(..), &mut survivors);

            for bag in survivors {
                let mut fanned = vec![bag];
                resize_bags(&mut fanned, presplit.split_factor);
                bags.append(&mut fanned);
            }
            debug!(step, bags = bags.len(), counted, "presplit round");
            if bags.len() >= presplit.target_bags {
                break;
            }
        }
        counted
    }
}
