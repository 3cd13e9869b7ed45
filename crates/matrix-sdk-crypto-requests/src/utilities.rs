// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// A TTL cache of things that failed, e.g. homeservers that couldn't answer a
/// `/keys/query` request.
///
/// Items don't get discarded once their TTL elapses, they only become
/// inactive. Failing again extends the TTL with an exponential backoff, items
/// need to be explicitly removed once they succeed.
#[derive(Debug)]
pub(crate) struct FailuresCache<T: Eq + Hash> {
    items: HashMap<T, FailuresItem>,
}

#[derive(Debug, Clone, Copy)]
struct FailuresItem {
    insertion_time: Instant,
    duration: Duration,
    /// How often the item failed since it was first added, minus one.
    failure_count: u8,
}

impl FailuresItem {
    fn expired(&self) -> bool {
        self.insertion_time.elapsed() >= self.duration
    }
}

impl<T: Eq + Hash> FailuresCache<T> {
    const MAX_DELAY: u64 = 15 * 60;
    const MULTIPLIER: u64 = 15;

    pub(crate) fn new() -> Self {
        Self { items: HashMap::new() }
    }

    /// Is the given item part of the cache and still active.
    pub(crate) fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.get(item).is_some_and(|i| !i.expired())
    }

    /// The delay, in seconds: 15, 30, 60, 120, 240, 480, then 900 from there
    /// on.
    fn calculate_delay(failure_count: u8) -> Duration {
        let exponential_backoff = 2u64.saturating_pow(failure_count.into());
        let delay = exponential_backoff.saturating_mul(Self::MULTIPLIER).clamp(1, Self::MAX_DELAY);

        Duration::from_secs(delay)
    }

    /// Record a new failure for each of the given items.
    ///
    /// Items that already failed before, expired or not, get a longer TTL.
    pub(crate) fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        let now = Instant::now();

        for item in items {
            let failure_count =
                self.items.get(&item).map_or(0, |i| i.failure_count.saturating_add(1));
            let duration = Self::calculate_delay(failure_count);

            self.items.insert(item, FailuresItem { insertion_time: now, duration, failure_count });
        }
    }

    /// Forget the failures of the given items.
    pub(crate) fn remove<'a, Q>(&mut self, items: impl IntoIterator<Item = &'a Q>)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        for item in items {
            self.items.remove(item);
        }
    }

    #[cfg(test)]
    pub(crate) fn failure_count<Q>(&self, item: &Q) -> Option<u8>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.get(item).map(|i| i.failure_count)
    }

    /// Make the item eligible for a retry right away, keeping its failure
    /// count.
    #[cfg(test)]
    pub(crate) fn expire<Q>(&mut self, item: &Q)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(item) = self.items.get_mut(item) {
            item.duration = Duration::ZERO;
        }
    }
}

impl<T: Eq + Hash> Default for FailuresCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::FailuresCache;

    #[test]
    fn test_failures_cache() {
        let mut cache = FailuresCache::new();
        assert!(!cache.contains(&1u8));

        cache.extend([1u8]);
        assert!(cache.contains(&1));
        assert_eq!(cache.failure_count(&1), Some(0));

        cache.expire(&1);
        assert!(!cache.contains(&1));

        cache.extend([1u8]);
        assert!(cache.contains(&1));
        assert_eq!(cache.failure_count(&1), Some(1));

        cache.remove([&1u8]);
        assert_eq!(cache.failure_count(&1), None);
    }

    #[test]
    fn test_failures_cache_delay() {
        let delays: Vec<_> =
            (0..8).map(|c| FailuresCache::<u8>::calculate_delay(c).as_secs()).collect();

        assert_eq!(delays, [15, 30, 60, 120, 240, 480, 900, 900]);
    }

    proptest! {
        #[test]
        fn test_failures_cache_delay_is_bounded(count in any::<u8>()) {
            let delay = FailuresCache::<u8>::calculate_delay(count).as_secs();

            prop_assert!((15..=900).contains(&delay));
        }
    }
}
