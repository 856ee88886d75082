use forwarder::cache::{ManualClock, TtlCache};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(180);

#[test]
fn test_prune_removes_only_expired() {
    let clock = Arc::new(ManualClock::new());
    let cache: TtlCache<i64> = TtlCache::new(TTL, clock.clone());

    cache.set(1, "old");
    clock.advance(Duration::from_secs(100));
    cache.set(2, "new");
    assert_eq!(cache.prune(clock_now(&clock)), 0);
    assert_eq!(cache.len(), 2);

    clock.advance(Duration::from_secs(80));

    let removed = cache.prune(clock_now(&clock));
    assert_eq!(removed, 1);
    assert_eq!(cache.get(&1, false), None);
    assert_eq!(cache.get(&2, false).as_deref(), Some("new"));
}

#[test]
fn test_entries_survive_until_pruned() {
    let clock = Arc::new(ManualClock::new());
    let cache: TtlCache<String> = TtlCache::new(TTL, clock.clone());

    cache.set("group".to_string(), "caption");
    clock.advance(TTL * 2);

    // Expiry is enforced by the sweep, not by reads.
    assert_eq!(cache.get(&"group".to_string(), false).as_deref(), Some("caption"));
    assert_eq!(cache.prune(clock_now(&clock)), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_set_restarts_lifetime() {
    let clock = Arc::new(ManualClock::new());
    let cache: TtlCache<i64> = TtlCache::new(TTL, clock.clone());

    cache.set(1, "first");
    clock.advance(Duration::from_secs(170));
    cache.set(1, "second");
    clock.advance(Duration::from_secs(20));

    assert_eq!(cache.prune(clock_now(&clock)), 0);
    assert_eq!(cache.get(&1, true).as_deref(), Some("second"));
    assert_eq!(cache.get(&1, true), None);
}

fn clock_now(clock: &ManualClock) -> tokio::time::Instant {
    use forwarder::cache::Clock;
    clock.now()
}
