use super::session::{Role, RoleRanges};
use crate::config::{PoolSettings, Settings};

#[test]
fn test_default_ranges_classify_ports() {
    let ranges = RoleRanges::default();
    assert_eq!(ranges.classify(5042), Some(Role::Publisher));
    assert_eq!(ranges.classify(6042), Some(Role::Subscriber));
    assert_eq!(ranges.classify(1234), None);
}

#[test]
fn test_range_bounds_are_half_open() {
    let ranges = RoleRanges::default();
    assert_eq!(ranges.classify(5000), Some(Role::Publisher));
    assert_eq!(ranges.classify(5999), Some(Role::Publisher));
    assert_eq!(ranges.classify(6000), Some(Role::Subscriber));
    assert_eq!(ranges.classify(7000), None);
}

#[test]
fn test_ranges_follow_pool_settings() {
    let pools = PoolSettings {
        publisher_port_start: 40000,
        publisher_port_end: 40010,
        subscriber_port_start: 41000,
        subscriber_port_end: 41010,
        ..Settings::default().pools
    };
    let ranges = RoleRanges::from(&pools);
    assert_eq!(ranges.classify(40005), Some(Role::Publisher));
    assert_eq!(ranges.classify(41009), Some(Role::Subscriber));
    assert_eq!(ranges.classify(5042), None);
}

#[test]
fn test_role_display() {
    assert_eq!(Role::Publisher.to_string(), "publisher");
    assert_eq!(Role::Subscriber.to_string(), "subscriber");
}
