use time::{Duration, OffsetDateTime};

/// Seuil par défaut : 2 minutes sans ping = offline
pub const DEFAULT_OFFLINE_THRESHOLD: Duration = Duration::milliseconds(120_000);

/// `now - latest > threshold`. Sans timestamp l'entité est offline.
pub fn is_offline(latest: Option<OffsetDateTime>, now: OffsetDateTime, threshold: Duration) -> bool {
    match latest {
        Some(ts) => now - ts > threshold,
        None => true,
    }
}

/// Durée écoulée depuis le dernier ping quand l'entité est offline (zéro si online).
/// None quand aucun timestamp n'est connu.
pub fn offline_for(
    latest: Option<OffsetDateTime>,
    now: OffsetDateTime,
    threshold: Duration,
) -> Option<Duration> {
    let ts = latest?;
    if is_offline(Some(ts), now, threshold) {
        Some(now - ts)
    } else {
        Some(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    #[test]
    fn test_threshold_edge_is_exact() {
        let t = DEFAULT_OFFLINE_THRESHOLD;
        assert!(!is_offline(Some(NOW - Duration::milliseconds(120_000)), NOW, t));
        assert!(is_offline(Some(NOW - Duration::milliseconds(120_001)), NOW, t));
    }

    #[test]
    fn test_missing_timestamp_is_offline() {
        assert!(is_offline(None, NOW, DEFAULT_OFFLINE_THRESHOLD));
        assert_eq!(offline_for(None, NOW, DEFAULT_OFFLINE_THRESHOLD), None);
    }

    #[test]
    fn test_future_timestamp_is_online() {
        assert!(!is_offline(Some(NOW + Duration::minutes(5)), NOW, DEFAULT_OFFLINE_THRESHOLD));
    }

    #[test]
    fn test_offline_duration_is_monotonic() {
        let t = DEFAULT_OFFLINE_THRESHOLD;
        let older = offline_for(Some(NOW - Duration::minutes(30)), NOW, t).unwrap();
        let newer = offline_for(Some(NOW - Duration::minutes(10)), NOW, t).unwrap();
        assert!(older >= newer);
        assert_eq!(offline_for(Some(NOW - Duration::seconds(30)), NOW, t), Some(Duration::ZERO));
    }
}
