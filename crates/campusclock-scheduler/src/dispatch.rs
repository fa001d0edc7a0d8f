//! Daily fan-out — one pending attempt per opted-in user.
//!
//! Explicit parameters throughout (user set, clock, RNG) so jitter and
//! fan-out are deterministic under test. Processing order is shuffled; only
//! per-user independence matters.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use campusclock_core::error::Result;
use campusclock_core::types::{Attempt, User};
use campusclock_store::ClockStore;

/// Jitter caps: the portal gets at most one submission burst spread over
/// two hours, never a thundering herd at the trigger instant.
pub const JITTER_MAX_MINUTES: i64 = 120;
pub const JITTER_MAX_SECONDS: i64 = 60;

/// Draw one jittered target time, independently per user.
/// Always within `[now, now + 121 minutes]`.
pub fn jittered_time<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
    let minutes = rng.gen_range(0..=JITTER_MAX_MINUTES);
    let seconds = rng.gen_range(0..=JITTER_MAX_SECONDS);
    now + Duration::minutes(minutes) + Duration::seconds(seconds)
}

/// Fan out one daily run: create a pending attempt for every user with
/// `auto_clock` set. Users without an id yet get one assigned here (an
/// attempt row needs its owner).
pub fn dispatch_daily<R: Rng>(
    store: &ClockStore,
    users: &[User],
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Vec<(User, Attempt)>> {
    let mut opted: Vec<&User> = users.iter().filter(|u| u.auto_clock).collect();
    opted.shuffle(rng);

    let mut created = Vec::with_capacity(opted.len());
    for user in opted {
        let user_id = match &user.id {
            Some(id) => id.clone(),
            None => store.ensure_user_id(&user.username)?,
        };
        let scheduled_at = jittered_time(now, rng);
        let attempt = store.create_attempt(&user_id, scheduled_at)?;
        tracing::info!(
            "📅 attempt {} for {} due {}",
            attempt.id,
            user.username,
            scheduled_at.format("%H:%M:%S")
        );

        let mut user = user.clone();
        user.id = Some(user_id);
        created.push((user, attempt));
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusclock_core::types::AttemptStatus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn store_with(users: &[(&str, bool)]) -> ClockStore {
        let store = ClockStore::open_in_memory().unwrap();
        for (name, auto) in users {
            store.add_user(name, "sealed", None, *auto).unwrap();
        }
        store
    }

    #[test]
    fn test_opted_out_users_get_no_attempt() {
        let store = store_with(&[("on", true), ("off", false)]);
        let users = store.list_users().unwrap();

        let created = dispatch_daily(&store, &users, Utc::now(), &mut seeded()).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0.username, "on");
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let now = Utc::now();
        let mut rng = seeded();
        let upper = now + Duration::minutes(121);
        for _ in 0..500 {
            let t = jittered_time(now, &mut rng);
            assert!(t >= now, "{t} before {now}");
            assert!(t <= upper, "{t} after {upper}");
        }
    }

    #[test]
    fn test_attempts_start_pending_with_their_schedule() {
        let store = store_with(&[("a", true), ("b", true)]);
        let users = store.list_users().unwrap();
        let now = Utc::now();

        let created = dispatch_daily(&store, &users, now, &mut seeded()).unwrap();
        assert_eq!(created.len(), 2);
        for (user, attempt) in &created {
            assert_eq!(attempt.status, AttemptStatus::Pending);
            assert_eq!(Some(attempt.user_id.clone()), user.id);
            assert!(attempt.scheduled_at >= now);
            assert!(attempt.scheduled_at <= now + Duration::minutes(121));

            let stored = store.get_attempt(&attempt.id).unwrap().unwrap();
            assert_eq!(stored.status, AttemptStatus::Pending);
            assert!(stored.executed_at.is_none());
        }
    }

    #[test]
    fn test_dispatch_assigns_missing_ids() {
        let store = store_with(&[("fresh", true)]);
        let users = store.list_users().unwrap();
        assert!(users[0].id.is_none());

        let created = dispatch_daily(&store, &users, Utc::now(), &mut seeded()).unwrap();
        let assigned = created[0].0.id.clone().unwrap();
        assert_eq!(store.ensure_user_id("fresh").unwrap(), assigned);
    }
}
