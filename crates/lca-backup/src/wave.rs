//! Wave grouping
//!
//! Backups and restores are applied in waves ordered by their apply-wave
//! annotation. Every member of a wave must settle before the next wave
//! starts. Waves are a view over the request set and are never stored.

use tracing::debug;

use crate::velero::StateRequest;

/// Requests sharing one apply-wave value
#[derive(Debug, Clone, PartialEq)]
pub struct Wave<T> {
    /// 1-based position of the wave
    pub ordinal: usize,
    /// Apply-wave value shared by the members
    pub priority: i32,
    /// Members in input order
    pub members: Vec<T>,
}

impl<T> Wave<T> {
    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the wave has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Group items into waves by a priority key
///
/// Waves come out in ascending priority; within a wave, items keep their
/// input order.
pub fn group_by_priority<T, F>(items: Vec<T>, priority: F) -> Vec<Wave<T>>
where
    F: Fn(&T) -> i32,
{
    let mut keyed: Vec<(i32, T)> = items.into_iter().map(|t| (priority(&t), t)).collect();
    // stable: ties keep input order
    keyed.sort_by_key(|(p, _)| *p);

    let mut waves: Vec<Wave<T>> = Vec::new();
    for (p, item) in keyed {
        match waves.last_mut() {
            Some(wave) if wave.priority == p => wave.members.push(item),
            _ => waves.push(Wave {
                ordinal: waves.len() + 1,
                priority: p,
                members: vec![item],
            }),
        }
    }
    waves
}

/// Group Backups or Restores into waves by their apply-wave annotation
///
/// Requests with no annotation, or one that is not an integer, land in the
/// last wave.
pub fn group_into_waves<T: StateRequest>(requests: Vec<T>) -> Vec<Wave<T>> {
    let waves = group_by_priority(requests, T::apply_wave);
    for wave in &waves {
        debug!(
            kind = T::KIND,
            wave = wave.ordinal,
            priority = wave.priority,
            members = wave.len(),
            "computed wave"
        );
    }
    waves
}
