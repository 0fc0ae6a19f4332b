//! Quorum arithmetic.
//!
//! For a tolerance `f` the group has `N = 3f + 1` replicas.
//!
//! | Certificate | Threshold | Counted over |
//! |-------------|-----------|--------------|
//! | prepared | `2f` | PREPAREs matching the PRE-PREPARE digest |
//! | committed-local | `2f + 1` | COMMITs |
//! | stable checkpoint | `2f + 1` | CHECKPOINTs with equal state digest |
//! | bandwagon | `f + 1` | VIEW-CHANGEs from other replicas |
//! | new view | `2f` | VIEW-CHANGEs from replicas other than the new primary |
//! | client result | `f + 1` | matching REPLYs |

/// Total number of replicas needed to tolerate `f` faults.
pub fn replica_count(f: usize) -> usize {
    3 * f + 1
}

pub fn prepare_quorum(f: usize) -> usize {
    2 * f
}

pub fn commit_quorum(f: usize) -> usize {
    2 * f + 1
}

pub fn stable_quorum(f: usize) -> usize {
    2 * f + 1
}

pub fn bandwagon_quorum(f: usize) -> usize {
    f + 1
}

pub fn new_view_quorum(f: usize) -> usize {
    2 * f
}

pub fn reply_quorum(f: usize) -> usize {
    f + 1
}

/// Find a value that occurs at least `threshold` times.
///
/// Values are compared with `PartialEq` only, so this works for results
/// that cannot be hashed. Returns the first value (in iteration order) to
/// reach the threshold. A threshold of zero is never satisfied.
pub fn matching_value<'a, T, I>(values: I, threshold: usize) -> Option<&'a T>
where
    T: PartialEq + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if threshold == 0 {
        return None;
    }

    let mut tally: Vec<(&'a T, usize)> = Vec::new();
    for value in values {
        match tally.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => {
                *count += 1;
                if *count >= threshold {
                    return Some(value);
                }
            }
            None => {
                if threshold == 1 {
                    return Some(value);
                }
                tally.push((value, 1));
            }
        }
    }
    None
}
