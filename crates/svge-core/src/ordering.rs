//! Dense position maintenance for one ordering scope.
//!
//! Positions inside a scope always form `1..=N`. Both operations are pure:
//! they return the complete assignment list in display order and leave
//! persisting the changed rows to the caller.

use std::{collections::HashSet, fmt::Display, hash::Hash};

/// A member of a scope as currently persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot<K> {
    pub id: K,
    pub position: u32,
}

/// Position computed for a member. `previous` is `None` for a fresh insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<K> {
    pub id: K,
    pub position: u32,
    pub previous: Option<u32>,
}

impl<K> Assignment<K> {
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.previous != Some(self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement<K> {
    /// A member that is not yet part of the scope.
    Insert(K),
    /// A member already holding a position in the scope.
    Move(K),
}

impl<K: Copy> Placement<K> {
    #[must_use]
    pub fn id(self) -> K {
        match self {
            Self::Insert(id) | Self::Move(id) => id,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("member {id} is not part of the group")]
    UnknownMember { id: String },
    #[error("member {id} is already part of the group")]
    DuplicateMember { id: String },
    #[error("position {position} is held by more than one member")]
    DuplicatePosition { position: u32 },
    #[error("positions are not dense: expected {expected}, found {found}")]
    NotDense { expected: u32, found: u32 },
    #[error("group holds more members than positions can address")]
    TooManyMembers,
}

impl OrderingError {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownMember { .. } => "unknown_member",
            Self::DuplicateMember { .. } => "duplicate_member",
            Self::DuplicatePosition { .. } => "duplicate_position",
            Self::NotDense { .. } => "not_dense",
            Self::TooManyMembers => "too_many_members",
        }
    }
}

/// Checks that the positions held by `members` are exactly `1..=N`.
///
/// # Errors
/// Returns the first violation found in ascending position order.
pub fn verify_dense<K>(members: &[Slot<K>]) -> Result<(), OrderingError>
where
    K: Copy + Eq + Hash + Display,
{
    member_count(members.len())?;
    ensure_unique_ids(members)?;
    let mut positions: Vec<u32> = members.iter().map(|slot| slot.position).collect();
    positions.sort_unstable();
    let mut previous = None;
    for (expected, found) in (1_u32..).zip(positions) {
        if previous == Some(found) {
            return Err(OrderingError::DuplicatePosition { position: found });
        }
        if found != expected {
            return Err(OrderingError::NotDense { expected, found });
        }
        previous = Some(found);
    }
    Ok(())
}

/// Places `placement`'s member at `desired`, clamped to `[1, N]` where `N` is
/// the member count after the operation.
///
/// Members between the old and the new slot shift by exactly one towards the
/// vacated slot. A fresh insert behaves as a move from the slot past the end.
///
/// # Errors
/// Returns an error if the input is not dense, if a moved member is absent,
/// or if an inserted member is already present.
pub fn insert_or_move<K>(
    members: &[Slot<K>],
    placement: Placement<K>,
    desired: i64,
) -> Result<Vec<Assignment<K>>, OrderingError>
where
    K: Copy + Eq + Hash + Display,
{
    verify_dense(members)?;
    let target_id = placement.id();
    let current = members.iter().find(|slot| slot.id == target_id);
    let (from, count) = match (placement, current) {
        (Placement::Move(_), _) if members.is_empty() => return Ok(Vec::new()),
        (Placement::Move(id), None) => {
            return Err(OrderingError::UnknownMember { id: id.to_string() })
        }
        (Placement::Move(_), Some(slot)) => (Some(slot.position), member_count(members.len())?),
        (Placement::Insert(id), Some(_)) => {
            return Err(OrderingError::DuplicateMember { id: id.to_string() })
        }
        (Placement::Insert(_), None) => (None, member_count(members.len() + 1)?),
    };
    let to = clamp_position(desired, count);

    let mut assignments: Vec<Assignment<K>> = members
        .iter()
        .map(|slot| Assignment {
            id: slot.id,
            position: if slot.id == target_id {
                to
            } else {
                shift(slot.position, from, to)
            },
            previous: Some(slot.position),
        })
        .collect();
    if from.is_none() {
        assignments.push(Assignment {
            id: target_id,
            position: to,
            previous: None,
        });
    }
    assignments.sort_by_key(|assignment| assignment.position);
    Ok(assignments)
}

/// Renumbers `members` to `1..=N` in ascending order of their current
/// position. Gaps are expected after a removal; duplicates are not.
///
/// # Errors
/// Returns an error if two members share an id or a position.
pub fn compact<K>(members: &[Slot<K>]) -> Result<Vec<Assignment<K>>, OrderingError>
where
    K: Copy + Eq + Hash + Display,
{
    member_count(members.len())?;
    ensure_unique_ids(members)?;
    let mut ordered = members.to_vec();
    ordered.sort_by_key(|slot| slot.position);
    if let Some(pair) = ordered
        .windows(2)
        .find(|pair| pair[0].position == pair[1].position)
    {
        return Err(OrderingError::DuplicatePosition {
            position: pair[0].position,
        });
    }

    Ok((1_u32..)
        .zip(ordered)
        .map(|(position, slot)| Assignment {
            id: slot.id,
            position,
            previous: Some(slot.position),
        })
        .collect())
}

fn shift(position: u32, from: Option<u32>, to: u32) -> u32 {
    match from {
        None if position >= to => position + 1,
        Some(from) if from < to && position > from && position <= to => position - 1,
        Some(from) if from > to && position >= to && position < from => position + 1,
        _ => position,
    }
}

fn clamp_position(desired: i64, count: u32) -> u32 {
    u32::try_from(desired.clamp(1, i64::from(count))).unwrap_or(count)
}

fn member_count(len: usize) -> Result<u32, OrderingError> {
    u32::try_from(len).map_err(|_| OrderingError::TooManyMembers)
}

fn ensure_unique_ids<K>(members: &[Slot<K>]) -> Result<(), OrderingError>
where
    K: Copy + Eq + Hash + Display,
{
    let mut seen = HashSet::with_capacity(members.len());
    for slot in members {
        if !seen.insert(slot.id) {
            return Err(OrderingError::DuplicateMember {
                id: slot.id.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{compact, insert_or_move, verify_dense, Assignment, OrderingError, Placement, Slot};

    fn slots(entries: &[(char, u32)]) -> Vec<Slot<char>> {
        entries
            .iter()
            .map(|&(id, position)| Slot { id, position })
            .collect()
    }

    fn positions(assignments: &[Assignment<char>]) -> Vec<(char, u32)> {
        assignments
            .iter()
            .map(|assignment| (assignment.id, assignment.position))
            .collect()
    }

    fn apply(assignments: &[Assignment<char>]) -> Vec<Slot<char>> {
        assignments
            .iter()
            .map(|assignment| Slot {
                id: assignment.id,
                position: assignment.position,
            })
            .collect()
    }

    #[test]
    fn moving_last_member_to_front_shifts_others_down_the_list() {
        let members = slots(&[('X', 1), ('Y', 2), ('Z', 3)]);
        let result = insert_or_move(&members, Placement::Move('Z'), 1).unwrap();
        assert_eq!(positions(&result), vec![('Z', 1), ('X', 2), ('Y', 3)]);
        assert!(result.iter().all(Assignment::is_changed));
    }

    #[test]
    fn moving_forward_only_touches_the_shifted_range() {
        let members = slots(&[('A', 1), ('B', 2), ('C', 3), ('D', 4), ('E', 5)]);
        let result = insert_or_move(&members, Placement::Move('B'), 4).unwrap();
        assert_eq!(
            positions(&result),
            vec![('A', 1), ('C', 2), ('D', 3), ('B', 4), ('E', 5)]
        );
        let changed: Vec<char> = result
            .iter()
            .filter(|assignment| assignment.is_changed())
            .map(|assignment| assignment.id)
            .collect();
        assert_eq!(changed, vec!['C', 'D', 'B']);
    }

    #[test]
    fn moving_backward_only_touches_the_shifted_range() {
        let members = slots(&[('A', 1), ('B', 2), ('C', 3), ('D', 4), ('E', 5)]);
        let result = insert_or_move(&members, Placement::Move('D'), 2).unwrap();
        assert_eq!(
            positions(&result),
            vec![('A', 1), ('D', 2), ('B', 3), ('C', 4), ('E', 5)]
        );
        assert!(!result[0].is_changed());
        assert!(!result[4].is_changed());
    }

    #[test]
    fn desired_positions_clamp_to_the_group_bounds() {
        let members = slots(&[('A', 1), ('B', 2), ('C', 3)]);
        assert_eq!(
            insert_or_move(&members, Placement::Move('A'), 99).unwrap(),
            insert_or_move(&members, Placement::Move('A'), 3).unwrap()
        );
        assert_eq!(
            insert_or_move(&members, Placement::Move('C'), 0).unwrap(),
            insert_or_move(&members, Placement::Move('C'), 1).unwrap()
        );
        assert_eq!(
            insert_or_move(&members, Placement::Move('C'), -7).unwrap(),
            insert_or_move(&members, Placement::Move('C'), 1).unwrap()
        );
    }

    #[test]
    fn moving_to_the_current_slot_changes_nothing() {
        let members = slots(&[('A', 1), ('B', 2)]);
        let result = insert_or_move(&members, Placement::Move('B'), 2).unwrap();
        assert!(result.iter().all(|assignment| !assignment.is_changed()));
    }

    #[test]
    fn inserting_grows_the_group_and_clamps_to_the_new_count() {
        let members = slots(&[('A', 1), ('B', 2)]);
        let middle = insert_or_move(&members, Placement::Insert('N'), 2).unwrap();
        assert_eq!(positions(&middle), vec![('A', 1), ('N', 2), ('B', 3)]);
        assert_eq!(middle[1].previous, None);

        let end = insert_or_move(&members, Placement::Insert('N'), i64::MAX).unwrap();
        assert_eq!(positions(&end), vec![('A', 1), ('B', 2), ('N', 3)]);
        assert!(!end[0].is_changed());
        assert!(!end[1].is_changed());
    }

    #[test]
    fn inserting_into_an_empty_group_takes_the_first_slot() {
        let result = insert_or_move(&[], Placement::Insert('A'), 5).unwrap();
        assert_eq!(positions(&result), vec![('A', 1)]);
    }

    #[test]
    fn operations_on_an_empty_group_are_no_ops() {
        assert!(insert_or_move::<char>(&[], Placement::Move('A'), 1)
            .unwrap()
            .is_empty());
        assert!(compact::<char>(&[]).unwrap().is_empty());
    }

    #[test]
    fn contract_violations_are_reported_not_repaired() {
        let members = slots(&[('A', 1), ('B', 2)]);
        assert_eq!(
            insert_or_move(&members, Placement::Move('Q'), 1).unwrap_err(),
            OrderingError::UnknownMember {
                id: String::from("Q")
            }
        );
        assert_eq!(
            insert_or_move(&members, Placement::Insert('A'), 1).unwrap_err(),
            OrderingError::DuplicateMember {
                id: String::from("A")
            }
        );

        let gapped = slots(&[('A', 1), ('B', 3)]);
        assert_eq!(
            insert_or_move(&gapped, Placement::Move('A'), 2).unwrap_err(),
            OrderingError::NotDense {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn compact_closes_gaps_and_keeps_relative_order() {
        let survivors = slots(&[('Z', 3), ('X', 1)]);
        let result = compact(&survivors).unwrap();
        assert_eq!(positions(&result), vec![('X', 1), ('Z', 2)]);
        assert!(!result[0].is_changed());
        assert!(result[1].is_changed());
    }

    #[test]
    fn compact_is_idempotent() {
        let survivors = slots(&[('A', 2), ('B', 5), ('C', 9)]);
        let first = compact(&survivors).unwrap();
        assert_eq!(first, compact(&survivors).unwrap());

        let second = compact(&apply(&first)).unwrap();
        assert_eq!(positions(&first), positions(&second));
        assert!(second.iter().all(|assignment| !assignment.is_changed()));
    }

    #[test]
    fn compact_rejects_duplicate_positions() {
        let corrupted = slots(&[('A', 1), ('B', 1)]);
        assert_eq!(
            compact(&corrupted).unwrap_err(),
            OrderingError::DuplicatePosition { position: 1 }
        );
    }

    #[test]
    fn density_check_distinguishes_gaps_from_duplicates() {
        assert!(verify_dense(&slots(&[('A', 2), ('B', 1)])).is_ok());
        assert_eq!(
            verify_dense(&slots(&[('A', 1), ('B', 1)])).unwrap_err(),
            OrderingError::DuplicatePosition { position: 1 }
        );
        assert_eq!(
            verify_dense(&slots(&[('A', 2)])).unwrap_err(),
            OrderingError::NotDense {
                expected: 1,
                found: 2
            }
        );
        assert_eq!(
            verify_dense(&slots(&[('A', 1), ('A', 2)])).unwrap_err(),
            OrderingError::DuplicateMember {
                id: String::from("A")
            }
        );
    }

    #[test]
    fn any_sequence_of_operations_keeps_positions_dense() {
        let mut members: Vec<Slot<char>> = Vec::new();
        let script: [(char, i64); 8] = [
            ('A', 1),
            ('B', 1),
            ('C', 9),
            ('D', 2),
            ('B', -1),
            ('E', 3),
            ('A', 4),
            ('C', 2),
        ];
        for (id, desired) in script {
            let placement = if members.iter().any(|slot| slot.id == id) {
                Placement::Move(id)
            } else {
                Placement::Insert(id)
            };
            members = apply(&insert_or_move(&members, placement, desired).unwrap());
            verify_dense(&members).unwrap();
        }

        members.retain(|slot| slot.id != 'D');
        members = apply(&compact(&members).unwrap());
        verify_dense(&members).unwrap();
        assert_eq!(members.len(), 4);
    }
}
