//! Booking line items and accommodation change sets.

use serde::{Deserialize, Serialize};

use bunkhouse_accommodations::SleepingAccommodationId;

/// One reserved accommodation and how many people sleep there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingItem {
    pub sleeping_accommodation_id: SleepingAccommodationId,
    pub person_count: u32,
}

impl BookingItem {
    pub fn new(sleeping_accommodation_id: SleepingAccommodationId, person_count: u32) -> Self {
        Self {
            sleeping_accommodation_id,
            person_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// Difference for a single accommodation between two item lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccommodationChange {
    pub sleeping_accommodation_id: SleepingAccommodationId,
    pub previous_person_count: u32,
    pub new_person_count: u32,
    pub change_type: ChangeType,
}

pub fn total_persons(items: &[BookingItem]) -> u32 {
    items.iter().map(|i| i.person_count).sum()
}

/// Compute the change set turning `previous` into `next`.
///
/// Removals come first (in `previous` order), then additions and modifications
/// (in `next` order). Identical lists yield an empty set.
pub fn diff_items(previous: &[BookingItem], next: &[BookingItem]) -> Vec<AccommodationChange> {
    let find = |items: &[BookingItem], id| {
        items
            .iter()
            .find(|i| i.sleeping_accommodation_id == id)
            .map(|i| i.person_count)
    };

    let mut changes = Vec::new();

    for item in previous {
        if find(next, item.sleeping_accommodation_id).is_none() {
            changes.push(AccommodationChange {
                sleeping_accommodation_id: item.sleeping_accommodation_id,
                previous_person_count: item.person_count,
                new_person_count: 0,
                change_type: ChangeType::Removed,
            });
        }
    }

    for item in next {
        match find(previous, item.sleeping_accommodation_id) {
            Some(count) if count != item.person_count => changes.push(AccommodationChange {
                sleeping_accommodation_id: item.sleeping_accommodation_id,
                previous_person_count: count,
                new_person_count: item.person_count,
                change_type: ChangeType::Modified,
            }),
            Some(_) => {}
            None => changes.push(AccommodationChange {
                sleeping_accommodation_id: item.sleeping_accommodation_id,
                previous_person_count: 0,
                new_person_count: item.person_count,
                change_type: ChangeType::Added,
            }),
        }
    }

    changes
}

/// Apply a change set to an item list.
///
/// Tolerant of stale input: adding an existing accommodation overwrites its count,
/// modifying or removing a missing one is ignored.
pub fn apply_changes(items: &[BookingItem], changes: &[AccommodationChange]) -> Vec<BookingItem> {
    let mut result = items.to_vec();

    for change in changes {
        let position = result
            .iter()
            .position(|i| i.sleeping_accommodation_id == change.sleeping_accommodation_id);

        match (change.change_type, position) {
            (ChangeType::Added, None) => result.push(BookingItem::new(
                change.sleeping_accommodation_id,
                change.new_person_count,
            )),
            (ChangeType::Added | ChangeType::Modified, Some(idx)) => {
                result[idx].person_count = change.new_person_count;
            }
            (ChangeType::Removed, Some(idx)) => {
                result.remove(idx);
            }
            (ChangeType::Modified | ChangeType::Removed, None) => {}
        }
    }

    result
}
