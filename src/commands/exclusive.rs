use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Tracks which command currently holds each mutual-exclusivity group
/// (e.g. the "speed modifier" commands).
///
/// Handlers consult this themselves: the dispatcher only carries the group
/// key on the descriptor.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveGroups {
    active: Arc<Mutex<HashMap<String, String>>>,
}

/// Holds a group until dropped.
#[derive(Debug)]
pub struct GroupLease {
    group: String,
    command: String,
    active: Arc<Mutex<HashMap<String, String>>>,
}

impl ExclusiveGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `group` on behalf of `command`. Fails with the name of the
    /// command already holding it.
    pub fn try_enter(&self, group: &str, command: &str) -> Result<GroupLease, String> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = active.get(group) {
            debug!("Group '{}' is held by '{}', rejecting '{}'", group, holder, command);
            return Err(holder.clone());
        }
        active.insert(group.to_string(), command.to_string());
        Ok(GroupLease {
            group: group.to_string(),
            command: command.to_string(),
            active: Arc::clone(&self.active),
        })
    }

    /// Command currently holding `group`, if any.
    pub fn holder(&self, group: &str) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .cloned()
    }
}

impl GroupLease {
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.get(&self.group) == Some(&self.command) {
            active.remove(&self.group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_member_is_rejected_while_first_holds() {
        let groups = ExclusiveGroups::new();
        let lease = groups.try_enter("speed", "faster").unwrap();
        assert_eq!(lease.command(), "faster");
        assert_eq!(groups.try_enter("speed", "slower").unwrap_err(), "faster");
        assert_eq!(groups.holder("speed").as_deref(), Some("faster"));
    }

    #[test]
    fn test_dropping_lease_frees_group() {
        let groups = ExclusiveGroups::new();
        drop(groups.try_enter("speed", "faster").unwrap());
        assert_eq!(groups.holder("speed"), None);
        assert!(groups.try_enter("speed", "slower").is_ok());
    }

    #[test]
    fn test_groups_are_independent() {
        let groups = ExclusiveGroups::new();
        let _speed = groups.try_enter("speed", "faster").unwrap();
        assert!(groups.try_enter("colors", "rainbow").is_ok());
    }
}
