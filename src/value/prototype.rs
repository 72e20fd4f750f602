use std::sync::RwLock;

use rustc_hash::FxHashMap;

use super::Value;
use crate::sync;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrototypeError {
    #[error("prototype of {0} is locked")]
    Locked(String),
    #[error("{0} is already implemented")]
    AlreadyImplemented(String),
}

#[derive(Debug, Clone)]
pub struct Member {
    pub value: Value,
    pub private: bool,
}

#[derive(Debug, Default)]
struct PrototypeState {
    members: FxHashMap<String, Member>,
    locked: bool,
    implemented: bool,
}

/// Keyed bag of user methods. Writes need an explicit `unlock` first.
#[derive(Debug)]
pub struct Prototype {
    owner: String,
    state: RwLock<PrototypeState>,
}

impl Prototype {
    /// Starts unlocked.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: RwLock::new(PrototypeState::default()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Member> {
        sync::read(&self.state).members.get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value, private: bool) -> Result<(), PrototypeError> {
        let mut state = sync::write(&self.state);
        if state.locked {
            return Err(PrototypeError::Locked(self.owner.clone()));
        }
        state
            .members
            .insert(name.to_string(), Member { value, private });
        Ok(())
    }

    pub fn unlock(&self) {
        sync::write(&self.state).locked = false;
    }

    pub fn lock(&self) {
        sync::write(&self.state).locked = true;
    }

    pub fn is_implemented(&self) -> bool {
        sync::read(&self.state).implemented
    }

    /// Locks and marks the prototype implemented; a second call fails.
    pub fn implement(&self) -> Result<(), PrototypeError> {
        let mut state = sync::write(&self.state);
        if state.implemented {
            return Err(PrototypeError::AlreadyImplemented(self.owner.clone()));
        }
        state.implemented = true;
        state.locked = true;
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = sync::read(&self.state).members.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every member so closures referring back to the owner are released.
    pub fn clear(&self) {
        sync::write(&self.state).members.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let proto = Prototype::new("User");
        proto.set("name", Value::Int(1), false).unwrap();
        proto.implement().unwrap();

        assert_eq!(
            proto.set("other", Value::Nil, false),
            Err(PrototypeError::Locked("User".into()))
        );
        assert_eq!(
            proto.implement(),
            Err(PrototypeError::AlreadyImplemented("User".into()))
        );

        proto.unlock();
        proto.set("other", Value::Nil, true).unwrap();
        proto.lock();
        assert!(proto.get("other").is_some_and(|m| m.private));
        assert_eq!(proto.names(), vec!["name", "other"]);
    }
}
