//! Session context and the client-local selection store.
//!
//! The selection flow writes group, subgroup and course one at a time into a
//! small TOML file so they survive between CLI invocations. The live session
//! never reads that file itself: the caller turns the stored selection into a
//! [`SessionContext`] and passes it in.

use std::fs;
use std::path::{Path, PathBuf};

use attend_api::SessionKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

const SELECTION_FILE: &str = "selection.toml";

/// Identifies the class a session takes attendance for.
///
/// Immutable for the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionContext {
    group: String,
    subgroup: String,
    course: String,
}

impl SessionContext {
    /// Build a context, rejecting blank fields.
    pub fn new(
        group: impl Into<String>,
        subgroup: impl Into<String>,
        course: impl Into<String>,
    ) -> SessionResult<Self> {
        let context = Self {
            group: group.into().trim().to_string(),
            subgroup: subgroup.into().trim().to_string(),
            course: course.into().trim().to_string(),
        };
        context.validate()?;
        Ok(context)
    }

    /// Fails with `PreconditionMissing` naming every blank field.
    pub fn validate(&self) -> SessionResult<()> {
        let missing: Vec<&'static str> = [
            ("group", &self.group),
            ("subgroup", &self.subgroup),
            ("course", &self.course),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SessionError::precondition_missing(missing))
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn subgroup(&self) -> &str {
        &self.subgroup
    }

    pub fn course(&self) -> &str {
        &self.course
    }

    /// Borrowed form used on the wire.
    pub fn key(&self) -> SessionKey<'_> {
        SessionKey {
            group: &self.group,
            subgroup: &self.subgroup,
            course: &self.course,
        }
    }
}

impl std::fmt::Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.subgroup, self.course)
    }
}

/// Partially completed selection, as persisted between screens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub group: Option<String>,
    pub subgroup: Option<String>,
    pub course: Option<String>,
}

impl Selection {
    /// Turn a complete selection into a context.
    pub fn to_context(&self) -> SessionResult<SessionContext> {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        SessionContext::new(
            field(&self.group),
            field(&self.subgroup),
            field(&self.course),
        )
    }
}

/// Client-local key/value storage for the selection.
#[derive(Debug, Clone)]
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    /// Store backed by `<dir>/selection.toml`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SELECTION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current selection; an absent file is an empty selection.
    pub fn load(&self) -> SessionResult<Selection> {
        let document = match fs::read_to_string(&self.path) {
            Ok(document) => document,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Selection::default()),
            Err(e) => return Err(self.io_error("read selection", e)),
        };
        toml::from_str(&document).map_err(|e| {
            SessionError::config("selection", self.path.display().to_string(), e.message())
        })
    }

    /// Select a group and subgroup. A previously chosen course belongs to the
    /// old pair, so it is dropped when either changes.
    pub fn select_class(&self, group: &str, subgroup: &str) -> SessionResult<Selection> {
        let mut selection = self.load()?;
        let changed = selection.group.as_deref() != Some(group)
            || selection.subgroup.as_deref() != Some(subgroup);
        selection.group = Some(group.to_string());
        selection.subgroup = Some(subgroup.to_string());
        if changed {
            selection.course = None;
        }
        self.save(&selection)?;
        Ok(selection)
    }

    pub fn select_course(&self, course: &str) -> SessionResult<Selection> {
        let mut selection = self.load()?;
        selection.course = Some(course.to_string());
        self.save(&selection)?;
        Ok(selection)
    }

    /// Forget the selection entirely.
    pub fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("clear selection", e)),
        }
    }

    fn save(&self, selection: &Selection) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error("create state dir", e))?;
        }
        let document = toml::to_string(selection)
            .map_err(|e| SessionError::external("toml", e))?;
        fs::write(&self.path, document).map_err(|e| self.io_error("write selection", e))?;
        debug!(path = %self.path.display(), ?selection, "selection saved");
        Ok(())
    }

    fn io_error(&self, operation: &str, source: std::io::Error) -> SessionError {
        SessionError::io(operation, Some(self.path.display().to_string()), source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_requires_all_fields() {
        let err = SessionContext::new("CS", "  ", "").unwrap_err();
        match err {
            SessionError::PreconditionMissing { missing, .. } => {
                assert_eq!(missing, vec!["subgroup", "course"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let context = SessionContext::new(" CS ", "A", "OOP").unwrap();
        assert_eq!(context.group(), "CS");
        assert_eq!(context.to_string(), "CS/A/OOP");
        assert_eq!(context.key().course, "OOP");
    }

    #[test]
    fn test_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::in_dir(dir.path().join("nested"));

        assert_eq!(store.load().unwrap(), Selection::default());
        assert!(store.load().unwrap().to_context().is_err());

        store.select_class("CS", "A").unwrap();
        let selection = store.select_course("Data Structures").unwrap();
        let context = selection.to_context().unwrap();
        assert_eq!(context.course(), "Data Structures");
        assert_eq!(store.load().unwrap(), selection);

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), Selection::default());
    }

    #[test]
    fn test_changing_class_drops_stale_course() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::in_dir(dir.path());

        store.select_class("CS", "A").unwrap();
        store.select_course("OOP").unwrap();

        let same = store.select_class("CS", "A").unwrap();
        assert_eq!(same.course.as_deref(), Some("OOP"));

        let other = store.select_class("SE", "A").unwrap();
        assert_eq!(other.course, None);
    }
}
