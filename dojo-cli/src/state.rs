use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use dojo_client::Session;
use dojo_core::TaskId;

pub const HOME_ENV: &str = "DOJO_HOME";

pub fn dojo_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".dojo"))
}

pub fn ensure_dojo_home() -> Result<PathBuf> {
    let dir = dojo_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

/// Which kata the focus view follows between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub active_task_id: Option<TaskId>,
}

pub fn session_path() -> Result<PathBuf> {
    Ok(ensure_dojo_home()?.join("session.json"))
}

pub fn focus_path() -> Result<PathBuf> {
    Ok(ensure_dojo_home()?.join("focus.json"))
}

pub fn load_session() -> Result<Option<Session>> {
    read_json(&session_path()?)
}

/// Persist the session, or remove the file when signed out.
pub fn save_session(session: Option<&Session>) -> Result<()> {
    let p = session_path()?;
    match session {
        Some(session) => write_json(&p, session),
        None => remove_if_present(&p),
    }
}

pub fn load_focus() -> Result<Focus> {
    Ok(read_json(&focus_path()?)?.unwrap_or_default())
}

pub fn save_focus(focus: &Focus) -> Result<()> {
    let p = focus_path()?;
    if focus.active_task_id.is_none() {
        return remove_if_present(&p);
    }
    write_json(&p, focus)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(e).with_context(|| format!("remove {}", path.display()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dojo-state-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn focus_round_trips_through_disk() {
        let path = scratch("focus").join("focus.json");
        let focus = Focus {
            active_task_id: Some(TaskId::new("b6f1")),
        };
        write_json(&path, &focus).unwrap();
        assert_eq!(read_json::<Focus>(&path).unwrap(), Some(focus));

        remove_if_present(&path).unwrap();
        assert_eq!(read_json::<Focus>(&path).unwrap(), None);
        // removing twice is fine
        remove_if_present(&path).unwrap();
    }

    #[test]
    fn corrupt_file_names_the_path() {
        let path = scratch("corrupt").join("session.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<Session>(&path).unwrap_err();
        assert!(err.to_string().contains("session.json"));
    }
}
