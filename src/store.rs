use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::session::{SessionKey, StudentSession};

fn session_file(dir: &Path, key: &SessionKey) -> PathBuf {
    dir.join(format!("{}__{}.json", key.user, key.semester))
}

/// Persist one session snapshot. The write goes through a temp file plus
/// rename so a crash cannot leave a torn snapshot behind.
pub async fn save_session(dir: &Path, session: &StudentSession) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let json = serde_json::to_string_pretty(session)?;
    let path = session_file(dir, &session.key());
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Load every persisted session. Unparseable files are skipped with a
/// warning; a missing directory just means nothing was persisted yet.
pub async fn load_all_sessions(dir: &Path) -> Result<Vec<StudentSession>> {
    let mut sessions = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
        Err(e) => return Err(e.into()),
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<StudentSession>(&text) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to parse session file");
                }
            },
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Failed to read session file");
            }
        }
    }
    Ok(sessions)
}
