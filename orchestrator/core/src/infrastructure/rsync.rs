// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::backup::{Mirror, MirrorError, MirrorRequest};

/// Mirrors directories with an external `rsync` process.
///
/// The child is killed when the token is cancelled or the future is dropped.
pub struct RsyncMirror {
    program: OsString,
}

impl RsyncMirror {
    pub fn new() -> Self {
        Self::with_program("rsync")
    }

    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(request: &MirrorRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-ah".into(), "--delete".into()];
        if let Some(link_dest) = &request.link_dest {
            args.push("--link-dest".into());
            args.push(link_dest.clone().into_os_string());
        }
        // Trailing slash: copy the contents, not the directory itself
        let mut source = request.source.clone().into_os_string();
        source.push("/");
        args.push(source);
        args.push(request.destination.clone().into_os_string());
        args
    }
}

impl Default for RsyncMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mirror for RsyncMirror {
    async fn mirror(&self, request: &MirrorRequest, cancel: &CancellationToken) -> Result<(), MirrorError> {
        let args = Self::args(request);
        debug!(program = ?self.program, ?args, "Spawning mirror process");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MirrorError::Spawn(e.to_string()))?;

        // Dropping the `wait_with_output` future drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| MirrorError::Spawn(e.to_string()))?,
            _ = cancel.cancelled() => {
                warn!(source = %request.source.display(), "Mirror cancelled, rsync terminated");
                return Err(MirrorError::Cancelled);
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(MirrorError::Failed {
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(link_dest: Option<&str>) -> MirrorRequest {
        MirrorRequest {
            source: PathBuf::from("/data"),
            destination: PathBuf::from("/backups/mc1/20260101_000000"),
            link_dest: link_dest.map(PathBuf::from),
        }
    }

    #[test]
    fn test_args() {
        let args = RsyncMirror::args(&request(None));
        assert_eq!(args, vec!["-ah", "--delete", "/data/", "/backups/mc1/20260101_000000"]);

        let args = RsyncMirror::args(&request(Some("/backups/mc1/20251231_000000")));
        assert_eq!(
            args,
            vec![
                "-ah",
                "--delete",
                "--link-dest",
                "/backups/mc1/20251231_000000",
                "/data/",
                "/backups/mc1/20260101_000000"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let mirror = RsyncMirror::with_program("/nonexistent/rsync-binary");
        let err = mirror
            .mirror(&request(None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Spawn(_)));
    }
}
