use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const PASSWORD_ENV: &str = "CRON_OVERVIEW_SSH_PASS";
const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s' \"$CRON_OVERVIEW_SSH_PASS\"\n";

/// Points `ssh` at a helper script that answers the password prompt from the
/// environment, so password logins work without a terminal.
pub fn apply_askpass_env(cmd: &mut Command, password: &str) -> anyhow::Result<()> {
    let home = std::env::var("HOME").context("failed to resolve HOME for askpass")?;
    let script = ensure_askpass_script(&PathBuf::from(home).join(".cron-overview"))?;
    cmd.env(PASSWORD_ENV, password)
        .env("SSH_ASKPASS", script)
        .env("SSH_ASKPASS_REQUIRE", "force")
        .env("DISPLAY", "1");
    Ok(())
}

pub fn ensure_askpass_script(dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join("ssh-askpass.sh");
    let current = std::fs::read(&path).ok();
    if current.as_deref() != Some(ASKPASS_SCRIPT.as_bytes()) {
        std::fs::write(&path, ASKPASS_SCRIPT)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o700);
        std::fs::set_permissions(&path, perms)?;
    }
    Ok(path)
}
