use crate::config::{validate_chrome_path, BrowserConfig};
use crate::error::{ReposterError, Result};
use std::process::Command;

/// Build the Chrome launch command for the dedicated reposter profile
pub fn build_command(config: &BrowserConfig) -> Command {
    let mut cmd = Command::new(&config.chrome_path);

    cmd.arg(format!("--user-data-dir={}", config.user_data_dir.display()));
    cmd.arg(format!("--remote-debugging-port={}", config.cdp_port));

    if config.headless {
        cmd.arg("--headless=new");
        cmd.arg("--disable-gpu");
    }

    cmd.arg("--no-first-run");
    cmd.arg("--no-default-browser-check");

    for arg in &config.custom_args {
        cmd.arg(arg);
    }

    cmd.arg("about:blank");

    // Don't wait for Chrome to exit
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                // Create new process group
                libc::setsid();
                Ok(())
            });
        }
    }

    cmd
}

/// Start Chrome unless the config asks to attach to a running instance.
/// Returns the pid of the launched process.
pub fn launch(config: &BrowserConfig) -> Result<Option<u32>> {
    if config.attach_only {
        tracing::info!("attach_only set, expecting Chrome on port {}", config.cdp_port);
        return Ok(None);
    }

    validate_chrome_path(&config.chrome_path)?;
    std::fs::create_dir_all(&config.user_data_dir)?;

    let child = build_command(config).spawn().map_err(|e| {
        ReposterError::Browser(format!(
            "Failed to launch Chrome at {:?}: {}",
            config.chrome_path, e
        ))
    })?;
    tracing::info!(
        "Launched Chrome (pid {}) with profile {:?}",
        child.id(),
        config.user_data_dir
    );
    Ok(Some(child.id()))
}
