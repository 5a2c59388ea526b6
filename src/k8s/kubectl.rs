//! Kubectl wrapper used by the `kubectl` apply strategy

use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::process::Command;

fn kubectl(kubeconfig: Option<&Path>) -> Command {
    let mut cmd = Command::new("kubectl");
    if let Some(kc) = kubeconfig {
        cmd.env("KUBECONFIG", kc);
    }
    cmd
}

/// Check that a kubectl binary is on the PATH
pub fn ensure_available() -> Result<()> {
    which::which("kubectl")
        .map(|_| ())
        .map_err(|_| anyhow!("kubectl not found in PATH"))
}

/// Run kubectl and capture stdout
pub fn run_kubectl_output(args: &[&str], kubeconfig: Option<&Path>) -> Result<String> {
    let output = kubectl(kubeconfig)
        .args(args)
        .output()
        .context("Failed to run kubectl command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "kubectl command failed: {}\n{}",
            args.join(" "),
            stderr.trim_end()
        ));
    }

    Ok(String::from_utf8(output.stdout)?)
}

/// Arguments for a forced server-side apply of `file` under `field_manager`
pub fn server_side_apply_args(file: &Path, field_manager: &str) -> Vec<String> {
    vec![
        "apply".to_string(),
        "--server-side".to_string(),
        "--force-conflicts".to_string(),
        format!("--field-manager={}", field_manager),
        "-f".to_string(),
        file.display().to_string(),
    ]
}

/// Server-side apply a manifest file, returning kubectl's output
pub fn apply_file_server_side(
    file: &Path,
    field_manager: &str,
    kubeconfig: Option<&Path>,
) -> Result<String> {
    let args = server_side_apply_args(file, field_manager);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_kubectl_output(&args, kubeconfig)
        .with_context(|| format!("Failed to apply manifest {}", file.display()))
}
