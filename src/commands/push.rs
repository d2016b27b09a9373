use crate::image::ImageIdentifier;
use crate::state::AppContext;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Tags each local `repository:version` image for the registry and pushes it.
pub async fn run(ctx: &AppContext, repository: &str, versions: &[String]) -> Result<()> {
    let (_, registry) = ctx.registry_config()?;

    if let (Some(username), Some(token)) = (&registry.username, registry.resolved_token()?) {
        info!("Logging into {}", registry.host);
        docker_login(&registry.host, username, token.expose_secret()).await?;
    }

    for version in versions {
        let source = format!("{}:{}", repository, version);
        let target = target_reference(&registry.host, repository, version);
        info!("Tagging {} {}", source, target);
        docker(&["tag", &source, &target]).await?;
        info!("Pushing {}", target);
        docker(&["push", &target]).await?;
        println!("Pushed {}", target);
    }
    Ok(())
}

fn target_reference(host: &str, repository: &str, version: &str) -> String {
    ImageIdentifier::new(host, repository).with_tag(version)
}

async fn docker_login(host: &str, username: &str, password: &str) -> Result<()> {
    let mut child = Command::new("docker")
        .args(["login", host, "--username", username, "--password-stdin"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to run docker")?;

    let mut stdin = child.stdin.take().context("Failed to open docker stdin")?;
    stdin.write_all(password.as_bytes()).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        anyhow::bail!(
            "docker login to {} failed: {}",
            host,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn docker(args: &[&str]) -> Result<()> {
    run_logged("docker", args).await
}

/// Runs `program`, logging its output line by line. Stdout and stderr are drained
/// concurrently.
async fn run_logged(program: &str, args: &[&str]) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run {}", program))?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let log_stdout = async {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            info!("{}", line);
        }
        Ok::<_, std::io::Error>(())
    };
    let collect_stderr = async {
        let mut collected = Vec::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await? {
            debug!("{}", line);
            collected.push(line);
        }
        Ok::<_, std::io::Error>(collected)
    };

    let (logged, collected, status) = tokio::join!(log_stdout, collect_stderr, child.wait());
    logged?;
    let collected = collected?;
    if !status?.success() {
        anyhow::bail!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            collected.join("\n").trim()
        );
    }
    Ok(())
}
